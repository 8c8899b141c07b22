use std::time::Duration;

use crate::errors::ServiceError;

/// Construction-time parameters of the issuance service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Number of concurrent generation workers. A small count serializes
    /// more of the costly generations; a large one risks oversubscribing
    /// the CPU given how expensive each generation is.
    pub worker_count: usize,
    /// Modulus size of issued key pairs. Deliberately large by default:
    /// the cost of generation is why the worker pool and the request
    /// cache exist.
    pub key_bits: usize,
    /// Upper bound on the wire-format subject name.
    pub max_name_bytes: usize,
    /// Bound on cached *resolved* credentials, evicted oldest-first.
    /// `0` keeps every credential for the life of the process.
    pub cache_capacity: usize,
    /// How long shutdown waits for workers to drain before aborting them.
    pub shutdown_grace: Duration,
    /// Optional bound on how long one connection waits for its slot to
    /// resolve. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            key_bits: 8192,
            max_name_bytes: 4096,
            cache_capacity: 0,
            shutdown_grace: Duration::from_secs(5),
            wait_timeout: None,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.worker_count == 0 {
            return Err(ServiceError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.key_bits < 512 {
            return Err(ServiceError::InvalidConfig(
                "key_bits must be at least 512".to_string(),
            ));
        }
        if self.max_name_bytes == 0 {
            return Err(ServiceError::InvalidConfig(
                "max_name_bytes must be at least 1".to_string(),
            ));
        }
        if self.shutdown_grace.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "shutdown_grace must be greater than zero".to_string(),
            ));
        }
        if matches!(self.wait_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(ServiceError::InvalidConfig(
                "wait_timeout must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}
