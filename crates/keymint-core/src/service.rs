use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{CacheStatus, CredentialSlot, IssueCache};
use crate::config::ServiceConfig;
use crate::errors::{IssueFailure, ServiceError};
use crate::metrics::{IssuanceMetrics, IssuanceMetricsStore};
use crate::worker::{spawn_workers, CredentialIssuer, SharedTaskReceiver, Task, TaskSender};

/// Owns the cache, the task queue and the worker pool, and coordinates
/// the graceful-then-forceful shutdown sequence.
pub struct IssuanceService {
    config: ServiceConfig,
    cache: Arc<IssueCache>,
    metrics: Arc<IssuanceMetricsStore>,
    queue_tx: Mutex<Option<TaskSender>>,
    queue_rx: SharedTaskReceiver,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IssuanceService {
    /// Validate the config and start the worker pool. Must be called from
    /// within a tokio runtime.
    pub fn start<I: CredentialIssuer>(
        config: ServiceConfig,
        issuer: I,
    ) -> Result<Arc<Self>, ServiceError> {
        config.validate()?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx: SharedTaskReceiver = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let cache = Arc::new(IssueCache::new(config.cache_capacity));
        let metrics = Arc::new(IssuanceMetricsStore::default());
        let workers = spawn_workers(
            config.worker_count,
            Arc::clone(&queue_rx),
            Arc::new(issuer),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        );
        tracing::info!(workers = config.worker_count, "issuance service started");

        Ok(Arc::new(Self {
            config,
            cache,
            metrics,
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx,
            workers: Mutex::new(workers),
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> IssuanceMetrics {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics_store(&self) -> &IssuanceMetricsStore {
        &self.metrics
    }

    /// Get the shared slot for `subject`, creating it and enqueueing the
    /// generation task when no live one exists. The insert-or-fetch and
    /// the enqueue are atomic with respect to concurrent callers.
    pub fn request(
        &self,
        subject: &str,
    ) -> Result<(Arc<CredentialSlot>, CacheStatus), ServiceError> {
        let queue_tx = self.queue_tx.lock().expect("queue sender lock poisoned");
        let Some(sender) = queue_tx.as_ref() else {
            return Err(ServiceError::ShuttingDown);
        };

        let (slot, status) = self.cache.get_or_create(subject, |slot| {
            sender
                .send(Task {
                    subject: subject.to_string(),
                    slot,
                })
                .map_err(|_| ServiceError::ShuttingDown)
        })?;
        match status {
            CacheStatus::Hit => self.metrics.record_cache_hit(),
            CacheStatus::Miss => self.metrics.record_cache_miss(),
        }
        Ok((slot, status))
    }

    /// Stop accepting new work, let the workers drain the queue for at
    /// most the configured grace period, abort any stragglers, and fail
    /// every piece of outstanding work so no waiter hangs. Idempotent.
    pub async fn shutdown(&self) {
        let sender = self
            .queue_tx
            .lock()
            .expect("queue sender lock poisoned")
            .take();
        if sender.is_none() {
            return;
        }
        // Dropping the only sender closes the queue; idle workers exit as
        // soon as it drains.
        drop(sender);

        let grace = self.config.shutdown_grace;
        let mut workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .expect("worker handle lock poisoned")
            .drain(..)
            .collect();

        // Track how many handles completed so the abort path never polls
        // an already-consumed handle again.
        let mut joined = 0_usize;
        let drained = tokio::time::timeout(grace, async {
            for handle in &mut workers {
                let _ = handle.await;
                joined += 1;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                grace_ms = grace.as_millis() as u64,
                "workers did not drain within the grace period, aborting"
            );
            for handle in workers.iter().skip(joined) {
                handle.abort();
            }
            for handle in workers.iter_mut().skip(joined) {
                let _ = handle.await;
            }
        }

        // Tasks still sitting in the queue never reached a worker; fail
        // them so their waiters wake.
        let mut abandoned = 0_usize;
        {
            let mut queue_rx = self.queue_rx.lock().await;
            while let Ok(task) = queue_rx.try_recv() {
                abandoned += 1;
                self.cache
                    .resolve_failure(&task.slot, IssueFailure::shutting_down());
            }
        }
        // Aborted workers may have left their in-flight slot unresolved.
        let orphaned = self.cache.fail_all_pending(&IssueFailure::shutting_down());
        if abandoned > 0 || orphaned > 0 {
            tracing::info!(abandoned, orphaned, "failed outstanding work at shutdown");
        }
        tracing::info!("issuance service stopped");
    }
}
