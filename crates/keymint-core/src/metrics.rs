use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssuanceMetrics {
    pub active_connections: u64,
    pub total_connections: u64,
    pub responses_served: u64,
    pub protocol_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub credentials_issued: u64,
    pub issuance_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct IssuanceMetricsStore {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    responses_served: AtomicU64,
    protocol_errors: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    credentials_issued: AtomicU64,
    issuance_failures: AtomicU64,
}

impl IssuanceMetricsStore {
    pub(crate) fn snapshot(&self) -> IssuanceMetrics {
        IssuanceMetrics {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            responses_served: self.responses_served.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            credentials_issued: self.credentials_issued.load(Ordering::Relaxed),
            issuance_failures: self.issuance_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_connection_open(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_connection_close(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(1))
            });
    }

    pub(crate) fn record_response_served(&self) {
        self.responses_served.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_credential_issued(&self) {
        self.credentials_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_issuance_failure(&self) {
        self.issuance_failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::IssuanceMetricsStore;

    #[test]
    fn connection_counters_track_open_and_close() {
        let store = IssuanceMetricsStore::default();
        store.record_connection_open();
        store.record_connection_open();
        store.record_connection_close();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 1);
    }

    #[test]
    fn close_never_underflows() {
        let store = IssuanceMetricsStore::default();
        store.record_connection_close();
        assert_eq!(store.snapshot().active_connections, 0);
    }
}
