use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use keymint_pki::{CertificateAuthority, IssuedCredential, PkiError};

use crate::cache::{CredentialSlot, IssueCache};
use crate::errors::IssueFailure;
use crate::metrics::IssuanceMetricsStore;

/// The expensive issuance seam.
///
/// Implementations run on the blocking thread pool and must tolerate
/// concurrent calls for *different* subjects; the cache guarantees no two
/// concurrent calls for the same subject.
pub trait CredentialIssuer: Send + Sync + 'static {
    fn issue(&self, subject: &str) -> Result<IssuedCredential, PkiError>;
}

impl CredentialIssuer for CertificateAuthority {
    fn issue(&self, subject: &str) -> Result<IssuedCredential, PkiError> {
        CertificateAuthority::issue(self, subject)
    }
}

/// One unit of generation work. Created by the cache on a miss, consumed
/// by exactly one worker, never mutated.
#[derive(Debug)]
pub(crate) struct Task {
    pub(crate) subject: String,
    pub(crate) slot: Arc<CredentialSlot>,
}

pub(crate) type TaskSender = mpsc::UnboundedSender<Task>;
pub(crate) type SharedTaskReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Task>>>;

pub(crate) fn spawn_workers<I: CredentialIssuer>(
    worker_count: usize,
    queue: SharedTaskReceiver,
    issuer: Arc<I>,
    cache: Arc<IssueCache>,
    metrics: Arc<IssuanceMetricsStore>,
) -> Vec<JoinHandle<()>> {
    (0..worker_count)
        .map(|worker_id| {
            let queue = Arc::clone(&queue);
            let issuer = Arc::clone(&issuer);
            let cache = Arc::clone(&cache);
            let metrics = Arc::clone(&metrics);
            tokio::spawn(worker_loop(worker_id, queue, issuer, cache, metrics))
        })
        .collect()
}

async fn worker_loop<I: CredentialIssuer>(
    worker_id: usize,
    queue: SharedTaskReceiver,
    issuer: Arc<I>,
    cache: Arc<IssueCache>,
    metrics: Arc<IssuanceMetricsStore>,
) {
    loop {
        // The receiver lock is held only while idle; it is released before
        // the issuance runs so all workers generate in parallel.
        let task = { queue.lock().await.recv().await };
        let Some(task) = task else {
            // queue closed and fully drained
            break;
        };
        run_task(worker_id, task, &issuer, &cache, &metrics).await;
    }
    tracing::debug!(worker_id, "worker stopped");
}

async fn run_task<I: CredentialIssuer>(
    worker_id: usize,
    task: Task,
    issuer: &Arc<I>,
    cache: &IssueCache,
    metrics: &IssuanceMetricsStore,
) {
    let Task { subject, slot } = task;
    tracing::debug!(worker_id, subject = %subject, "generating credential");
    let started = Instant::now();

    let issuer = Arc::clone(issuer);
    let issue_subject = subject.clone();
    let result = tokio::task::spawn_blocking(move || issuer.issue(&issue_subject)).await;

    match result {
        Ok(Ok(credential)) => {
            metrics.record_credential_issued();
            tracing::info!(
                worker_id,
                subject = %subject,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "credential issued"
            );
            cache.resolve_success(&slot, Arc::new(credential));
        }
        Ok(Err(error)) => {
            metrics.record_issuance_failure();
            tracing::warn!(
                worker_id,
                subject = %subject,
                code = error.code(),
                "issuance failed: {error}"
            );
            cache.resolve_failure(&slot, IssueFailure::from_pki(&error));
        }
        Err(join_error) => {
            metrics.record_issuance_failure();
            tracing::error!(worker_id, subject = %subject, "issuance task lost: {join_error}");
            cache.resolve_failure(&slot, IssueFailure::worker_lost(join_error.to_string()));
        }
    }
}
