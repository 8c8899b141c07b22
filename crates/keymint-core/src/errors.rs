use thiserror::Error;

use keymint_pki::PkiError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("service is shutting down")]
    ShuttingDown,
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Broad failure class, kept `Copy` so every waiter of a slot can observe
/// the same terminal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueFailureKind {
    /// Key-pair generation failed.
    Generation,
    /// Certificate construction or signing failed.
    Signing,
    /// The worker carrying the task died before resolving it.
    WorkerLost,
    /// The service shut down before the task ran.
    ShuttingDown,
}

impl IssueFailureKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Signing => "signing",
            Self::WorkerLost => "worker_lost",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Terminal failure of one issuance attempt, shared verbatim with every
/// waiter of the subject's slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {detail}", .kind.code())]
pub struct IssueFailure {
    pub kind: IssueFailureKind,
    pub detail: String,
}

impl IssueFailure {
    pub fn from_pki(error: &PkiError) -> Self {
        let kind = match error {
            PkiError::Generation(_) => IssueFailureKind::Generation,
            _ => IssueFailureKind::Signing,
        };
        Self {
            kind,
            detail: error.to_string(),
        }
    }

    pub fn worker_lost(detail: impl Into<String>) -> Self {
        Self {
            kind: IssueFailureKind::WorkerLost,
            detail: detail.into(),
        }
    }

    pub fn shutting_down() -> Self {
        Self {
            kind: IssueFailureKind::ShuttingDown,
            detail: "service shut down before the request resolved".to_string(),
        }
    }
}
