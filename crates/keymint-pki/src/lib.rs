mod ca;
mod credential;
mod identity;
pub mod pem;

pub use ca::CertificateAuthority;
pub use credential::IssuedCredential;
pub use identity::{load_or_generate_ca_key, CaIdentity};

use thiserror::Error;

/// Errors raised while constructing or operating the certificate authority.
#[derive(Debug, Error)]
pub enum PkiError {
    #[error("invalid certificate authority material: {0}")]
    InvalidMaterial(String),
    #[error("key generation failed: {0}")]
    Generation(String),
    #[error("certificate signing failed: {0}")]
    Signing(String),
    #[error("permission denied while performing {operation}: {detail}")]
    PermissionDenied { operation: String, detail: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PkiError {
    /// Stable code for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMaterial(_) => "invalid_material",
            Self::Generation(_) => "generation",
            Self::Signing(_) => "signing",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Io(_) => "io",
        }
    }
}
