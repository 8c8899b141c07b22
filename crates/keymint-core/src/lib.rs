mod cache;
mod config;
mod errors;
mod handler;
mod metrics;
pub mod server;
mod service;
mod worker;

pub use cache::{CacheStatus, CredentialSlot, IssueCache, IssueOutcome};
pub use config::ServiceConfig;
pub use errors::{IssueFailure, IssueFailureKind, ServiceError};
pub use handler::{handle_connection, ConnectionOutcome};
pub use metrics::IssuanceMetrics;
pub use service::IssuanceService;
pub use worker::CredentialIssuer;
