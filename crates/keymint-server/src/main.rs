use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use keymint_core::server::run_issuance_server;
use keymint_core::{IssuanceService, ServiceConfig};
use keymint_pki::{load_or_generate_ca_key, CaIdentity, CertificateAuthority};

const STATUS_SCHEMA: &str = "keymint-server-status-v1";

#[derive(Debug, Parser)]
#[command(name = "keymint-server", about = "Credential-issuance service")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8888")]
    listen: SocketAddr,
    /// Number of concurrent key-generation workers.
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Issuer distinguished name placed in every certificate.
    #[arg(long, default_value = "CN=FATSUN")]
    issuer: String,
    /// PKCS#8 PEM CA signing key; generated and persisted when absent.
    #[arg(long, default_value = "./keymint-ca-key.pem")]
    ca_key: PathBuf,
    /// Modulus size of the generated CA key, when one has to be generated.
    #[arg(long, default_value_t = 4096)]
    ca_key_bits: usize,
    /// Modulus size of issued key pairs.
    #[arg(long, default_value_t = 8192)]
    key_bits: usize,
    /// Bound on cached resolved credentials; 0 memoizes forever.
    #[arg(long, default_value_t = 0)]
    cache_capacity: usize,
    /// Grace period for draining workers at shutdown.
    #[arg(long, default_value_t = 5000)]
    shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitClass {
    Ok,
    ConfigInvalid,
    CaLoadFailed,
    BindFailed,
    RuntimeFailed,
}

impl ExitClass {
    fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::ConfigInvalid => 20,
            Self::CaLoadFailed => 21,
            Self::BindFailed => 22,
            Self::RuntimeFailed => 23,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ConfigInvalid => "config_invalid",
            Self::CaLoadFailed => "ca_load_failed",
            Self::BindFailed => "bind_failed",
            Self::RuntimeFailed => "runtime_failed",
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusRecord {
    schema: &'static str,
    outcome: &'static str,
    exit_code: u8,
    exit_class: &'static str,
    detail: Option<String>,
}

struct RunOutcome {
    class: ExitClass,
    detail: Option<String>,
}

impl RunOutcome {
    fn ok(detail: Option<String>) -> Self {
        Self {
            class: ExitClass::Ok,
            detail,
        }
    }

    fn error(class: ExitClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: Some(detail.into()),
        }
    }

    fn emit(&self) -> ExitCode {
        let record = StatusRecord {
            schema: STATUS_SCHEMA,
            outcome: if self.class == ExitClass::Ok {
                "ok"
            } else {
                "error"
            },
            exit_code: self.class.code(),
            exit_class: self.class.label(),
            detail: self.detail.clone(),
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(error) => eprintln!("failed to render status record: {error}"),
        }
        ExitCode::from(self.class.code())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return RunOutcome::error(ExitClass::RuntimeFailed, error.to_string()).emit();
        }
    };
    runtime.block_on(run(args)).emit()
}

async fn run(args: Args) -> RunOutcome {
    let config = ServiceConfig {
        worker_count: args.workers,
        key_bits: args.key_bits,
        cache_capacity: args.cache_capacity,
        shutdown_grace: Duration::from_millis(args.shutdown_grace_ms.max(1)),
        ..ServiceConfig::default()
    };
    if let Err(error) = config.validate() {
        return RunOutcome::error(ExitClass::ConfigInvalid, error.to_string());
    }

    let ca_key = match load_or_generate_ca_key(&args.ca_key, args.ca_key_bits) {
        Ok(key) => key,
        Err(error) => return RunOutcome::error(ExitClass::CaLoadFailed, error.to_string()),
    };
    let identity = match CaIdentity::new(&args.issuer, ca_key) {
        Ok(identity) => identity,
        Err(error) => return RunOutcome::error(ExitClass::CaLoadFailed, error.to_string()),
    };
    let ca = CertificateAuthority::new(identity, args.key_bits);

    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(error) => {
            return RunOutcome::error(
                ExitClass::BindFailed,
                format!("failed to bind {}: {error}", args.listen),
            );
        }
    };

    let service = match IssuanceService::start(config, ca) {
        Ok(service) => service,
        Err(error) => return RunOutcome::error(ExitClass::ConfigInvalid, error.to_string()),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(error) => {
                tracing::error!("failed to install interrupt handler: {error}");
            }
        }
    });

    tracing::info!(listen = %args.listen, workers = args.workers, "server started");
    match run_issuance_server(Arc::clone(&service), listener, shutdown_rx).await {
        Ok(summary) => {
            let metrics = service.metrics();
            RunOutcome::ok(Some(format!(
                "accepted={} served={} issued={} failures={}",
                summary.accepted_connections,
                summary.served_connections,
                metrics.credentials_issued,
                metrics.issuance_failures,
            )))
        }
        Err(error) => RunOutcome::error(ExitClass::RuntimeFailed, error.to_string()),
    }
}
