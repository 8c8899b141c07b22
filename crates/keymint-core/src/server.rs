//! The transport-accept loop: one lightweight task per connection over
//! the bounded pool of generation workers.

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::handler::handle_connection;
use crate::service::IssuanceService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerRunSummary {
    pub accepted_connections: u64,
    pub served_connections: u64,
    pub failed_connections: u64,
}

/// Accept connections until the shutdown channel flips, then stop
/// accepting, drain the worker pool through the service's grace sequence,
/// and finally drain (or abort) the per-connection tasks.
pub async fn run_issuance_server(
    service: Arc<IssuanceService>,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) -> io::Result<ServerRunSummary> {
    let mut summary = ServerRunSummary::default();
    let mut connections = JoinSet::new();

    if !*shutdown_rx.borrow() {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted?;
                    summary.accepted_connections += 1;
                    tracing::debug!(peer = %peer_addr, "connection accepted");
                    let service = Arc::clone(&service);
                    connections.spawn(async move { handle_connection(service, stream).await });
                }
                changed = shutdown_rx.changed() => {
                    match changed {
                        Ok(()) if !*shutdown_rx.borrow() => continue,
                        _ => break,
                    }
                }
            }
        }
    }

    tracing::info!("listener stopped, draining service");
    service.shutdown().await;

    // Connections were woken by the shutdown resolution above; give slow
    // ones one more grace period before cutting them off.
    let grace = service.config().shutdown_grace;
    let mut served = 0_u64;
    let drained = tokio::time::timeout(grace, async {
        while let Some(result) = connections.join_next().await {
            if matches!(result, Ok(outcome) if outcome.is_served()) {
                served += 1;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("aborting connections still open after the grace period");
        connections.shutdown().await;
    }
    summary.served_connections = served;
    summary.failed_connections = summary
        .accepted_connections
        .saturating_sub(summary.served_connections);

    Ok(summary)
}
