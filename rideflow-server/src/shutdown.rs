//! Signal handling and graceful shutdown.

use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long processors get to finish in-flight work after shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancels `root` on SIGTERM, SIGINT or SIGHUP.
pub fn spawn_signal_handler(root: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sighup.recv() => {
                tracing::info!("Received SIGHUP, initiating graceful shutdown");
            }
            _ = root.cancelled() => return,
        }
        root.cancel();
    });
    Ok(())
}

/// Waits for the processors to stop, at most [`DRAIN_TIMEOUT`].
///
/// Deliveries still unacknowledged when this gives up are redelivered by the
/// broker once the connection closes.
pub async fn drain(tasks: Vec<JoinHandle<()>>) {
    let count = tasks.len();
    match tokio::time::timeout(DRAIN_TIMEOUT, futures_util::future::join_all(tasks)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Processor task failed");
                }
            }
            tracing::info!(count, "Processors stopped");
        }
        Err(_) => {
            tracing::warn!(count, "Timed out waiting for processors to stop");
        }
    }
}
