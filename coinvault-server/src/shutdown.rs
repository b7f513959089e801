//! Signal handling for graceful shutdown.

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Completes when SIGTERM or SIGINT (Ctrl+C) is received.
pub async fn shutdown_signal() -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    Ok(())
}

/// Wait for a shutdown signal and broadcast it to every task loop.
pub async fn broadcast_shutdown(shutdown_tx: watch::Sender<bool>) -> std::io::Result<()> {
    shutdown_signal().await?;
    // Receivers may all be gone already.
    let _ = shutdown_tx.send(true);
    Ok(())
}
