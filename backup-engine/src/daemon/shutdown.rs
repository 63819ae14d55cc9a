//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! On a signal the scheduler stops taking new cycles and a cycle already in
//! flight gets the lifecycle's grace period to finish. Ledger writes are
//! atomic, so a cycle abandoned at exit never leaves a partial ledger.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::lifecycle::BackupLifecycle;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Receiver that fires once a signal has arrived
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Wait for SIGTERM or SIGINT, then notify subscribers
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.trigger();
    }

    /// Notify subscribers without a signal
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("No listeners for shutdown signal");
        }
    }

    /// Stop the backup engine, letting an in-flight cycle finish
    pub async fn shutdown(&self, lifecycle: &BackupLifecycle) {
        info!("Graceful shutdown initiated");
        if let Err(e) = lifecycle.shutdown().await {
            error!("Backup engine shutdown error: {}", e);
        }
        info!("Graceful shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
