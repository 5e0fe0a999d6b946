//! Graceful shutdown handling.

use tokio::sync::broadcast;
use tracing::{error, info};

/// Fans a single shutdown event out to every long-running task.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Notify every subscriber.
    pub fn shutdown(&self) {
        let notified = self.sender.send(()).unwrap_or(0);
        info!(tasks = notified, "shutdown signalled");
    }

    /// Wait for Ctrl+C, then notify every subscriber.
    pub async fn on_ctrl_c(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
        self.shutdown();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
