//! Graceful shutdown controller.
//!
//! Background loops hold a [`watch::Receiver`] and `select!` on
//! [`wait_for_shutdown`] alongside their interval tick. A watch channel
//! remembers the signal, so a loop that subscribes after shutdown was
//! triggered still stops on its next poll.

use tokio::signal;
use tokio::sync::watch;

pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Get a receiver that observes the shutdown flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait for SIGTERM or SIGINT, then trigger shutdown.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        #[cfg(unix)]
        let terminate = terminate.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            result = ctrl_c => {
                result?;
                tracing::info!("received SIGINT, shutting down");
            }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
        }

        self.shutdown();
        Ok(())
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `rx` observes shutdown, or once the controller is gone.
pub async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    // An error means the sender was dropped, which also ends the node.
    let _ = rx.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn programmatic_shutdown_notifies_subscribers() {
        let controller = ShutdownController::new();
        let mut rx1 = controller.subscribe();
        let mut rx2 = controller.subscribe();
        controller.shutdown();
        wait_for_shutdown(&mut rx1).await;
        wait_for_shutdown(&mut rx2).await;
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_shutdown() {
        let controller = ShutdownController::new();
        controller.shutdown();
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut rx))
            .await
            .expect("late subscriber must not block");
    }

    #[tokio::test]
    async fn pending_until_triggered() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();
        let waited =
            tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut rx)).await;
        assert!(waited.is_err());
    }
}
