//! Graceful shutdown coordination.

use tokio::sync::watch;

/// Shutdown signal that can be cloned and awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    ///
    /// Returns immediately if shutdown was already triggered, and also when
    /// the coordinator is dropped.
    pub async fn recv(mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Shutdown coordinator that can send shutdown signals.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
