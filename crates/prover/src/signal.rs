//! Process-wide cooperative shutdown flag.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared shutdown signal.
///
/// Cloning is cheap; every clone observes the same flag. The DAG engine
/// polls [`ShutdownSignal::is_shutdown_requested`] between checkpoints while
/// async tasks await [`ShutdownSignal::requested`].
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the signal. Idempotent.
    pub fn request_shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested (immediately if it already was).
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
