//! Explicit cancellation signal for an in-flight execution.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation flag.
///
/// Any clone can trigger cancellation; the consumption loop races every pull
/// against [`CancelHandle::cancelled`], so a loop suspended on a silent source
/// returns as soon as the flag is set.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// Trigger cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once [`CancelHandle::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}
