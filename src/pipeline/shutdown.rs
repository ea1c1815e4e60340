//! Graceful shutdown signaling
//!
//! Broadcast-based signal with a level-triggered flag: workers poll
//! the flag between sequence loads and select on the broadcast while
//! blocked on a channel push.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Shutdown signal broadcaster
pub struct ShutdownSignal {
    sender: Arc<broadcast::Sender<()>>,
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender: Arc::new(sender),
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    /// Cheap level-triggered check for polling between loads
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Create a new receiver for select-based waiting
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            flag: self.flag.clone(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());

        let mut receiver = signal.subscribe();
        let waiter = tokio::spawn(async move {
            let _ = receiver.recv().await;
            1
        });

        signal.shutdown();
        assert!(signal.is_shutdown());
        assert_eq!(waiter.await.unwrap(), 1);

        // Idempotent
        signal.shutdown();
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_flag_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        signal.shutdown();
        assert!(clone.is_shutdown());
    }
}
