//! Cancellation capabilities and per-subscriber delivery queues.
//!
//! Every listener registration in the interop core hands back a
//! [`Subscription`]. Calling [`Subscription::unsubscribe`] more than once, or
//! after the resource behind it is gone, does nothing.
//!
//! Deliveries go through a [`Mailbox`]: one unbounded FIFO queue drained by a
//! single task that calls the handler serially. Whatever order messages are
//! enqueued in is the order the handler sees them.

use parking_lot::Mutex;
use tokio::sync::mpsc;

type Cancel = Box<dyn FnOnce() + Send>;

/// An idempotent unsubscribe/unregister capability.
///
/// Dropping a `Subscription` does not cancel it; call
/// [`unsubscribe`](Self::unsubscribe) explicitly.
pub struct Subscription {
    cancel: Mutex<Option<Cancel>>,
}

impl Subscription {
    /// Create a subscription that runs `cancel` on the first unsubscribe.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Cancel the subscription. Subsequent calls are no-ops.
    pub fn unsubscribe(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) has not been called yet.
    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Sending half of a delivery queue.
///
/// Sends never block. A send after the handler task has exited is dropped.
pub struct Mailbox<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> Mailbox<T> {
    /// Spawn a task that calls `handler` for every delivered message, in
    /// order. Must be called from within a tokio runtime.
    pub fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                handler(message);
            }
        });
        Self { tx }
    }

    /// Create a mailbox read through a receiver instead of a handler task.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a message. Returns false when the receiving side is gone.
    pub fn deliver(&self, message: T) -> bool {
        self.tx.send(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn unsubscribe_runs_cancel_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mailbox_delivers_in_order() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox::spawn(move |n: u32| {
            let _ = done_tx.send(n);
        });

        for n in 0..50 {
            assert!(mailbox.deliver(n));
        }

        for expected in 0..50 {
            let got = tokio::time::timeout(Duration::from_secs(1), done_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn channel_mailbox_rejects_after_receiver_drops() {
        let (mailbox, mut rx) = Mailbox::<u32>::channel();
        assert!(mailbox.deliver(1));
        assert_eq!(rx.recv().await, Some(1));
        drop(rx);
        assert!(!mailbox.deliver(2));
    }
}
