//! Notification channel between transport callbacks and the dispatch loop
//!
//! USB transports report hotplug events from inside their own event
//! handling, where the logger state must not be touched. Callbacks push a
//! notification here; the dispatch loop drains the queue once control
//! returns to it, so every event is handled run-to-completion.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, unbounded};

/// Sending half, owned by the transport callback
#[derive(Debug)]
pub struct NotificationSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for NotificationSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> NotificationSender<T> {
    /// Queue a notification without blocking
    pub fn notify(&self, item: T) -> crate::Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => crate::Error::Channel("notification queue full".to_string()),
            TrySendError::Closed(_) => {
                crate::Error::Channel("notification receiver dropped".to_string())
            }
        })
    }
}

/// Receiving half, owned by the dispatch loop
#[derive(Debug)]
pub struct NotificationReceiver<T> {
    rx: Receiver<T>,
}

impl<T> NotificationReceiver<T> {
    /// Take the next queued notification, if any
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Take every queued notification in arrival order
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.rx.len());
        while let Some(item) = self.try_recv() {
            items.push(item);
        }
        items
    }

    /// Number of queued notifications
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create an unbounded notification channel
///
/// Returns (sender for the callback side, receiver for the dispatch loop)
pub fn notification_channel<T>() -> (NotificationSender<T>, NotificationReceiver<T>) {
    let (tx, rx) = unbounded();
    (NotificationSender { tx }, NotificationReceiver { rx })
}
