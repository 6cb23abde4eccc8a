//! Fire-and-forget notification channel between execution contexts
//!
//! The producing context pushes messages without blocking; the owning context
//! drains them in FIFO order when it runs.

use crate::InterfaceError;
use tokio::sync::mpsc;

/// Create a connected sender/receiver pair
pub fn notification_channel<T>() -> (NotificationSender<T>, NotificationReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationSender { tx }, NotificationReceiver { rx })
}

#[derive(Debug)]
pub struct NotificationSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> Clone for NotificationSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> NotificationSender<T> {
    pub fn send(&self, msg: T) -> Result<(), InterfaceError> {
        self.tx.send(msg).map_err(|_| InterfaceError::ChannelClosed)
    }
}

#[derive(Debug)]
pub struct NotificationReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> NotificationReceiver<T> {
    /// Take the next pending message without waiting
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Take all pending messages
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next message. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_fifo_order() {
        let (tx, mut rx) = notification_channel();
        tx.send(1).unwrap();
        tx.clone().send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(rx.drain(), vec![1, 2, 3]);
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = notification_channel::<u8>();
        drop(rx);
        assert_eq!(tx.send(1), Err(InterfaceError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_recv_across_tasks() {
        let (tx, mut rx) = notification_channel();
        tokio::spawn(async move {
            tx.send("status").unwrap();
        });
        assert_eq!(rx.recv().await, Some("status"));
        assert_eq!(rx.recv().await, None);
    }
}
