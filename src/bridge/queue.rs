//! Bounded hand-off queue with an observable closed state.
//!
//! Each connection owns three of these (eval, pending-result, read). Closing a
//! queue is the only way to cancel a task blocked on it:
//! - `push` after close hands the item back
//! - `take` keeps returning buffered items after close, then `Recv::Closed`

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of every per-connection queue.
///
/// Large enough that the double-submit exchange never blocks the router.
pub(crate) const QUEUE_CAPACITY: usize = 32;

/// Outcome of taking from a queue.
#[derive(Debug, PartialEq)]
pub(crate) enum Recv<T> {
    Item(T),
    /// The queue was closed and every buffered item has been taken.
    Closed,
}

pub(crate) struct Queue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
    closed: CancellationToken,
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Queue<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self::with_capacity(name, QUEUE_CAPACITY)
    }

    pub(crate) fn with_capacity(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Push an item, waiting for a free slot.
    ///
    /// Returns the item back as `Err` if the queue is (or becomes) closed.
    pub(crate) async fn push(&self, item: T) -> Result<(), T> {
        if self.closed.is_cancelled() {
            return Err(item);
        }
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            permit = self.tx.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => {
                permit.send(item);
                Ok(())
            }
            None => Err(item),
        }
    }

    /// Take the next item, waiting until one arrives or the queue closes.
    ///
    /// Cancel safe: dropping the future never loses an item.
    pub(crate) async fn take(&self) -> Recv<T> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => return item.map_or(Recv::Closed, Recv::Item),
            _ = self.closed.cancelled() => {}
        }
        match rx.try_recv() {
            Ok(item) => Recv::Item(item),
            Err(_) => Recv::Closed,
        }
    }

    /// Close the queue. Idempotent.
    pub(crate) fn close(&self) {
        if !self.closed.is_cancelled() {
            log::trace!(target: "conjure::bridge", "Closing {} queue", self.name);
        }
        self.closed.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn items_are_taken_in_push_order() {
        let queue = Queue::new("test");
        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();

        assert_eq!(queue.take().await, Recv::Item(1));
        assert_eq!(queue.take().await, Recv::Item(2));
    }

    #[tokio::test]
    async fn buffered_items_drain_before_closed() {
        let queue = Queue::new("test");
        queue.push("a").await.unwrap();
        queue.close();

        assert_eq!(queue.take().await, Recv::Item("a"));
        assert_eq!(queue.take().await, Recv::Closed);
        assert_eq!(queue.take().await, Recv::Closed);
    }

    #[tokio::test]
    async fn push_after_close_returns_item() {
        let queue = Queue::new("test");
        queue.close();
        assert_eq!(queue.push(7).await, Err(7));
        assert!(queue.is_closed());
    }

    #[test]
    fn take_is_pending_until_push_or_close() {
        let queue: Queue<u8> = Queue::new("test");
        let mut take = task::spawn(queue.take());
        assert_pending!(take.poll());

        queue.close();
        assert!(take.is_woken());
        assert_ready_eq!(take.poll(), Recv::Closed);
    }

    #[tokio::test]
    async fn close_unblocks_a_waiting_taker() {
        let queue: Arc<Queue<u8>> = Arc::new(Queue::new("test"));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.take().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("taker should be released")
            .unwrap();
        assert_eq!(result, Recv::Closed);
    }

    #[tokio::test]
    async fn close_unblocks_a_pusher_waiting_for_capacity() {
        let queue = Arc::new(Queue::with_capacity("test", 1));
        queue.push(1).await.unwrap();

        let pusher = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), pusher)
            .await
            .expect("pusher should be released")
            .unwrap();
        assert_eq!(result, Err(2));
    }
}
