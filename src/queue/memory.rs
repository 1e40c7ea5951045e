//! In-memory implementation of the list queue.
//!
//! Queues live in a concurrent map and waiters are woken directly by pushes,
//! so a blocking pop never polls. Primarily used for testing and development.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

use super::{Popped, QueueSource};

#[derive(Default)]
struct Slot {
    items: Mutex<VecDeque<Bytes>>,
    ready: Notify,
}

impl Slot {
    fn pop_front(&self) -> Option<Bytes> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let value = items.pop_front();
        if value.is_some() && !items.is_empty() {
            // Pass the wakeup on so another waiter sees the remaining items.
            self.ready.notify_one();
        }
        value
    }

    fn push_back(&self, value: Bytes) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(value);
        self.ready.notify_one();
    }

    fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Clone, Default)]
/// Thread-safe in-memory list queue.
///
/// Clones share the same underlying queues.
pub struct InMemoryQueue {
    queues: Arc<papaya::HashMap<String, Arc<Slot>>>,
}

impl InMemoryQueue {
    /// Creates a new instance with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, queue: &str) -> Arc<Slot> {
        self.queues
            .pin()
            .get_or_insert_with(queue.to_owned(), || Arc::new(Slot::default()))
            .clone()
    }
}

impl QueueSource for InMemoryQueue {
    fn blocking_pop<'a>(
        &'a self,
        queue: &'a str,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Popped, Error>> {
        Box::pin(async move {
            let slot = self.slot(queue);
            let deadline = Instant::now() + timeout;

            loop {
                if let Some(value) = slot.pop_front() {
                    return Ok(Popped::Value(value));
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(Popped::Cancelled),
                    woken = tokio::time::timeout_at(deadline, slot.ready.notified()) => {
                        if woken.is_err() {
                            return Ok(Popped::TimedOut);
                        }
                    }
                }
            }
        })
    }

    fn push<'a>(&'a self, queue: &'a str, value: Bytes) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.slot(queue).push_back(value);
            Ok(())
        })
    }

    fn len<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(async move { Ok(self.slot(queue).len() as u64) })
    }
}
