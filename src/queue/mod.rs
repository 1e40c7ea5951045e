//! List-queue capability consumed by the transfer workers.
//!
//! A [`QueueSource`] exposes a named set of FIFO lists with a blocking pop.
//! Implementations are shared by every worker and must tolerate concurrent
//! calls for different queue names.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryQueue;
pub use sqlite::SqliteQueue;

/// Outcome of a blocking pop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    /// An item was removed from the head of the queue.
    Value(Bytes),
    /// Nothing arrived before the timeout elapsed. Not an error.
    TimedOut,
    /// The cancellation token fired while waiting. Nothing was removed.
    Cancelled,
}

/// Core trait for list-queue backends.
///
/// Popping is destructive: once [`Popped::Value`] is returned the item is gone
/// from the queue, and there is no acknowledgement or requeue.
pub trait QueueSource: Send + Sync + 'static {
    /// Removes the item at the head of `queue`, waiting up to `timeout` for
    /// one to arrive.
    ///
    /// The wait must suspend rather than spin, and must not return
    /// [`Popped::TimedOut`] before `timeout` has elapsed. `cancel` is only
    /// observed while waiting: an item that has already been dequeued is
    /// always returned.
    fn blocking_pop<'a>(
        &'a self,
        queue: &'a str,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Popped, Error>>;

    /// Appends an item to the tail of `queue`.
    fn push<'a>(&'a self, queue: &'a str, value: Bytes) -> BoxFuture<'a, Result<(), Error>>;

    /// Returns the number of items waiting in `queue`.
    fn len<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<u64, Error>>;

    /// Verifies the backend is reachable.
    fn ping(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}
