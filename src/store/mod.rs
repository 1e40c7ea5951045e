//! Document store capability.
//!
//! A [`DocumentSink`] holds named collections of JSON records addressed by a
//! caller-supplied key. Writes replace by key, which is what makes relaying
//! the same message twice harmless.

use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    message::{DocumentHandle, Record, StoredDocument},
};

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Core trait for document store backends.
///
/// Implementations are shared by all workers and must tolerate concurrent
/// writes to different collections.
pub trait DocumentSink: Send + Sync + 'static {
    /// Stores `record` under `key` in `collection`, replacing any existing
    /// document with that key.
    ///
    /// Repeating the call with the same key and content leaves exactly one
    /// document. On failure the previous document, if any, is left untouched.
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        record: Record,
    ) -> BoxFuture<'a, Result<DocumentHandle, Error>>;

    /// Reads a single document.
    fn get<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredDocument>, Error>>;

    /// Returns the number of documents in `collection`.
    fn count<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<u64, Error>>;

    /// Verifies the backend is reachable.
    fn ping(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}
