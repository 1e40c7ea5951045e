//! In-memory implementation of the document store.
//!
//! Primarily used for testing and development environments.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    message::{DocumentHandle, Record, StoredDocument},
};

use super::DocumentSink;

type Collection = papaya::HashMap<String, Record>;

#[derive(Clone, Default)]
/// Thread-safe in-memory document store.
///
/// Clones share the same underlying collections.
pub struct InMemoryStore {
    collections: Arc<papaya::HashMap<String, Arc<Collection>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<Collection> {
        self.collections
            .pin()
            .get_or_insert_with(name.to_owned(), || Arc::new(Collection::new()))
            .clone()
    }

    /// Returns every document in `collection`, in no particular order.
    pub fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.collection(collection)
            .pin()
            .iter()
            .map(|(id, record)| StoredDocument {
                id: id.clone(),
                record: record.clone(),
            })
            .collect()
    }
}

impl DocumentSink for InMemoryStore {
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        record: Record,
    ) -> BoxFuture<'a, Result<DocumentHandle, Error>> {
        Box::pin(async move {
            self.collection(collection)
                .pin()
                .insert(key.to_owned(), record);

            Ok(DocumentHandle {
                collection: collection.to_owned(),
                id: key.to_owned(),
            })
        })
    }

    fn get<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredDocument>, Error>> {
        Box::pin(async move {
            Ok(self
                .collection(collection)
                .pin()
                .get(key)
                .map(|record| StoredDocument {
                    id: key.to_owned(),
                    record: record.clone(),
                }))
        })
    }

    fn count<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(async move { Ok(self.collection(collection).len() as u64) })
    }
}

#[cfg(test)]
mod tests {
    use crate::message::Payload;

    use super::*;

    #[tokio::test]
    async fn upsert_replaces_by_key() {
        let store = InMemoryStore::new();
        let record = Record::received(Payload::decode(br#"{"a":1}"#).unwrap());

        store.upsert("c1", "k", record.clone()).await.unwrap();
        store.upsert("c1", "k", record.clone()).await.unwrap();

        assert_eq!(store.count("c1").await.unwrap(), 1);
        let stored = store.get("c1", "k").await.unwrap().unwrap();
        assert_eq!(stored.record, record);
    }

    #[tokio::test]
    async fn collections_are_disjoint() {
        let store = InMemoryStore::new();
        let record = Record::received(Payload::Null);

        store.upsert("c1", "k", record).await.unwrap();

        assert_eq!(store.count("c2").await.unwrap(), 0);
        assert!(store.get("c2", "k").await.unwrap().is_none());
    }
}
