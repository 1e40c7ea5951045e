//! SQLite-backed implementation of the document store.
//!
//! All collections share one table keyed by `(collection, id)`. Payloads are
//! stored as JSON text. An upsert is a single `INSERT ... ON CONFLICT DO
//! UPDATE` statement, so a failed write never leaves a half-replaced document.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use snafu::ResultExt;
use sqlx::SqlitePool;

use crate::{
    error::{Error, SerializeSnafu},
    message::{DocumentHandle, Payload, Record, StoredDocument},
};

use super::DocumentSink;

/// A document store kept in SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    payload: String,
    timestamp: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self, collection: &str) -> Result<StoredDocument, Error> {
        let payload = Payload::from_json(self.payload.as_bytes()).context(SerializeSnafu {
            collection,
            id: self.id.as_str(),
        })?;

        Ok(StoredDocument {
            id: self.id,
            record: Record {
                payload,
                timestamp: self.timestamp,
            },
        })
    }
}

impl SqliteStore {
    /// Creates a new SQLite-backed store.
    ///
    /// This method will create the required table if it doesn't exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, Error> {
        sqlx::query(
            "
            CREATE TABLE IF NOT EXISTS docrelay_documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp TEXT NOT NULL,

                PRIMARY KEY (collection, id)
            )
            ",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Lists the documents in `collection`, ordered by id.
    pub async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>, Error> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, payload, timestamp FROM docrelay_documents WHERE collection = $1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_document(collection))
            .collect()
    }
}

impl DocumentSink for SqliteStore {
    fn upsert<'a>(
        &'a self,
        collection: &'a str,
        key: &'a str,
        record: Record,
    ) -> BoxFuture<'a, Result<DocumentHandle, Error>> {
        Box::pin(async move {
            let payload = record
                .payload
                .to_json()
                .context(SerializeSnafu { collection, id: key })?;

            sqlx::query(
                "
                INSERT INTO docrelay_documents (collection, id, payload, timestamp)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (collection, id) DO UPDATE
                SET payload = excluded.payload, timestamp = excluded.timestamp
                ",
            )
            .bind(collection)
            .bind(key)
            .bind(payload)
            .bind(record.timestamp)
            .execute(&self.pool)
            .await?;

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
            let row: Option<DocumentRow> = sqlx::query_as(
                "SELECT id, payload, timestamp FROM docrelay_documents WHERE collection = $1 AND id = $2",
            )
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

            row.map(|row| row.into_document(collection)).transpose()
        })
    }

    fn count<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(async move {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM docrelay_documents WHERE collection = $1")
                    .bind(collection)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count as u64)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| Error::backend_connect("store", e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::message::Payload;

    use super::*;

    async fn store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_overwrites_payload_and_timestamp() {
        let store = store().await;

        let first = Record::received(Payload::decode(br#"{"v":1}"#).unwrap());
        store.upsert("c", "k", first).await.unwrap();

        let second = Record::received(Payload::decode(br#"{"v":2}"#).unwrap());
        store.upsert("c", "k", second.clone()).await.unwrap();

        let docs = store.list("c").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].record, second);
    }

    #[tokio::test]
    async fn keys_are_scoped_to_their_collection() {
        let store = store().await;
        let record = Record::received(Payload::Bool(true));

        store.upsert("a", "k", record.clone()).await.unwrap();
        store.upsert("b", "k", record).await.unwrap();

        assert_eq!(store.count("a").await.unwrap(), 1);
        assert_eq!(store.count("b").await.unwrap(), 1);
        assert!(store.get("c", "k").await.unwrap().is_none());
    }
}
