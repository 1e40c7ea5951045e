//! SQLite-backed implementation of the list queue.
//!
//! Items are rows in a single table, ordered by an autoincrement id within
//! each named queue. A pop is one `DELETE ... RETURNING` statement, so an item
//! is either fully removed and returned or left in place.
//!
//! SQLite has no blocking list primitive. Waiting is done by sleeping for one
//! poll interval between attempts; pushes made through the same instance wake
//! waiters early.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use sqlx::SqlitePool;
use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

use super::{Popped, QueueSource};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A list queue stored in SQLite.
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    poll_interval: Duration,
    wakeups: Arc<papaya::HashMap<String, Arc<Notify>>>,
}

impl SqliteQueue {
    /// Creates a new SQLite-backed queue.
    ///
    /// This method will create the required table if it doesn't exist.
    pub async fn new(pool: SqlitePool) -> Result<Self, Error> {
        sqlx::query(
            "
            CREATE TABLE IF NOT EXISTS docrelay_list_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                body BLOB NOT NULL,
                enqueued_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            ",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "
            CREATE INDEX IF NOT EXISTS docrelay_list_items_queue
            ON docrelay_list_items (queue, id)
            ",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wakeups: Arc::new(papaya::HashMap::new()),
        })
    }

    /// Sets how long a blocking pop sleeps between attempts.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    fn wakeup(&self, queue: &str) -> Arc<Notify> {
        self.wakeups
            .pin()
            .get_or_insert_with(queue.to_owned(), || Arc::new(Notify::new()))
            .clone()
    }

    /// Removes and returns the head of `queue` without waiting.
    pub async fn try_pop(&self, queue: &str) -> Result<Option<Bytes>, Error> {
        let body: Option<Vec<u8>> = sqlx::query_scalar(
            "
            DELETE FROM docrelay_list_items
            WHERE id = (
                SELECT id FROM docrelay_list_items
                WHERE queue = $1
                ORDER BY id
                LIMIT 1
            )
            RETURNING body
            ",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(body.map(Bytes::from))
    }
}

impl QueueSource for SqliteQueue {
    fn blocking_pop<'a>(
        &'a self,
        queue: &'a str,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Popped, Error>> {
        Box::pin(async move {
            let wakeup = self.wakeup(queue);
            let deadline = Instant::now() + timeout;

            loop {
                // Register before checking so a push in between still wakes us.
                let notified = wakeup.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(value) = self.try_pop(queue).await? {
                    return Ok(Popped::Value(value));
                }

                let now = Instant::now();
                if now >= deadline {
                    return Ok(Popped::TimedOut);
                }
                let nap = self.poll_interval.min(deadline - now);

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(Popped::Cancelled),
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(nap) => {}
                }
            }
        })
    }

    fn push<'a>(&'a self, queue: &'a str, value: Bytes) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            sqlx::query("INSERT INTO docrelay_list_items (queue, body) VALUES ($1, $2)")
                .bind(queue)
                .bind(value.as_ref())
                .execute(&self.pool)
                .await?;

            self.wakeup(queue).notify_waiters();

            Ok(())
        })
    }

    fn len<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<u64, Error>> {
        Box::pin(async move {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM docrelay_list_items WHERE queue = $1")
                    .bind(queue)
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
                .map_err(|e| Error::backend_connect("queue", e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn queue() -> SqliteQueue {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteQueue::new(pool)
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn try_pop_takes_the_oldest_item() {
        let queue = queue().await;
        queue.push("q", Bytes::from_static(b"first")).await.unwrap();
        queue.push("q", Bytes::from_static(b"second")).await.unwrap();
        queue.push("other", Bytes::from_static(b"x")).await.unwrap();

        assert_eq!(
            queue.try_pop("q").await.unwrap(),
            Some(Bytes::from_static(b"first"))
        );
        assert_eq!(queue.len("q").await.unwrap(), 1);
        assert_eq!(queue.len("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn try_pop_on_empty_queue_returns_none() {
        let queue = queue().await;
        assert_eq!(queue.try_pop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let queue = queue().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let popped = queue
            .blocking_pop("q", Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert_eq!(popped, Popped::Cancelled);
    }

    #[tokio::test]
    async fn pending_item_wins_over_cancellation() {
        let queue = queue().await;
        let cancel = CancellationToken::new();
        queue.push("q", Bytes::from_static(b"ready")).await.unwrap();
        cancel.cancel();

        let popped = queue
            .blocking_pop("q", Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert_eq!(popped, Popped::Value(Bytes::from_static(b"ready")));
    }
}
