use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use sqlx::{
    sqlite::{
        SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode,
        SqlitePoolOptions,
    },
    SqlitePool,
};

use crate::{
    config::Config,
    error::Error,
    message::StoredDocument,
    queue::{QueueSource, SqliteQueue},
    store::{DocumentSink, SqliteStore},
    supervisor::WorkerSupervisor,
    worker::WorkerSettings,
};

/// The relay's two backend clients, connected and ready to be shared by the
/// workers.
pub struct Service {
    queue: Arc<SqliteQueue>,
    store: Arc<SqliteStore>,
    config: Config,
}

async fn open_pool(db_path: Option<&str>) -> Result<SqlitePool, sqlx::Error> {
    let opts = if let Some(path) = db_path {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
    } else {
        SqliteConnectOptions::new().in_memory(true)
    }
    .journal_mode(SqliteJournalMode::Wal)
    .locking_mode(SqliteLockingMode::Normal)
    .busy_timeout(Duration::from_secs(5))
    .optimize_on_close(true, None)
    .auto_vacuum(SqliteAutoVacuum::Full);

    let pool = if db_path.is_some() {
        SqlitePoolOptions::new()
    } else {
        // Every connection to `:memory:` is its own database.
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    };

    pool.connect_with(opts).await
}

/// Table setup failures at startup mean the backend is unusable.
fn connect_error(backend: &'static str) -> impl FnOnce(Error) -> Error {
    move |e| match e {
        Error::Sqlx { source } => Error::backend_connect(backend, source),
        other => other,
    }
}

impl Service {
    pub async fn connect() -> Result<Self, Error> {
        Self::connect_with(Config::default()).await
    }

    pub async fn connect_with(config: Config) -> Result<Self, Error> {
        let queue_pool = open_pool(config.queue.db_path.as_deref())
            .await
            .map_err(|e| Error::backend_connect("queue", e))?;
        let queue = SqliteQueue::new(queue_pool)
            .await
            .map_err(connect_error("queue"))?
            .with_poll_interval(config.queue.poll_interval());
        queue.ping().await?;
        tracing::info!(db_path = ?config.queue.db_path, "Connected to queue backend");

        let store_pool = open_pool(config.store.db_path.as_deref())
            .await
            .map_err(|e| Error::backend_connect("store", e))?;
        let store = SqliteStore::new(store_pool)
            .await
            .map_err(connect_error("store"))?;
        store.ping().await?;
        tracing::info!(db_path = ?config.store.db_path, "Connected to store backend");

        Ok(Self {
            queue: Arc::new(queue),
            store: Arc::new(store),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &SqliteQueue {
        &self.queue
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Appends a raw message to a queue, as a producer would.
    pub async fn enqueue(
        &self,
        queue: impl AsRef<str>,
        message: impl Into<Bytes>,
    ) -> Result<(), Error> {
        self.queue.push(queue.as_ref(), message.into()).await
    }

    pub async fn document(
        &self,
        collection: impl AsRef<str>,
        id: impl AsRef<str>,
    ) -> Result<Option<StoredDocument>, Error> {
        self.store.get(collection.as_ref(), id.as_ref()).await
    }

    /// Starts one worker per configured mapping.
    pub fn start(&self) -> WorkerSupervisor {
        WorkerSupervisor::start(
            &self.config.mappings,
            self.queue.clone(),
            self.store.clone(),
            WorkerSettings::from(&self.config.worker),
            self.config.dead_letter.clone(),
        )
    }
}
