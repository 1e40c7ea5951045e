use std::{collections::HashSet, fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::{
    dead_letter::DeadLetterPolicy,
    error::{ConfigParseSnafu, ConfigReadSnafu, Error},
    queue::sqlite::DEFAULT_POLL_INTERVAL,
};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// One source queue relayed into one target collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mapping {
    pub source: String,
    pub target: String,
}

impl Mapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// SQLite file holding the queues. `None` uses an in-memory database.
    pub db_path: Option<String>,
    pub poll_interval_ms: Option<u64>,
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file holding the collections. `None` uses an in-memory database.
    pub db_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub poll_timeout_secs: u64,
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 5,
            error_backoff_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub worker: WorkerConfig,
    pub dead_letter: DeadLetterPolicy,
    pub mappings: Vec<Mapping>,
}

/// Settings taken from `DOCRELAY_*` environment variables.
///
/// Paths set here win over the ones in the config file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EnvOverrides {
    pub config_path: Option<String>,
    pub queue_db_path: Option<String>,
    pub store_db_path: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, Error> {
        Ok(envy::prefixed("DOCRELAY_").from_env::<Self>()?)
    }
}

impl Config {
    /// Loads the config file named by the environment, applies environment
    /// overrides and validates the result.
    pub fn load() -> Result<Self, Error> {
        let overrides = EnvOverrides::from_env()?;
        let path = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());

        let mut config = Self::from_file(&path)?;
        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).context(ConfigReadSnafu {
            path: path.display().to_string(),
        })?;

        serde_yaml::from_str(&raw).context(ConfigParseSnafu {
            path: path.display().to_string(),
        })
    }

    pub fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(path) = overrides.queue_db_path {
            self.queue.db_path = Some(path);
        }
        if let Some(path) = overrides.store_db_path {
            self.store.db_path = Some(path);
        }
    }

    /// Rejects configurations the workers cannot run safely.
    pub fn validate(&self) -> Result<(), Error> {
        if self.worker.poll_timeout_secs == 0 {
            return Err(Error::invalid_config("worker.poll_timeout_secs must be positive"));
        }
        // A zero backoff spins on a persistently failing queue.
        if self.worker.error_backoff_ms == 0 {
            return Err(Error::invalid_config("worker.error_backoff_ms must be positive"));
        }

        let mut sources = HashSet::new();
        for (idx, mapping) in self.mappings.iter().enumerate() {
            if mapping.source.is_empty() {
                return Err(Error::invalid_config(format!(
                    "mapping {idx} has an empty source"
                )));
            }
            if mapping.target.is_empty() {
                return Err(Error::invalid_config(format!(
                    "mapping {idx} has an empty target"
                )));
            }
            // Each queue is drained by exactly one worker.
            if !sources.insert(mapping.source.as_str()) {
                return Err(Error::invalid_config(format!(
                    "queue {} is mapped more than once",
                    mapping.source
                )));
            }
        }

        if let DeadLetterPolicy::Queue { queue } = &self.dead_letter {
            if queue.is_empty() {
                return Err(Error::invalid_config("dead_letter.queue must not be empty"));
            }
            if sources.contains(queue.as_str()) {
                return Err(Error::invalid_config(format!(
                    "dead-letter queue {queue} is also a mapped source"
                )));
            }
        }

        Ok(())
    }
}
