//! Runtime configuration.

use crate::error::{CoreError, CoreResult};
use entidal_storage::{DocumentStoreConfig, RelationalStoreConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of the cross-process cache used in cluster mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedCacheConfig {
    /// Cache database file shared by every process.
    pub path: PathBuf,
    /// How often invalidation messages from other processes are polled.
    #[serde(default = "default_poll_interval", with = "millis")]
    pub poll_interval: Duration,
    /// How long published messages are kept.
    #[serde(default = "default_message_ttl", with = "millis")]
    pub message_ttl: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_message_ttl() -> Duration {
    Duration::from_secs(600)
}

impl SharedCacheConfig {
    /// Shared cache at `path` with default timings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: default_poll_interval(),
            message_ttl: default_message_ttl(),
        }
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how long messages are kept.
    #[must_use]
    pub const fn message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }
}

/// Configuration for opening a runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Named document stores.
    pub document_stores: Vec<DocumentStoreConfig>,

    /// Named relational stores.
    pub relational_stores: Vec<RelationalStoreConfig>,

    /// Use the shared cache and the cross-process bus instead of the
    /// process-local cache.
    pub cluster: bool,

    /// Shared cache settings; required when `cluster` is set.
    pub shared_cache: Option<SharedCacheConfig>,

    /// Page size used when a list call does not ask for one.
    pub default_page_size: u64,

    /// Largest page size a list call may ask for.
    pub max_page_size: u64,

    /// Largest page size of history listings.
    pub max_history_page_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            document_stores: Vec::new(),
            relational_stores: Vec::new(),
            cluster: false,
            shared_cache: None,
            default_page_size: 20,
            max_page_size: 200,
            max_history_page_size: 100,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))
    }

    /// Adds a document store.
    #[must_use]
    pub fn document_store(mut self, store: DocumentStoreConfig) -> Self {
        self.document_stores.push(store);
        self
    }

    /// Adds a relational store.
    #[must_use]
    pub fn relational_store(mut self, store: RelationalStoreConfig) -> Self {
        self.relational_stores.push(store);
        self
    }

    /// Switches to cluster mode with the given shared cache.
    #[must_use]
    pub fn cluster(mut self, shared_cache: SharedCacheConfig) -> Self {
        self.cluster = true;
        self.shared_cache = Some(shared_cache);
        self
    }

    /// Sets the default page size.
    #[must_use]
    pub const fn default_page_size(mut self, size: u64) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the maximum page size.
    #[must_use]
    pub const fn max_page_size(mut self, size: u64) -> Self {
        self.max_page_size = size;
        self
    }

    /// Checks settings that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns an error for cluster mode without a shared cache or for
    /// inconsistent page sizes.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cluster && self.shared_cache.is_none() {
            return Err(CoreError::config("cluster mode needs a shared cache"));
        }
        if self.cluster {
            if let Some(store) = self.document_stores.iter().find(|s| s.is_in_memory()) {
                return Err(CoreError::config(format!(
                    "cluster mode cannot use the process-local document store {}",
                    store.name
                )));
            }
            if let Some(store) = self.relational_stores.iter().find(|s| s.is_in_memory()) {
                return Err(CoreError::config(format!(
                    "cluster mode cannot use the in-memory relational store {}",
                    store.name
                )));
            }
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(CoreError::config(
                "default page size must be between 1 and the max page size",
            ));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(!config.cluster);
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .document_store(DocumentStoreConfig::in_memory("main"))
            .relational_store(RelationalStoreConfig::in_memory("main"))
            .cluster(SharedCacheConfig::new("/tmp/cache.db").poll_interval(Duration::from_millis(50)))
            .max_page_size(50);

        assert!(config.cluster);
        assert_eq!(config.document_stores.len(), 1);
        assert_eq!(config.max_page_size, 50);
        assert_eq!(
            config.shared_cache.unwrap().poll_interval,
            Duration::from_millis(50)
        );
    }

    #[test]
    fn cluster_needs_shared_cache() {
        let config = Config {
            cluster: true,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn parses_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "documentStores": [{"name": "main", "url": "sqlite:///srv/app/docs.db"}],
                "relationalStores": [{"name": "main", "database": "/srv/app/rows.db", "connectionLimit": 2}],
                "sharedCache": {"path": "cache.db", "pollInterval": 100},
                "cluster": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.relational_stores[0].pool_size, 2);
        assert_eq!(
            config.shared_cache.as_ref().unwrap().poll_interval,
            Duration::from_millis(100)
        );
        assert_eq!(config.default_page_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cluster_rejects_process_local_stores() {
        let cluster = Config::new().cluster(SharedCacheConfig::new("/tmp/cache.db"));
        let memory_docs = cluster
            .clone()
            .document_store(DocumentStoreConfig::in_memory("main"));
        let err = memory_docs.validate().unwrap_err();
        assert!(err.to_string().contains("process-local document store main"));

        let memory_rows = cluster
            .clone()
            .relational_store(RelationalStoreConfig::in_memory("main"));
        assert!(matches!(memory_rows.validate(), Err(CoreError::Config { .. })));

        let shared = cluster
            .document_store(DocumentStoreConfig::sqlite("main", "/tmp/docs.db"))
            .relational_store(RelationalStoreConfig::new("main", "/tmp/rows.db"));
        assert!(shared.validate().is_ok());
    }
}
