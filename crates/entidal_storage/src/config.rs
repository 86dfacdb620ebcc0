//! Store connection settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path value that selects a private in-memory SQLite database.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Scheme of the in-process document store.
pub const MEMORY_SCHEME: &str = "memory://";
/// Scheme of the file-backed document store; the rest is a file path.
pub const SQLITE_SCHEME: &str = "sqlite://";

/// A named document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStoreConfig {
    /// Store name referenced by `EntityMeta::db_name`.
    pub name: String,
    /// Connection string, `sqlite://<path>` or `memory://<db>`.
    pub url: String,
}

impl DocumentStoreConfig {
    /// Creates a store entry.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// An in-process store named `name`, visible to this process only.
    pub fn in_memory(name: impl Into<String>) -> Self {
        let name = name.into();
        let url = format!("{MEMORY_SCHEME}{name}");
        Self { name, url }
    }

    /// A store kept in the SQLite file at `path`.
    pub fn sqlite(name: impl Into<String>, path: impl AsRef<str>) -> Self {
        Self::new(name, format!("{SQLITE_SCHEME}{}", path.as_ref()))
    }

    /// Whether the documents live only in this process.
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with(MEMORY_SCHEME)
    }
}

/// A named relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalStoreConfig {
    /// Store name referenced by `EntityMeta::db_name`.
    pub name: String,
    /// Database file path, or `:memory:`.
    pub database: String,
    /// Number of pooled connections.
    #[serde(default = "default_pool_size", alias = "connectionLimit")]
    pub pool_size: usize,
    /// How long to wait for a connection or a lock.
    #[serde(default = "default_acquire_timeout", with = "millis")]
    pub acquire_timeout: Duration,
}

fn default_pool_size() -> usize {
    3
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

impl RelationalStoreConfig {
    /// Creates a store entry with default pool settings.
    pub fn new(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            pool_size: default_pool_size(),
            acquire_timeout: default_acquire_timeout(),
        }
    }

    /// A private in-memory database.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(name, MEMORY_DATABASE)
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Whether this is an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database == MEMORY_DATABASE
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
    fn relational_defaults() {
        let config: RelationalStoreConfig =
            serde_json::from_str(r#"{"name": "main", "database": "/tmp/app.db"}"#).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert!(!config.is_in_memory());
    }

    #[test]
    fn relational_aliases() {
        let config: RelationalStoreConfig = serde_json::from_str(
            r#"{"name": "r", "database": ":memory:", "connectionLimit": 8, "acquireTimeout": 250}"#,
        )
        .unwrap();
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert!(config.is_in_memory());
    }

    #[test]
    fn builders() {
        let config = RelationalStoreConfig::in_memory("x").pool_size(1);
        assert_eq!(config.pool_size, 1);
        assert_eq!(DocumentStoreConfig::in_memory("main").url, "memory://main");
        assert!(DocumentStoreConfig::in_memory("main").is_in_memory());
        let file = DocumentStoreConfig::sqlite("main", "/var/lib/app/docs.db");
        assert_eq!(file.url, "sqlite:///var/lib/app/docs.db");
        assert!(!file.is_in_memory());
    }
}
