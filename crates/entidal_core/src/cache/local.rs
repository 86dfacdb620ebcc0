//! Process-local cache store.

use super::{is_under, CacheStore};
use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory [`CacheStore`] for single-process deployments.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: RwLock<BTreeMap<String, String>>,
}

impl LocalCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for LocalCache {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unset(&self, key: &str) -> CoreResult<()> {
        let mut entries = self.entries.write();
        // Keys below `key` sort right after it.
        let doomed: Vec<String> = entries
            .range(key.to_string()..)
            .take_while(|(k, _)| k.starts_with(key))
            .filter(|(k, _)| is_under(k, key))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            entries.remove(&k);
        }
        Ok(())
    }

    fn clear_all(&self) -> CoreResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}
