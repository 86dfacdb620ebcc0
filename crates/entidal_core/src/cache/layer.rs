//! Memoization and invalidation on top of a [`CacheStore`].

use super::{cache_key, CacheStore, ENTITY_PART, ID_BUCKET, OTHER_BUCKET};
use crate::error::{CoreError, CoreResult};
use crate::events::{EntityEvent, EventKind};
use crate::stats::ServiceStats;
use entidal_codec::{from_envelope_str, to_envelope_string, Value};
use entidal_storage::EntityMeta;
use std::sync::Arc;
use tracing::{debug, warn};

/// The cache as seen by the access service.
///
/// Values are stored in their type-tagged envelope form, so every read
/// returns a fresh copy with the exact types that were stored. Store
/// failures never fail a read or a write; they are logged and counted.
#[derive(Debug, Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    stats: Arc<ServiceStats>,
}

impl CacheLayer {
    /// Wraps a store.
    pub fn new(store: Arc<dyn CacheStore>, stats: Arc<ServiceStats>) -> Self {
        Self { store, stats }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Reads a raw string.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get_string(&self, key: &str) -> CoreResult<Option<String>> {
        self.store.get(key)
    }

    /// Writes a raw string.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn set_string(&self, key: &str, value: &str) -> CoreResult<()> {
        self.store.set(key, value)
    }

    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or holds a malformed entry.
    pub fn get_value(&self, key: &str) -> CoreResult<Option<Value>> {
        match self.store.get(key)? {
            Some(text) => from_envelope_str(&text).map(Some).map_err(CoreError::cache),
            None => Ok(None),
        }
    }

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be encoded or the store fails.
    pub fn set_value(&self, key: &str, value: &Value) -> CoreResult<()> {
        let text = to_envelope_string(value).map_err(CoreError::cache)?;
        self.store.set(key, &text)
    }

    /// Removes the key made of `parts`, or, when `last_keys` is given, each
    /// `parts:<last>` key. Keys below a removed key go with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn unset<S: AsRef<str>>(&self, parts: &[S], last_keys: Option<&[String]>) -> CoreResult<()> {
        let prefix = cache_key(parts);
        match last_keys {
            Some(last_keys) => {
                for last in last_keys {
                    self.store.unset(&cache_key(&[prefix.as_str(), last.as_str()]))?;
                }
                Ok(())
            }
            None => self.store.unset(&prefix),
        }
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn clear_all(&self) -> CoreResult<()> {
        self.store.clear_all()
    }

    /// Returns the cached value under `parts`, computing and caching it on a
    /// miss.
    ///
    /// `None` results are not cached. Entities that opt out of the service
    /// cache always compute.
    ///
    /// # Errors
    ///
    /// Returns only errors of `compute`.
    pub fn with_cache<F>(&self, meta: &EntityMeta, parts: &[String], compute: F) -> CoreResult<Option<Value>>
    where
        F: FnOnce() -> CoreResult<Option<Value>>,
    {
        if meta.no_service_cache {
            return compute();
        }
        let key = cache_key(parts);
        match self.get_value(&key) {
            Ok(Some(value)) => {
                self.stats.record_cache_hit();
                debug!(key = %key, "cache hit");
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(err) => {
                self.stats.record_cache_error();
                warn!(key = %key, error = %err, "cache read failed");
            }
        }
        self.stats.record_cache_miss();
        let value = compute()?;
        if let Some(value) = &value {
            if let Err(err) = self.set_value(&key, value) {
                self.stats.record_cache_error();
                warn!(key = %key, error = %err, "cache write failed");
            }
        }
        Ok(value)
    }

    /// Drops every entry a change may have made stale.
    ///
    /// Every non-id read of the entity goes, and so do the id reads of the
    /// rows the event names. Updates and removals that name no rows drop
    /// every id read of the entity. Failures are logged and swallowed.
    pub fn invalidate(&self, event: &EntityEvent) {
        let entity = event.entity.as_str();
        let mut result = self.unset(&[ENTITY_PART, entity, OTHER_BUCKET], None);
        let id_keys: Option<Vec<String>> = event
            .ids
            .as_ref()
            .map(|ids| ids.iter().map(Value::to_key_string).collect());
        if id_keys.is_some() || event.kind != EventKind::Created {
            let by_id = self.unset(&[ENTITY_PART, entity, ID_BUCKET], id_keys.as_deref());
            result = result.and(by_id);
        }
        if let Err(err) = result {
            self.stats.record_cache_error();
            warn!(entity, kind = ?event.kind, error = %err, "cache invalidation failed");
        }
    }
}
