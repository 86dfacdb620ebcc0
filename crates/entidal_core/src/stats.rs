//! Service statistics.
//!
//! Counts façade calls, cache hits and misses, and the queries that reach a
//! store. Per-entity counters record which entities and actions are hot so
//! missing indexes and cache opt-outs can be spotted.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Service statistics and metrics.
///
/// All counters are atomic and can be read while calls are in progress.
#[derive(Debug, Default)]
pub struct ServiceStats {
    /// Façade calls.
    service_calls: AtomicU64,
    /// Reads served from the cache.
    cache_hits: AtomicU64,
    /// Reads that had to query a store.
    cache_misses: AtomicU64,
    /// Queries issued to a store.
    store_queries: AtomicU64,
    /// Writes issued to a store.
    writes: AtomicU64,
    /// Cache or bus failures that were swallowed.
    cache_errors: AtomicU64,
    /// Calls that returned an error.
    errors: AtomicU64,
    /// Façade calls by entity, then action.
    service_trace: Mutex<BTreeMap<String, BTreeMap<String, u64>>>,
    /// Store queries by entity, then action.
    store_trace: Mutex<BTreeMap<String, BTreeMap<String, u64>>>,
}

/// Point-in-time copy of [`ServiceStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Façade calls.
    pub service_calls: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Store queries.
    pub store_queries: u64,
    /// Store writes.
    pub writes: u64,
    /// Swallowed cache failures.
    pub cache_errors: u64,
    /// Failed calls.
    pub errors: u64,
    /// Façade calls by entity and action.
    pub service_trace: BTreeMap<String, BTreeMap<String, u64>>,
    /// Store queries by entity and action.
    pub store_trace: BTreeMap<String, BTreeMap<String, u64>>,
}

fn bump(trace: &Mutex<BTreeMap<String, BTreeMap<String, u64>>>, entity: &str, action: &str) {
    let mut trace = trace.lock();
    *trace
        .entry(entity.to_string())
        .or_default()
        .entry(action.to_string())
        .or_default() += 1;
}

impl ServiceStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_call(&self, entity: &str, action: &str) {
        self.service_calls.fetch_add(1, Ordering::Relaxed);
        bump(&self.service_trace, entity, action);
    }

    pub(crate) fn record_query(&self, entity: &str, action: &str) {
        self.store_queries.fetch_add(1, Ordering::Relaxed);
        bump(&self.store_trace, entity, action);
    }

    pub(crate) fn record_write(&self, entity: &str, action: &str) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        bump(&self.store_trace, entity, action);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of façade calls.
    pub fn service_calls(&self) -> u64 {
        self.service_calls.load(Ordering::Relaxed)
    }

    /// Returns the number of reads served from the cache.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of reads that missed the cache.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Returns the number of store queries.
    pub fn store_queries(&self) -> u64 {
        self.store_queries.load(Ordering::Relaxed)
    }

    /// Returns the number of store writes.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of swallowed cache failures.
    pub fn cache_errors(&self) -> u64 {
        self.cache_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of failed calls.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Cache hit ratio between 0 and 1, or `None` before the first read.
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let hits = self.cache_hits();
        let total = hits + self.cache_misses();
        (total > 0).then(|| hits as f64 / total as f64)
    }

    /// Copies every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            service_calls: self.service_calls(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            store_queries: self.store_queries(),
            writes: self.writes(),
            cache_errors: self.cache_errors(),
            errors: self.errors(),
            service_trace: self.service_trace.lock().clone(),
            store_trace: self.store_trace.lock().clone(),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.service_calls,
            &self.cache_hits,
            &self.cache_misses,
            &self.store_queries,
            &self.writes,
            &self.cache_errors,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.service_trace.lock().clear();
        self.store_trace.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_traces() {
        let stats = ServiceStats::new();
        stats.record_call("User", "list");
        stats.record_call("User", "list");
        stats.record_query("User", "findPage");
        stats.record_cache_miss();
        stats.record_cache_hit();
        stats.record_cache_hit();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.service_calls, 2);
        assert_eq!(snapshot.service_trace["User"]["list"], 2);
        assert_eq!(snapshot.store_trace["User"]["findPage"], 1);
        let ratio = stats.cache_hit_ratio().unwrap();
        assert!((ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_everything() {
        let stats = ServiceStats::new();
        assert!(stats.cache_hit_ratio().is_none());
        stats.record_write("User", "insert");
        stats.record_error();
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
