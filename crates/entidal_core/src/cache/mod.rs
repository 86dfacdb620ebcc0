//! Read-through cache.
//!
//! The cache is a flat key-value space of strings. Keys are built from
//! parts joined with `:`, so unsetting a key also unsets every key below it:
//!
//! ```text
//! Entity:<name>:Id:<id>:<signature>     reads by primary key
//! Entity:<name>:Other:<signature>       every other read
//! ```
//!
//! Two [`CacheStore`] backends exist. [`LocalCache`] lives in the process;
//! [`SharedCache`] lives in a database file every process of a cluster opens,
//! and also carries the [`Bus`] that spreads entity events between them.

mod bus;
mod layer;
mod local;
mod shared;

pub use bus::Bus;
pub use layer::CacheLayer;
pub use local::LocalCache;
pub use shared::SharedCache;

use crate::error::CoreResult;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Key separator.
pub const KEY_SEPARATOR: char = ':';

/// First part of every entity key.
pub const ENTITY_PART: &str = "Entity";
/// Bucket of reads by primary key.
pub const ID_BUCKET: &str = "Id";
/// Bucket of every other read.
pub const OTHER_BUCKET: &str = "Other";

/// A key-value store for cached reads.
///
/// `unset` is hierarchical: removing `a:b` also removes `a:b:c` but not
/// `a:bc`. Removing a missing key is not an error.
pub trait CacheStore: Send + Sync + std::fmt::Debug {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Writes a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn set(&self, key: &str, value: &str) -> CoreResult<()>;

    /// Removes `key` and every key below it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn unset(&self, key: &str) -> CoreResult<()>;

    /// Removes every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn clear_all(&self) -> CoreResult<()>;
}

/// Joins key parts.
pub fn cache_key<S: AsRef<str>>(parts: &[S]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part.as_ref());
    }
    key
}

/// Whether `key` is `prefix` or lies below it.
pub(crate) fn is_under(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(KEY_SEPARATOR))
}

/// Stable signature of a query shape.
///
/// Object keys are sorted before hashing, so equal shapes always give the
/// same signature.
pub fn signature(shape: &serde_json::Value) -> String {
    let digest = Sha256::digest(shape.to_string().as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_join_parts() {
        assert_eq!(cache_key(&["Entity", "User", "Id", "1"]), "Entity:User:Id:1");
        assert_eq!(cache_key::<&str>(&[]), "");
    }

    #[test]
    fn hierarchy_respects_separator() {
        assert!(is_under("Entity:User", "Entity:User"));
        assert!(is_under("Entity:User:Id:1", "Entity:User"));
        assert!(!is_under("Entity:Users:Id:1", "Entity:User"));
        assert!(!is_under("Entity", "Entity:User"));
    }

    #[test]
    fn signature_ignores_key_order() {
        let a = signature(&json!({"pageNo": 1, "criteria": {"field": "a"}}));
        let b = signature(&json!({"criteria": {"field": "a"}, "pageNo": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, signature(&json!({"pageNo": 2, "criteria": {"field": "a"}})));
    }
}
