//! Document backend.
//!
//! [`DocumentDriver`] is the seam to a document database. Filters, update
//! documents and index specs use the native operator vocabulary (`$and`,
//! `$or`, `$set`, `$inc`, ...). Two drivers are bundled:
//! [`SqliteDocumentStore`] keeps documents in a file that every process of a
//! deployment can open, and [`MemoryDocumentStore`] keeps them in one
//! process for tests. [`DocumentAdapter`] maps entity operations onto any
//! driver.

mod adapter;
mod collection;
mod matcher;
mod memory;
mod sqlite;

pub use adapter::DocumentAdapter;
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use crate::meta::SortField;
use entidal_codec::{EntityValue, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for driver calls.
pub type DriverResult<T> = Result<T, DriverError>;

/// Native error code of a duplicate key violation.
pub const DUPLICATE_KEY_CODE: i32 = 11000;
/// Native error code of a malformed filter or update.
pub const BAD_VALUE_CODE: i32 = 2;
/// Native error code of a failure inside the store itself.
pub const INTERNAL_ERROR_CODE: i32 = 1;

/// An error reported by a document driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct DriverError {
    /// Native error code.
    pub code: i32,
    /// Native error text.
    pub message: String,
}

impl DriverError {
    /// Creates a bad value error.
    pub fn bad_value(message: impl Into<String>) -> Self {
        Self {
            code: BAD_VALUE_CODE,
            message: message.into(),
        }
    }
}

/// Cursor options of a native find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    /// Fields to return besides `_id`; empty returns everything.
    pub projection: Vec<String>,
    /// Sort keys.
    pub sort: Vec<SortField>,
    /// Documents to skip.
    pub skip: u64,
    /// Maximum documents to return.
    pub limit: Option<u64>,
}

/// A native index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Physical index name.
    pub name: String,
    /// Key fields.
    pub keys: Vec<SortField>,
    /// Uniqueness.
    pub unique: bool,
    /// Skip documents missing every key field.
    pub sparse: bool,
}

/// Native counts of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCount {
    /// Documents matched.
    pub matched: u64,
    /// Documents changed.
    pub modified: u64,
}

/// Connection to a document database.
///
/// Methods take native filter and update documents. Implementations are
/// shared across threads.
pub trait DocumentDriver: Send + Sync {
    /// Inserts one document and returns its `_id`, generating one if absent.
    ///
    /// # Errors
    ///
    /// Returns code [`DUPLICATE_KEY_CODE`] when a unique index rejects it.
    fn insert_one(&self, collection: &str, doc: EntityValue) -> DriverResult<Value>;

    /// Inserts documents in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns code [`DUPLICATE_KEY_CODE`] when a unique index rejects one.
    fn insert_many(&self, collection: &str, docs: Vec<EntityValue>) -> DriverResult<()>;

    /// Applies an update document (`$set`, `$unset`, `$inc`) to the first match.
    ///
    /// # Errors
    ///
    /// Fails on malformed filters or updates and on duplicate keys.
    fn update_one(&self, collection: &str, filter: &Value, update: &Value)
        -> DriverResult<UpdateCount>;

    /// Applies an update document to every match.
    ///
    /// # Errors
    ///
    /// Fails on malformed filters or updates and on duplicate keys.
    fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> DriverResult<UpdateCount>;

    /// Replaces the first match with `doc`, inserting it when nothing
    /// matches and `upsert` is set.
    ///
    /// # Errors
    ///
    /// Fails on malformed filters and on duplicate keys.
    fn replace_one(
        &self,
        collection: &str,
        filter: &Value,
        doc: EntityValue,
        upsert: bool,
    ) -> DriverResult<UpdateCount>;

    /// Deletes every match and returns the count.
    ///
    /// # Errors
    ///
    /// Fails on malformed filters.
    fn delete_many(&self, collection: &str, filter: &Value) -> DriverResult<u64>;

    /// Finds matching documents.
    ///
    /// # Errors
    ///
    /// Fails on malformed filters.
    fn find(&self, collection: &str, filter: &Value, spec: &FindSpec)
        -> DriverResult<Vec<EntityValue>>;

    /// Counts matching documents.
    ///
    /// # Errors
    ///
    /// Fails on malformed filters.
    fn count(&self, collection: &str, filter: &Value) -> DriverResult<u64>;

    /// Creates an index. Existing documents are checked against it.
    ///
    /// # Errors
    ///
    /// Returns code [`DUPLICATE_KEY_CODE`] when existing documents collide.
    fn create_index(&self, collection: &str, spec: &IndexSpec) -> DriverResult<()>;

    /// Names of the indexes on `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index list cannot be read.
    fn index_names(&self, collection: &str) -> DriverResult<Vec<String>>;
}
