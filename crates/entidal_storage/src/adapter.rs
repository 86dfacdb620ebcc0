//! The capability set every storage backend implements.

use crate::criteria::Criteria;
use crate::error::StorageResult;
use crate::meta::{Backend, EntityMeta, Repo, SortField};
use entidal_codec::{EntityValue, Value};
use serde::{Deserialize, Serialize};

/// Options of a single-row read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    /// Table to read from.
    #[serde(default)]
    pub repo: Repo,
    /// Projection; empty means every field.
    #[serde(default)]
    pub included_fields: Vec<String>,
}

/// A page read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageQuery {
    /// Filter.
    pub criteria: Criteria,
    /// Sort keys in priority order.
    pub sort: Vec<SortField>,
    /// Projection; empty means every field.
    pub included_fields: Vec<String>,
    /// Table to read from.
    pub repo: Repo,
    /// Rows to skip.
    pub skip: u64,
    /// Maximum rows to return; `None` returns every match.
    pub limit: Option<u64>,
    /// Skip the count query.
    pub without_total: bool,
}

/// Rows of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Matching rows.
    pub rows: Vec<EntityValue>,
    /// Total matches, unless the caller opted out.
    pub total: Option<u64>,
}

/// Outcome of an update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// Rows matched by the criteria.
    pub matched_count: u64,
    /// Rows changed.
    pub modified_count: u64,
}

/// What additive schema sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    /// Tables created.
    pub created_tables: Vec<String>,
    /// Columns added, as `table.column`.
    pub added_columns: Vec<String>,
    /// Indexes created, by physical name.
    pub created_indexes: Vec<String>,
}

impl SchemaReport {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created_tables.is_empty()
            && self.added_columns.is_empty()
            && self.created_indexes.is_empty()
    }

    /// Appends another report.
    pub fn merge(&mut self, other: SchemaReport) {
        self.created_tables.extend(other.created_tables);
        self.added_columns.extend(other.added_columns);
        self.created_indexes.extend(other.created_indexes);
    }
}

/// One backend family's implementation of entity persistence.
///
/// Implementations own their connection handling and classify native
/// duplicate key errors into [`crate::StorageError::DuplicateKey`]. Every
/// update increments `_version` by one. Removal and update honor the
/// entity's [`crate::RemoveMode`].
pub trait StorageAdapter: Send + Sync {
    /// Backend family served.
    fn backend(&self) -> Backend;

    /// Inserts a row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a duplicate key error when a unique index rejects the row.
    fn insert(&self, meta: &EntityMeta, instance: EntityValue) -> StorageResult<Value>;

    /// Updates the first matching row. `Null` patch values unset fields.
    ///
    /// # Errors
    ///
    /// Returns a duplicate key error when a unique index rejects the change.
    fn update_one(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
    ) -> StorageResult<UpdateResult>;

    /// Updates every matching row.
    ///
    /// # Errors
    ///
    /// Returns a duplicate key error when a unique index rejects the change.
    fn update_many(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
    ) -> StorageResult<UpdateResult>;

    /// Removes matching rows and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Rejects criteria that match every row.
    fn delete_many(&self, meta: &EntityMeta, criteria: &Criteria) -> StorageResult<u64>;

    /// Moves trashed rows back to the primary table.
    ///
    /// # Errors
    ///
    /// Returns a duplicate key error if a recovered row conflicts.
    fn recover_many(&self, meta: &EntityMeta, ids: &[Value]) -> StorageResult<u64>;

    /// Reads the first matching row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_one(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> StorageResult<Option<EntityValue>>;

    /// Reads one page of matching rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn find_page(&self, meta: &EntityMeta, query: &PageQuery) -> StorageResult<Page>;

    /// Archived versions of row `id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn list_history(
        &self,
        meta: &EntityMeta,
        id: &Value,
        skip: u64,
        limit: u64,
    ) -> StorageResult<Page>;

    /// The archived row `id` at `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn get_history_item(
        &self,
        meta: &EntityMeta,
        id: &Value,
        version: i64,
    ) -> StorageResult<Option<EntityValue>>;

    /// Copies an archived version back over row `id`.
    ///
    /// Restores the newest archived version when `version` is `None`.
    /// Returns the row's new version, or `None` if nothing was archived.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    fn restore_history(
        &self,
        meta: &EntityMeta,
        id: &Value,
        version: Option<i64>,
        operator: Option<&str>,
    ) -> StorageResult<Option<i64>>;

    /// Creates missing tables and columns. Never drops or alters.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be read or extended.
    fn sync_schema(&self, meta: &EntityMeta) -> StorageResult<SchemaReport>;

    /// Creates declared indexes missing from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the index list cannot be read or an index fails.
    fn create_indexes(&self, meta: &EntityMeta) -> StorageResult<Vec<String>>;
}
