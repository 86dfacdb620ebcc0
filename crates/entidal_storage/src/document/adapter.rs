//! Entity persistence over a [`DocumentDriver`].

use super::{DocumentDriver, DriverError, FindSpec, IndexSpec, DUPLICATE_KEY_CODE};
use crate::adapter::{FindOptions, Page, PageQuery, SchemaReport, StorageAdapter, UpdateResult};
use crate::criteria::{document, Criteria};
use crate::error::{StorageError, StorageResult};
use crate::ids::{new_object_id, now_millis};
use crate::meta::{
    Backend, EntityMeta, FieldType, RemoveMode, SortField, HISTORY_OF_FIELD, ID_FIELD,
    MODIFIED_BY_FIELD, MODIFIED_ON_FIELD, VERSION_FIELD,
};
use entidal_codec::{EntityValue, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

const DUP_KEY_PATTERN: &str = r"index:\s(.+) dup key: (.+)";

/// Maps entity operations onto a document driver.
///
/// The driver has no multi-statement transactions, so trash moves and
/// history copies are two separate writes.
#[derive(Clone)]
pub struct DocumentAdapter {
    store: String,
    driver: Arc<dyn DocumentDriver>,
}

impl std::fmt::Debug for DocumentAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAdapter")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl DocumentAdapter {
    /// Wraps `driver`, registered as store `store`.
    pub fn new(store: impl Into<String>, driver: Arc<dyn DocumentDriver>) -> Self {
        Self {
            store: store.into(),
            driver,
        }
    }

    /// Store name.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// The underlying driver.
    pub fn driver(&self) -> &Arc<dyn DocumentDriver> {
        &self.driver
    }

    fn new_id(meta: &EntityMeta) -> Value {
        match meta.field_meta(ID_FIELD).map(|f| f.field_type) {
            Some(FieldType::ObjectId) | None => Value::ObjectId(new_object_id()),
            Some(_) => Value::Text(new_object_id()),
        }
    }

    fn find_all(&self, collection: &str, filter: &Value) -> StorageResult<Vec<EntityValue>> {
        Ok(self.driver.find(collection, filter, &FindSpec::default())?)
    }

    /// Copies `pre_image` into the history collection under a fresh id.
    fn archive(&self, meta: &EntityMeta, pre_image: &EntityValue) -> StorageResult<()> {
        let mut copy = pre_image.clone();
        let original = copy.remove(ID_FIELD).unwrap_or(Value::Null);
        copy.insert(HISTORY_OF_FIELD.to_string(), original);
        copy.insert(ID_FIELD.to_string(), Value::ObjectId(new_object_id()));
        self.driver
            .insert_one(&meta.history_table(), copy)
            .map_err(|e| classify(meta, e))?;
        Ok(())
    }

    fn update_with_history(
        &self,
        meta: &EntityMeta,
        filter: &Value,
        update: &Value,
        single: bool,
    ) -> StorageResult<UpdateResult> {
        let spec = FindSpec {
            limit: single.then_some(1),
            ..FindSpec::default()
        };
        let pre_images = self.driver.find(meta.table_name(), filter, &spec)?;
        if pre_images.is_empty() {
            return Ok(UpdateResult::default());
        }
        // Archive first: a failed update still leaves every pre-image behind.
        for pre_image in &pre_images {
            self.archive(meta, pre_image)?;
        }
        let ids: Vec<Value> = pre_images.iter().filter_map(|d| d.get(ID_FIELD).cloned()).collect();
        let count = self
            .driver
            .update_many(meta.table_name(), &ids_filter(ids), update)
            .map_err(|e| classify(meta, e))?;
        Ok(UpdateResult {
            matched_count: count.matched,
            modified_count: count.modified,
        })
    }
}

fn ids_filter(ids: Vec<Value>) -> Value {
    let mut condition = BTreeMap::new();
    condition.insert("$in".to_string(), Value::Array(ids));
    single(ID_FIELD, Value::Map(condition))
}

fn single(key: &str, value: Value) -> Value {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value);
    Value::Map(map)
}

/// Bumps `_version` and stamps `_modifiedOn` on a row changing tables.
fn touch(row: &mut EntityValue, now: &Value) {
    let version = row.get(VERSION_FIELD).and_then(Value::as_integer).unwrap_or(0);
    row.insert(VERSION_FIELD.to_string(), Value::Integer(version + 1));
    row.insert(MODIFIED_ON_FIELD.to_string(), now.clone());
}

/// Builds the native update: `$set` for values, `$unset` for nulls and a
/// version increment.
fn update_document(patch: &EntityValue) -> Value {
    let mut set = BTreeMap::new();
    let mut unset = BTreeMap::new();
    for (key, value) in patch {
        if key == ID_FIELD || key == VERSION_FIELD {
            continue;
        }
        if value.is_null() {
            unset.insert(key.clone(), Value::from(""));
        } else {
            set.insert(key.clone(), value.clone());
        }
    }
    let mut update = BTreeMap::new();
    if !set.is_empty() {
        update.insert("$set".to_string(), Value::Map(set));
    }
    if !unset.is_empty() {
        update.insert("$unset".to_string(), Value::Map(unset));
    }
    update.insert("$inc".to_string(), single(VERSION_FIELD, Value::Integer(1)));
    Value::Map(update)
}

/// Converts a native duplicate key error into [`StorageError::DuplicateKey`].
fn classify(meta: &EntityMeta, err: DriverError) -> StorageError {
    if err.code != DUPLICATE_KEY_CODE {
        return StorageError::Driver(err);
    }
    let captures = regex_lite::Regex::new(DUP_KEY_PATTERN)
        .ok()
        .and_then(|re| re.captures(&err.message).map(|c| (c[1].to_string(), c[2].to_string())));
    let Some((physical, key)) = captures else {
        warn!(entity = %meta.name, error = %err.message, "unparsable duplicate key error");
        return StorageError::DuplicateKey {
            index: None,
            message: err.message,
        };
    };
    match meta.index_by_physical_name(physical.trim()) {
        Some(index) => StorageError::DuplicateKey {
            index: Some(index.name.clone()),
            message: index.duplicate_message(),
        },
        None => StorageError::DuplicateKey {
            index: None,
            message: format!("duplicate value: {}", key.trim()),
        },
    }
}

fn index_spec(meta: &EntityMeta, index: &crate::meta::IndexMeta) -> IndexSpec {
    IndexSpec {
        name: index.physical_name(meta.table_name()),
        keys: index.fields.clone(),
        unique: index.unique,
        sparse: index.sparse,
    }
}

impl StorageAdapter for DocumentAdapter {
    fn backend(&self) -> Backend {
        Backend::Document
    }

    fn insert(&self, meta: &EntityMeta, mut instance: EntityValue) -> StorageResult<Value> {
        if instance.get(ID_FIELD).map_or(true, Value::is_null) {
            instance.insert(ID_FIELD.to_string(), Self::new_id(meta));
        }
        self.driver
            .insert_one(meta.table_name(), instance)
            .map_err(|e| classify(meta, e))
    }

    fn update_one(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
    ) -> StorageResult<UpdateResult> {
        let filter = document::compile(criteria, meta);
        let update = update_document(patch);
        if meta.remove_mode == RemoveMode::History {
            return self.update_with_history(meta, &filter, &update, true);
        }
        let count = self
            .driver
            .update_one(meta.table_name(), &filter, &update)
            .map_err(|e| classify(meta, e))?;
        Ok(UpdateResult {
            matched_count: count.matched,
            modified_count: count.modified,
        })
    }

    fn update_many(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        patch: &EntityValue,
    ) -> StorageResult<UpdateResult> {
        let filter = document::compile(criteria, meta);
        let update = update_document(patch);
        if meta.remove_mode == RemoveMode::History {
            return self.update_with_history(meta, &filter, &update, false);
        }
        let count = self
            .driver
            .update_many(meta.table_name(), &filter, &update)
            .map_err(|e| classify(meta, e))?;
        Ok(UpdateResult {
            matched_count: count.matched,
            modified_count: count.modified,
        })
    }

    fn delete_many(&self, meta: &EntityMeta, criteria: &Criteria) -> StorageResult<u64> {
        let filter = document::compile_for_delete(criteria, meta)?;
        let table = meta.table_name();
        match meta.remove_mode {
            RemoveMode::Hard => Ok(self.driver.delete_many(table, &filter)?),
            RemoveMode::Trash => {
                let rows = self.find_all(table, &filter)?;
                let now = Value::Date(now_millis());
                let mut ids = Vec::with_capacity(rows.len());
                for mut row in rows {
                    let Some(id) = row.get(ID_FIELD).cloned() else {
                        continue;
                    };
                    touch(&mut row, &now);
                    self.driver
                        .replace_one(&meta.trash_table(), &single(ID_FIELD, id.clone()), row, true)
                        .map_err(|e| classify(meta, e))?;
                    ids.push(id);
                }
                if ids.is_empty() {
                    return Ok(0);
                }
                let removed = self.driver.delete_many(table, &ids_filter(ids))?;
                debug!(entity = %meta.name, removed, "moved rows to trash");
                Ok(removed)
            }
            RemoveMode::History => {
                let rows = self.find_all(table, &filter)?;
                let mut ids = Vec::with_capacity(rows.len());
                for row in &rows {
                    self.archive(meta, row)?;
                    if let Some(id) = row.get(ID_FIELD) {
                        ids.push(id.clone());
                    }
                }
                if ids.is_empty() {
                    return Ok(0);
                }
                Ok(self.driver.delete_many(table, &ids_filter(ids))?)
            }
        }
    }

    fn recover_many(&self, meta: &EntityMeta, ids: &[Value]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let trash = meta.trash_table();
        let rows = self.find_all(&trash, &ids_filter(ids.to_vec()))?;
        let now = Value::Date(now_millis());
        let mut recovered = 0;
        for mut row in rows {
            let Some(id) = row.get(ID_FIELD).cloned() else {
                continue;
            };
            touch(&mut row, &now);
            self.driver
                .insert_one(meta.table_name(), row)
                .map_err(|e| classify(meta, e))?;
            self.driver.delete_many(&trash, &single(ID_FIELD, id))?;
            recovered += 1;
        }
        Ok(recovered)
    }

    fn find_one(
        &self,
        meta: &EntityMeta,
        criteria: &Criteria,
        options: &FindOptions,
    ) -> StorageResult<Option<EntityValue>> {
        let spec = FindSpec {
            projection: options.included_fields.clone(),
            limit: Some(1),
            ..FindSpec::default()
        };
        let rows = self
            .driver
            .find(&meta.table_for(options.repo), &document::compile(criteria, meta), &spec)?;
        Ok(rows.into_iter().next())
    }

    fn find_page(&self, meta: &EntityMeta, query: &PageQuery) -> StorageResult<Page> {
        let collection = meta.table_for(query.repo);
        let filter = document::compile(&query.criteria, meta);
        let spec = FindSpec {
            projection: query.included_fields.clone(),
            sort: query.sort.clone(),
            skip: query.skip,
            limit: query.limit,
        };
        let rows = self.driver.find(&collection, &filter, &spec)?;
        let total = if query.without_total {
            None
        } else {
            Some(self.driver.count(&collection, &filter)?)
        };
        Ok(Page { rows, total })
    }

    fn list_history(
        &self,
        meta: &EntityMeta,
        id: &Value,
        skip: u64,
        limit: u64,
    ) -> StorageResult<Page> {
        let collection = meta.history_table();
        let filter = single(HISTORY_OF_FIELD, id.clone());
        let spec = FindSpec {
            sort: vec![SortField::desc(VERSION_FIELD)],
            skip,
            limit: Some(limit),
            ..FindSpec::default()
        };
        let rows = self.driver.find(&collection, &filter, &spec)?;
        let total = self.driver.count(&collection, &filter)?;
        Ok(Page {
            rows,
            total: Some(total),
        })
    }

    fn get_history_item(
        &self,
        meta: &EntityMeta,
        id: &Value,
        version: i64,
    ) -> StorageResult<Option<EntityValue>> {
        let mut filter = BTreeMap::new();
        filter.insert(HISTORY_OF_FIELD.to_string(), id.clone());
        filter.insert(VERSION_FIELD.to_string(), Value::Integer(version));
        let spec = FindSpec {
            limit: Some(1),
            ..FindSpec::default()
        };
        let rows = self
            .driver
            .find(&meta.history_table(), &Value::Map(filter), &spec)?;
        Ok(rows.into_iter().next())
    }

    fn restore_history(
        &self,
        meta: &EntityMeta,
        id: &Value,
        version: Option<i64>,
        operator: Option<&str>,
    ) -> StorageResult<Option<i64>> {
        let item = match version {
            Some(v) => self.get_history_item(meta, id, v)?,
            None => self.list_history(meta, id, 0, 1)?.rows.into_iter().next(),
        };
        let Some(mut restored) = item else {
            return Ok(None);
        };
        let id_filter = single(ID_FIELD, id.clone());
        let current = self
            .driver
            .find(meta.table_name(), &id_filter, &FindSpec::default())?
            .into_iter()
            .next();
        let base_version = match &current {
            Some(current) => {
                self.archive(meta, current)?;
                current.get(VERSION_FIELD).and_then(Value::as_integer)
            }
            None => None,
        }
        .or_else(|| restored.get(VERSION_FIELD).and_then(Value::as_integer))
        .unwrap_or(0);
        let new_version = base_version + 1;

        restored.remove(HISTORY_OF_FIELD);
        restored.insert(ID_FIELD.to_string(), id.clone());
        restored.insert(VERSION_FIELD.to_string(), Value::Integer(new_version));
        restored.insert(MODIFIED_ON_FIELD.to_string(), Value::Date(now_millis()));
        if let Some(operator) = operator {
            restored.insert(MODIFIED_BY_FIELD.to_string(), Value::from(operator));
        }
        self.driver
            .replace_one(meta.table_name(), &id_filter, restored, true)
            .map_err(|e| classify(meta, e))?;
        Ok(Some(new_version))
    }

    fn sync_schema(&self, _meta: &EntityMeta) -> StorageResult<SchemaReport> {
        // Collections are created on first write.
        Ok(SchemaReport::default())
    }

    fn create_indexes(&self, meta: &EntityMeta) -> StorageResult<Vec<String>> {
        let existing = self.driver.index_names(meta.table_name())?;
        let mut created = Vec::new();
        for index in &meta.indexes {
            let spec = index_spec(meta, index);
            if existing.iter().any(|name| name == &spec.name) {
                continue;
            }
            self.driver
                .create_index(meta.table_name(), &spec)
                .map_err(|e| classify(meta, e))?;
            debug!(entity = %meta.name, index = %spec.name, "created index");
            created.push(spec.name);
        }
        Ok(created)
    }
}
