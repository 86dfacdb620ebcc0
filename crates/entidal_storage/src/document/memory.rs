//! In-process document store.

use super::collection::{Change, Collection};
use super::{DocumentDriver, DriverResult, FindSpec, IndexSpec, UpdateCount};
use entidal_codec::{EntityValue, Value};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A document database held in process memory.
///
/// Documents keep insertion order, which is the natural order of unsorted
/// finds. Every call runs under one lock, so single calls are atomic while
/// sequences of calls are not. Nothing outlives the process; deployments
/// with more than one process use [`super::SqliteDocumentStore`].
#[derive(Debug)]
pub struct MemoryDocumentStore {
    name: String,
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    /// Creates an empty database called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of collections holding at least one document or index.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn write<T>(
        &self,
        collection: &str,
        op: impl FnOnce(&mut Collection, &mut Vec<Change>) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut collections = self.collections.write();
        let created = !collections.contains_key(collection);
        let coll = collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection::new(format!("{}.{collection}", self.name)));
        // Memory holds the state itself; the journal has no reader here.
        let result = op(coll, &mut Vec::new());
        if created && coll.docs.is_empty() && coll.indexes.is_empty() {
            collections.remove(collection);
        }
        result
    }

    fn read<T>(&self, collection: &str, op: impl FnOnce(&Collection) -> DriverResult<T>) -> DriverResult<Option<T>> {
        self.collections.read().get(collection).map(op).transpose()
    }
}

impl DocumentDriver for MemoryDocumentStore {
    fn insert_one(&self, collection: &str, doc: EntityValue) -> DriverResult<Value> {
        self.write(collection, |coll, journal| coll.insert(doc, journal))
    }

    fn insert_many(&self, collection: &str, docs: Vec<EntityValue>) -> DriverResult<()> {
        self.write(collection, |coll, journal| {
            for doc in docs {
                coll.insert(doc, journal)?;
            }
            Ok(())
        })
    }

    fn update_one(&self, collection: &str, filter: &Value, update: &Value) -> DriverResult<UpdateCount> {
        self.write(collection, |coll, journal| coll.update(filter, update, false, journal))
    }

    fn update_many(&self, collection: &str, filter: &Value, update: &Value) -> DriverResult<UpdateCount> {
        self.write(collection, |coll, journal| coll.update(filter, update, true, journal))
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Value,
        doc: EntityValue,
        upsert: bool,
    ) -> DriverResult<UpdateCount> {
        self.write(collection, |coll, journal| coll.replace(filter, doc, upsert, journal))
    }

    fn delete_many(&self, collection: &str, filter: &Value) -> DriverResult<u64> {
        self.write(collection, |coll, journal| coll.delete(filter, journal))
    }

    fn find(&self, collection: &str, filter: &Value, spec: &FindSpec) -> DriverResult<Vec<EntityValue>> {
        Ok(self.read(collection, |coll| coll.find(filter, spec))?.unwrap_or_default())
    }

    fn count(&self, collection: &str, filter: &Value) -> DriverResult<u64> {
        Ok(self.read(collection, |coll| coll.count(filter))?.unwrap_or_default())
    }

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> DriverResult<()> {
        self.write(collection, |coll, journal| coll.create_index(spec, journal))
    }

    fn index_names(&self, collection: &str) -> DriverResult<Vec<String>> {
        Ok(self
            .read(collection, |coll| Ok(coll.index_names()))?
            .unwrap_or_else(|| Collection::default().index_names()))
    }
}
