//! Collection semantics shared by the bundled document stores.
//!
//! A [`Collection`] holds documents in insertion order plus its index
//! definitions. Every mutating call appends to a [`Change`] journal, which
//! lets a persistent store write back only what the call touched.

use super::matcher::{apply_update, field_value, Filter};
use super::{DriverError, DriverResult, FindSpec, IndexSpec, UpdateCount, DUPLICATE_KEY_CODE};
use crate::ids::new_object_id;
use crate::meta::{SortField, SortOrder, ID_FIELD};
use entidal_codec::{EntityValue, Value};
use std::cmp::Ordering;

/// Name of the implicit unique index on `_id`.
pub(crate) const ID_INDEX: &str = "_id_";

/// One write applied by a collection call, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    /// A document was appended.
    Inserted,
    /// The document at this position was replaced.
    Replaced(usize),
    /// Documents at these ascending positions were removed.
    Deleted(Vec<usize>),
    /// An index definition was appended.
    Indexed,
}

/// Documents and indexes of one collection.
#[derive(Debug, Default)]
pub(crate) struct Collection {
    /// `db.collection`, used in native error messages.
    namespace: String,
    pub(crate) docs: Vec<EntityValue>,
    pub(crate) indexes: Vec<IndexSpec>,
}

fn id_index() -> IndexSpec {
    IndexSpec {
        name: ID_INDEX.to_string(),
        keys: vec![SortField::asc(ID_FIELD)],
        unique: true,
        sparse: false,
    }
}

fn index_key(doc: &EntityValue, spec: &IndexSpec) -> Option<Vec<Value>> {
    let values: Vec<Option<&Value>> = spec.keys.iter().map(|k| field_value(doc, &k.field)).collect();
    if spec.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(values.into_iter().map(|v| v.cloned().unwrap_or(Value::Null)).collect())
}

fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
}

fn sort_docs(docs: &mut [EntityValue], sort: &[SortField]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in sort {
            let av = field_value(a, &key.field).unwrap_or(&Value::Null);
            let bv = field_value(b, &key.field).unwrap_or(&Value::Null);
            let ord = match key.order {
                SortOrder::Asc => av.sort_cmp(bv),
                SortOrder::Desc => bv.sort_cmp(av),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn project(doc: EntityValue, projection: &[String]) -> EntityValue {
    if projection.is_empty() {
        return doc;
    }
    doc.into_iter()
        .filter(|(k, _)| k == ID_FIELD || projection.iter().any(|p| p == k))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
impl Collection {
    /// An empty collection in `namespace`.
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            docs: Vec::new(),
            indexes: Vec::new(),
        }
    }

    fn duplicate(&self, spec: &IndexSpec, key: &[Value]) -> DriverError {
        let pairs: Vec<String> = spec
            .keys
            .iter()
            .zip(key)
            .map(|(k, v)| format!("{}: {}", k.field, v.to_json()))
            .collect();
        DriverError {
            code: DUPLICATE_KEY_CODE,
            message: format!(
                "E11000 duplicate key error collection: {} index: {} dup key: {{ {} }}",
                self.namespace,
                spec.name,
                pairs.join(", ")
            ),
        }
    }

    fn check_unique(&self, candidate: &EntityValue, skip: Option<usize>) -> DriverResult<()> {
        let id_index = id_index();
        let unique = std::iter::once(&id_index).chain(self.indexes.iter().filter(|i| i.unique));
        for spec in unique {
            let Some(key) = index_key(candidate, spec) else {
                continue;
            };
            let clash = self.docs.iter().enumerate().any(|(i, other)| {
                Some(i) != skip && index_key(other, spec).is_some_and(|k| keys_equal(&k, &key))
            });
            if clash {
                return Err(self.duplicate(spec, &key));
            }
        }
        Ok(())
    }

    fn positions(&self, filter: &Value, first_only: bool) -> DriverResult<Vec<usize>> {
        let filter = Filter::new(filter)?;
        let mut out = Vec::new();
        for (i, doc) in self.docs.iter().enumerate() {
            if filter.matches(doc)? {
                out.push(i);
                if first_only {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Appends `doc`, generating an object id when it has none.
    pub(crate) fn insert(&mut self, mut doc: EntityValue, journal: &mut Vec<Change>) -> DriverResult<Value> {
        let id = match doc.get(ID_FIELD) {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                let id = Value::ObjectId(new_object_id());
                doc.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        self.check_unique(&doc, None)?;
        self.docs.push(doc);
        journal.push(Change::Inserted);
        Ok(id)
    }

    fn update_at(&mut self, position: usize, update: &Value, journal: &mut Vec<Change>) -> DriverResult<bool> {
        let mut next = self.docs[position].clone();
        let changed = apply_update(&mut next, update)?;
        if next.get(ID_FIELD) != self.docs[position].get(ID_FIELD) {
            return Err(DriverError::bad_value("the _id field is immutable"));
        }
        if changed {
            self.check_unique(&next, Some(position))?;
            self.docs[position] = next;
            journal.push(Change::Replaced(position));
        }
        Ok(changed)
    }

    /// Applies `update` to the first match, or every match when `multi`.
    pub(crate) fn update(
        &mut self,
        filter: &Value,
        update: &Value,
        multi: bool,
        journal: &mut Vec<Change>,
    ) -> DriverResult<UpdateCount> {
        let positions = self.positions(filter, !multi)?;
        let mut count = UpdateCount {
            matched: positions.len() as u64,
            modified: 0,
        };
        for position in positions {
            if self.update_at(position, update, journal)? {
                count.modified += 1;
            }
        }
        Ok(count)
    }

    /// Replaces the first match, or inserts `doc` when `upsert` is set.
    pub(crate) fn replace(
        &mut self,
        filter: &Value,
        mut doc: EntityValue,
        upsert: bool,
        journal: &mut Vec<Change>,
    ) -> DriverResult<UpdateCount> {
        match self.positions(filter, true)?.first().copied() {
            Some(position) => {
                let existing_id = self.docs[position].get(ID_FIELD).cloned();
                match (doc.get(ID_FIELD), &existing_id) {
                    (None, Some(id)) => {
                        doc.insert(ID_FIELD.to_string(), id.clone());
                    }
                    (Some(new_id), Some(id)) if new_id != id => {
                        return Err(DriverError::bad_value("the _id field is immutable"));
                    }
                    _ => {}
                }
                self.check_unique(&doc, Some(position))?;
                let changed = self.docs[position] != doc;
                if changed {
                    self.docs[position] = doc;
                    journal.push(Change::Replaced(position));
                }
                Ok(UpdateCount {
                    matched: 1,
                    modified: u64::from(changed),
                })
            }
            None if upsert => {
                self.insert(doc, journal)?;
                Ok(UpdateCount::default())
            }
            None => Ok(UpdateCount::default()),
        }
    }

    /// Removes every match.
    pub(crate) fn delete(&mut self, filter: &Value, journal: &mut Vec<Change>) -> DriverResult<u64> {
        let positions = self.positions(filter, false)?;
        if positions.is_empty() {
            return Ok(0);
        }
        for position in positions.iter().rev() {
            self.docs.remove(*position);
        }
        let removed = positions.len() as u64;
        journal.push(Change::Deleted(positions));
        Ok(removed)
    }

    /// Matching documents, sorted, paged and projected.
    pub(crate) fn find(&self, filter: &Value, spec: &FindSpec) -> DriverResult<Vec<EntityValue>> {
        let prepared = Filter::new(filter)?;
        let mut found = Vec::new();
        for doc in &self.docs {
            if prepared.matches(doc)? {
                found.push(doc.clone());
            }
        }
        sort_docs(&mut found, &spec.sort);
        let limit = spec.limit.map_or(usize::MAX, |l| l as usize);
        Ok(found
            .into_iter()
            .skip(spec.skip as usize)
            .take(limit)
            .map(|doc| project(doc, &spec.projection))
            .collect())
    }

    /// Number of matching documents.
    pub(crate) fn count(&self, filter: &Value) -> DriverResult<u64> {
        Ok(self.positions(filter, false)?.len() as u64)
    }

    /// Adds an index definition, checking existing documents against it.
    pub(crate) fn create_index(&mut self, spec: &IndexSpec, journal: &mut Vec<Change>) -> DriverResult<()> {
        if spec.name == ID_INDEX || self.indexes.iter().any(|i| i.name == spec.name) {
            return Ok(());
        }
        if spec.unique {
            let keys: Vec<Vec<Value>> = self.docs.iter().filter_map(|d| index_key(d, spec)).collect();
            for (i, key) in keys.iter().enumerate() {
                if keys[..i].iter().any(|k| keys_equal(k, key)) {
                    return Err(self.duplicate(spec, key));
                }
            }
        }
        self.indexes.push(spec.clone());
        journal.push(Change::Indexed);
        Ok(())
    }

    /// Index names, the implicit `_id` index first.
    pub(crate) fn index_names(&self) -> Vec<String> {
        std::iter::once(ID_INDEX.to_string())
            .chain(self.indexes.iter().map(|i| i.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> EntityValue {
        match Value::from(json) {
            Value::Map(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn journal_records_each_write() {
        let mut coll = Collection::new("db.t");
        let mut journal = Vec::new();
        for n in 0..3 {
            coll.insert(doc(json!({"_id": n, "n": n})), &mut journal).unwrap();
        }
        coll.update(
            &Value::from(json!({"n": {"$gte": 1}})),
            &Value::from(json!({"$set": {"flag": true}})),
            true,
            &mut journal,
        )
        .unwrap();
        coll.delete(&Value::from(json!({"n": {"$ne": 1}})), &mut journal).unwrap();
        assert_eq!(
            journal,
            vec![
                Change::Inserted,
                Change::Inserted,
                Change::Inserted,
                Change::Replaced(1),
                Change::Replaced(2),
                Change::Deleted(vec![0, 2]),
            ]
        );
        assert_eq!(coll.docs, vec![doc(json!({"_id": 1, "n": 1, "flag": true}))]);
    }

    #[test]
    fn unchanged_updates_are_not_journaled() {
        let mut coll = Collection::new("db.t");
        let mut journal = Vec::new();
        coll.insert(doc(json!({"_id": "a", "n": 1})), &mut journal).unwrap();
        journal.clear();
        let count = coll
            .update(
                &Value::from(json!({"_id": "a"})),
                &Value::from(json!({"$set": {"n": 1}})),
                false,
                &mut journal,
            )
            .unwrap();
        assert_eq!(count, UpdateCount { matched: 1, modified: 0 });
        assert!(journal.is_empty());
    }

    #[test]
    fn failed_insert_is_not_journaled() {
        let mut coll = Collection::new("db.t");
        let mut journal = Vec::new();
        coll.insert(doc(json!({"_id": "a"})), &mut journal).unwrap();
        let err = coll.insert(doc(json!({"_id": "a"})), &mut journal).unwrap_err();
        assert_eq!(err.code, DUPLICATE_KEY_CODE);
        assert!(err.message.contains("collection: db.t index: _id_"));
        assert_eq!(journal, vec![Change::Inserted]);
    }
}
