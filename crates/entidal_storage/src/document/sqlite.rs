//! File-backed document store.
//!
//! Documents live in one SQLite file as envelope text, keyed by insertion
//! sequence. Every write loads the collection inside an immediate
//! transaction, applies the same [`Collection`] logic as the in-memory
//! store, and writes the journaled changes back before committing. Any
//! process that opens the same file sees the same documents.

use super::collection::{Change, Collection};
use super::{DocumentDriver, DriverError, DriverResult, FindSpec, IndexSpec, UpdateCount, INTERNAL_ERROR_CODE};
use crate::config::RelationalStoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::relational::ConnectionPool;
use entidal_codec::{from_envelope_str, to_envelope_string, CodecError, EntityValue, Value};
use rusqlite::{params, Connection};
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS documents_collection ON documents (collection, seq);
CREATE TABLE IF NOT EXISTS document_indexes (
    collection TEXT NOT NULL,
    name TEXT NOT NULL,
    spec TEXT NOT NULL,
    PRIMARY KEY (collection, name)
);
";

/// A document database stored in a SQLite file.
pub struct SqliteDocumentStore {
    name: String,
    pool: ConnectionPool,
}

impl std::fmt::Debug for SqliteDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDocumentStore").field("name", &self.name).finish()
    }
}

/// A collection as loaded, with the row sequence of each document.
struct Loaded {
    coll: Collection,
    seqs: Vec<i64>,
    stored_indexes: usize,
}

fn internal(message: impl std::fmt::Display) -> DriverError {
    DriverError {
        code: INTERNAL_ERROR_CODE,
        message: message.to_string(),
    }
}

fn into_driver_error(err: StorageError) -> DriverError {
    match err {
        StorageError::Driver(err) => err,
        other => internal(other),
    }
}

fn encode(doc: &EntityValue) -> StorageResult<String> {
    Ok(to_envelope_string(&Value::Map(doc.clone()))?)
}

fn decode(body: &str) -> StorageResult<EntityValue> {
    match from_envelope_str(body)? {
        Value::Map(doc) => Ok(doc),
        other => Err(CodecError::invalid_envelope(format!("stored document is a {}", other.type_name())).into()),
    }
}

fn load(conn: &Connection, namespace: String, collection: &str, with_indexes: bool) -> StorageResult<Loaded> {
    let mut coll = Collection::new(namespace);
    let mut seqs = Vec::new();
    let mut stmt = conn.prepare("SELECT seq, body FROM documents WHERE collection = ?1 ORDER BY seq")?;
    let rows = stmt.query_map([collection], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (seq, body) = row?;
        coll.docs.push(decode(&body)?);
        seqs.push(seq);
    }
    if with_indexes {
        let mut stmt = conn.prepare("SELECT spec FROM document_indexes WHERE collection = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map([collection], |row| row.get::<_, String>(0))?;
        for row in rows {
            let spec: IndexSpec = serde_json::from_str(&row?).map_err(internal)?;
            coll.indexes.push(spec);
        }
    }
    let stored_indexes = coll.indexes.len();
    Ok(Loaded {
        coll,
        seqs,
        stored_indexes,
    })
}

fn persist(conn: &Connection, collection: &str, loaded: &mut Loaded, journal: &[Change]) -> StorageResult<()> {
    for change in journal {
        match change {
            Change::Inserted => {
                let doc = &loaded.coll.docs[loaded.seqs.len()];
                conn.execute(
                    "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
                    params![collection, encode(doc)?],
                )?;
                loaded.seqs.push(conn.last_insert_rowid());
            }
            Change::Replaced(position) => {
                conn.execute(
                    "UPDATE documents SET body = ?1 WHERE seq = ?2",
                    params![encode(&loaded.coll.docs[*position])?, loaded.seqs[*position]],
                )?;
            }
            Change::Deleted(positions) => {
                for position in positions.iter().rev() {
                    let seq = loaded.seqs.remove(*position);
                    conn.execute("DELETE FROM documents WHERE seq = ?1", [seq])?;
                }
            }
            Change::Indexed => {
                let spec = &loaded.coll.indexes[loaded.stored_indexes];
                conn.execute(
                    "INSERT INTO document_indexes (collection, name, spec) VALUES (?1, ?2, ?3)",
                    params![collection, spec.name, serde_json::to_string(spec).map_err(internal)?],
                )?;
                loaded.stored_indexes += 1;
            }
        }
    }
    Ok(())
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its tables created.
    pub fn open(name: impl Into<String>, path: &str) -> StorageResult<Self> {
        let name = name.into();
        let pool = ConnectionPool::open(&RelationalStoreConfig::new(name.clone(), path))?;
        pool.with_unit(|unit| Ok(unit.write()?.execute_batch(SCHEMA)?))?;
        debug!(store = %name, path, "opened document file");
        Ok(Self { name, pool })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of collections holding at least one document or index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn collection_names(&self) -> StorageResult<Vec<String>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare(
            "SELECT collection FROM documents UNION SELECT collection FROM document_indexes ORDER BY 1",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(names.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    fn namespace(&self, collection: &str) -> String {
        format!("{}.{collection}", self.name)
    }

    fn write<T>(
        &self,
        collection: &str,
        op: impl FnOnce(&mut Collection, &mut Vec<Change>) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let outcome = self.pool.with_unit(|unit| {
            let conn = unit.write()?;
            let mut loaded = load(conn, self.namespace(collection), collection, true)?;
            let mut journal = Vec::new();
            let result = op(&mut loaded.coll, &mut journal);
            // Changes made before a failure stay, as in the in-memory store.
            persist(conn, collection, &mut loaded, &journal)?;
            Ok(result)
        });
        outcome.map_err(into_driver_error)?
    }

    fn read<T>(
        &self,
        collection: &str,
        with_indexes: bool,
        op: impl FnOnce(&Collection) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let loaded = self
            .pool
            .acquire()
            .and_then(|conn| load(&conn, self.namespace(collection), collection, with_indexes))
            .map_err(into_driver_error)?;
        op(&loaded.coll)
    }
}

impl DocumentDriver for SqliteDocumentStore {
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
        self.read(collection, false, |coll| coll.find(filter, spec))
    }

    fn count(&self, collection: &str, filter: &Value) -> DriverResult<u64> {
        self.read(collection, false, |coll| coll.count(filter))
    }

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> DriverResult<()> {
        self.write(collection, |coll, journal| coll.create_index(spec, journal))
    }

    fn index_names(&self, collection: &str) -> DriverResult<Vec<String>> {
        self.read(collection, true, |coll| Ok(coll.index_names()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DUPLICATE_KEY_CODE;
    use crate::meta::SortField;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(json: serde_json::Value) -> EntityValue {
        match Value::from(json) {
            Value::Map(m) => m,
            _ => panic!("expected object"),
        }
    }

    fn open(dir: &TempDir) -> SqliteDocumentStore {
        let path = dir.path().join("docs.db");
        SqliteDocumentStore::open("test", &path.to_string_lossy()).unwrap()
    }

    fn username_index() -> IndexSpec {
        IndexSpec {
            name: "users_username".into(),
            keys: vec![SortField::asc("username")],
            unique: true,
            sparse: false,
        }
    }

    #[test]
    fn documents_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.create_index("users", &username_index()).unwrap();
            store
                .insert_many("users", vec![doc(json!({"_id": "1", "username": "a"})), doc(json!({"_id": "2", "username": "b"}))])
                .unwrap();
        }
        let store = open(&dir);
        let all = store.find("users", &Value::Null, &FindSpec::default()).unwrap();
        assert_eq!(
            all,
            vec![doc(json!({"_id": "1", "username": "a"})), doc(json!({"_id": "2", "username": "b"}))]
        );
        assert_eq!(
            store.index_names("users").unwrap(),
            vec!["_id_".to_string(), "users_username".to_string()]
        );
        assert_eq!(store.collection_names().unwrap(), vec!["users".to_string()]);
    }

    #[test]
    fn two_handles_share_one_file() {
        let dir = TempDir::new().unwrap();
        let a = open(&dir);
        let b = open(&dir);
        a.create_index("users", &username_index()).unwrap();
        a.insert_one("users", doc(json!({"_id": "1", "username": "a"}))).unwrap();

        assert_eq!(b.count("users", &Value::Null).unwrap(), 1);
        let err = b
            .insert_one("users", doc(json!({"_id": "2", "username": "a"})))
            .unwrap_err();
        assert_eq!(err.code, DUPLICATE_KEY_CODE);
        assert!(err.message.contains("collection: test.users index: users_username"));

        b.update_one(
            "users",
            &Value::from(json!({"_id": "1"})),
            &Value::from(json!({"$set": {"username": "z"}})),
        )
        .unwrap();
        let seen = a
            .find("users", &Value::from(json!({"username": "z"})), &FindSpec::default())
            .unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn writes_are_stored_in_place() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        for n in 0..4 {
            store.insert_one("t", doc(json!({"_id": n, "n": n}))).unwrap();
        }
        store
            .replace_one("t", &Value::from(json!({"_id": 2})), doc(json!({"n": 20})), false)
            .unwrap();
        assert_eq!(store.delete_many("t", &Value::from(json!({"n": {"$lt": 2}}))).unwrap(), 2);
        store
            .update_many("t", &Value::Null, &Value::from(json!({"$inc": {"n": 1}})))
            .unwrap();

        let reopened = open(&dir);
        let all = reopened.find("t", &Value::Null, &FindSpec::default()).unwrap();
        assert_eq!(all, vec![doc(json!({"_id": 2, "n": 21})), doc(json!({"_id": 3, "n": 4}))]);
    }

    #[test]
    fn inserts_before_a_duplicate_are_kept() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let err = store
            .insert_many("t", vec![doc(json!({"_id": "a"})), doc(json!({"_id": "a"}))])
            .unwrap_err();
        assert_eq!(err.code, DUPLICATE_KEY_CODE);
        assert_eq!(open(&dir).count("t", &Value::Null).unwrap(), 1);
    }

    #[test]
    fn malformed_filters_fail() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.insert_one("t", doc(json!({"n": 1}))).unwrap();
        let err = store
            .find("t", &Value::from(json!({"n": {"$bogus": 1}})), &FindSpec::default())
            .unwrap_err();
        assert_eq!(err.code, crate::document::BAD_VALUE_CODE);
    }
}
