//! Named store connections.
//!
//! The registry owns every connection pool and document driver. Adapters
//! are resolved per call from an entity's backend family and store name.

use crate::adapter::StorageAdapter;
use crate::config::{DocumentStoreConfig, RelationalStoreConfig, MEMORY_SCHEME, SQLITE_SCHEME};
use crate::document::{DocumentAdapter, DocumentDriver, MemoryDocumentStore, SqliteDocumentStore};
use crate::error::{StorageError, StorageResult};
use crate::meta::{Backend, EntityMeta};
use crate::relational::{ConnectionPool, RelationalAdapter};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of document and relational stores by name.
#[derive(Default)]
pub struct StoreRegistry {
    documents: RwLock<HashMap<String, Arc<DocumentAdapter>>>,
    relational: RwLock<HashMap<String, Arc<RelationalAdapter>>>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("documents", &self.document_store_names())
            .field("relational", &self.relational_store_names())
            .finish()
    }
}

impl StoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every configured store.
    ///
    /// # Errors
    ///
    /// Returns the first connection failure.
    pub fn connect(
        documents: &[DocumentStoreConfig],
        relational: &[RelationalStoreConfig],
    ) -> StorageResult<Self> {
        let registry = Self::new();
        for config in documents {
            registry.add_document_store(config)?;
        }
        for config in relational {
            registry.add_relational_store(config)?;
        }
        Ok(registry)
    }

    /// Opens a document store from its connection string.
    ///
    /// `sqlite://<path>` opens a file every process can share;
    /// `memory://<db>` keeps documents in this process only. Other drivers
    /// are registered with [`StoreRegistry::register_document_driver`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedUrl`] for any other scheme or an
    /// empty path, and the open error of an unusable file.
    pub fn add_document_store(&self, config: &DocumentStoreConfig) -> StorageResult<()> {
        let driver: Arc<dyn DocumentDriver> = if let Some(db) = config.url.strip_prefix(MEMORY_SCHEME) {
            warn!(store = %config.name, "document store is private to this process");
            let db = if db.is_empty() { config.name.as_str() } else { db };
            Arc::new(MemoryDocumentStore::new(db))
        } else if let Some(path) = config.url.strip_prefix(SQLITE_SCHEME).filter(|p| !p.is_empty()) {
            Arc::new(SqliteDocumentStore::open(config.name.as_str(), path)?)
        } else {
            return Err(StorageError::UnsupportedUrl(config.url.clone()));
        };
        self.register_document_driver(&config.name, driver);
        Ok(())
    }

    /// Registers a document driver under `name`, replacing any previous one.
    pub fn register_document_driver(&self, name: &str, driver: Arc<dyn DocumentDriver>) {
        info!(store = name, "registered document store");
        self.documents
            .write()
            .insert(name.to_string(), Arc::new(DocumentAdapter::new(name, driver)));
    }

    /// Opens a relational connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn add_relational_store(&self, config: &RelationalStoreConfig) -> StorageResult<()> {
        let pool = ConnectionPool::open(config)?;
        info!(store = %config.name, database = %config.database, "registered relational store");
        self.relational.write().insert(
            config.name.clone(),
            Arc::new(RelationalAdapter::new(Arc::new(pool))),
        );
        Ok(())
    }

    /// The document driver registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownStore`] if none is registered.
    pub fn document_driver(&self, name: &str) -> StorageResult<Arc<dyn DocumentDriver>> {
        self.documents
            .read()
            .get(name)
            .map(|adapter| Arc::clone(adapter.driver()))
            .ok_or_else(|| StorageError::UnknownStore {
                backend: Backend::Document.as_str(),
                name: name.to_string(),
            })
    }

    /// The connection pool registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownStore`] if none is registered.
    pub fn relational_pool(&self, name: &str) -> StorageResult<Arc<ConnectionPool>> {
        self.relational
            .read()
            .get(name)
            .map(|adapter| Arc::clone(adapter.pool()))
            .ok_or_else(|| StorageError::UnknownStore {
                backend: Backend::Relational.as_str(),
                name: name.to_string(),
            })
    }

    /// Resolves the adapter serving `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoBackend`] for unpersisted entities and
    /// [`StorageError::UnknownStore`] when the named store is missing.
    pub fn adapter(&self, meta: &EntityMeta) -> StorageResult<Arc<dyn StorageAdapter>> {
        let found: Option<Arc<dyn StorageAdapter>> = match meta.db {
            Backend::Document => self
                .documents
                .read()
                .get(&meta.db_name)
                .map(|a| Arc::clone(a) as Arc<dyn StorageAdapter>),
            Backend::Relational => self
                .relational
                .read()
                .get(&meta.db_name)
                .map(|a| Arc::clone(a) as Arc<dyn StorageAdapter>),
            Backend::None => return Err(StorageError::NoBackend(meta.name.clone())),
        };
        found.ok_or_else(|| StorageError::UnknownStore {
            backend: meta.db.as_str(),
            name: meta.db_name.clone(),
        })
    }

    /// Names of the registered document stores.
    pub fn document_store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.documents.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the registered relational stores.
    pub fn relational_store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.relational.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every store. Pools close once in-flight calls release them.
    pub fn disconnect(&self) {
        self.documents.write().clear();
        self.relational.write().clear();
        info!("disconnected all stores");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::DEFAULT_STORE;

    #[test]
    fn resolves_adapters_by_backend_and_name() {
        let registry = StoreRegistry::connect(
            &[DocumentStoreConfig::in_memory(DEFAULT_STORE)],
            &[RelationalStoreConfig::in_memory(DEFAULT_STORE)],
        )
        .unwrap();
        let doc = EntityMeta::new("A", Backend::Document);
        let rel = EntityMeta::new("B", Backend::Relational);
        assert_eq!(registry.adapter(&doc).unwrap().backend(), Backend::Document);
        assert_eq!(registry.adapter(&rel).unwrap().backend(), Backend::Relational);
    }

    #[test]
    fn missing_stores_and_backends() {
        let registry = StoreRegistry::new();
        let meta = EntityMeta::new("A", Backend::Document).db_name("other");
        assert!(matches!(
            registry.adapter(&meta),
            Err(StorageError::UnknownStore { backend: "document", .. })
        ));
        assert!(matches!(
            registry.adapter(&EntityMeta::new("N", Backend::None)),
            Err(StorageError::NoBackend(_))
        ));
    }

    #[test]
    fn rejects_unknown_urls() {
        let registry = StoreRegistry::new();
        let err = registry
            .add_document_store(&DocumentStoreConfig::new("main", "mongodb://localhost"))
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedUrl(_)));
        let err = registry
            .add_document_store(&DocumentStoreConfig::new("main", "sqlite://"))
            .unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedUrl(_)));
    }

    #[test]
    fn sqlite_urls_open_shared_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("docs.db");
        let config = DocumentStoreConfig::sqlite("main", path.to_string_lossy());
        let first = StoreRegistry::connect(std::slice::from_ref(&config), &[]).unwrap();
        let second = StoreRegistry::connect(&[config], &[]).unwrap();

        let mut doc = entidal_codec::EntityValue::new();
        doc.insert("_id".into(), entidal_codec::Value::from("a"));
        first.document_driver("main").unwrap().insert_one("notes", doc).unwrap();
        let seen = second
            .document_driver("main")
            .unwrap()
            .count("notes", &entidal_codec::Value::Null)
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn disconnect_clears_everything() {
        let registry =
            StoreRegistry::connect(&[DocumentStoreConfig::in_memory("main")], &[]).unwrap();
        assert_eq!(registry.document_store_names(), vec!["main"]);
        assert!(registry.document_driver("main").is_ok());
        registry.disconnect();
        assert!(registry.document_store_names().is_empty());
        assert!(registry.relational_pool("main").is_err());
    }
}
