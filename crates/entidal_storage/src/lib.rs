//! # Entidal Storage
//!
//! Storage adapters for entidal.
//!
//! This crate provides:
//! - Entity metadata ([`EntityMeta`], [`FieldMeta`], [`IndexMeta`])
//! - The backend-agnostic [`Criteria`] model and its compilers
//! - The [`StorageAdapter`] capability set with a document and a
//!   relational implementation
//! - The [`StoreRegistry`] that owns named connections
//!
//! ## Backends
//!
//! - [`DocumentAdapter`] - Any [`DocumentDriver`]; [`SqliteDocumentStore`]
//!   (shared file) and [`MemoryDocumentStore`] (single process) are bundled
//! - [`RelationalAdapter`] - SQLite through a [`ConnectionPool`]
//!
//! Both honor the same contract: unique violations surface as
//! [`StorageError::DuplicateKey`], every update bumps `_version`, and removal
//! follows the entity's [`RemoveMode`].
//!
//! ## Example
//!
//! ```rust
//! use entidal_storage::{
//!     Backend, Criteria, EntityMeta, FieldMeta, FieldType, FindOptions,
//!     RelationalStoreConfig, StoreRegistry,
//! };
//! use entidal_codec::{EntityValue, Value};
//!
//! let registry =
//!     StoreRegistry::connect(&[], &[RelationalStoreConfig::in_memory("main")]).unwrap();
//! let meta = EntityMeta::new("Note", Backend::Relational)
//!     .field(FieldMeta::new("title", FieldType::String))
//!     .with_system_fields();
//! let adapter = registry.adapter(&meta).unwrap();
//! adapter.sync_schema(&meta).unwrap();
//!
//! let mut note = EntityValue::new();
//! note.insert("title".into(), Value::from("hello"));
//! let id = adapter.insert(&meta, note).unwrap();
//!
//! let found = adapter
//!     .find_one(&meta, &Criteria::eq("_id", id), &FindOptions::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(found["title"], Value::from("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
pub mod config;
pub mod criteria;
pub mod document;
mod error;
mod ids;
mod meta;
pub mod relational;
mod registry;

pub use adapter::{FindOptions, Page, PageQuery, SchemaReport, StorageAdapter, UpdateResult};
pub use config::{
    DocumentStoreConfig, RelationalStoreConfig, MEMORY_DATABASE, MEMORY_SCHEME, SQLITE_SCHEME,
};
pub use criteria::{Criteria, Leaf, Operator};
pub use document::{
    DocumentAdapter, DocumentDriver, DriverError, MemoryDocumentStore, SqliteDocumentStore,
};
pub use error::{StorageError, StorageResult};
pub use ids::{new_object_id, now_millis};
pub use meta::{
    parse_field_value, Backend, EntityMeta, FieldMeta, FieldType, IndexMeta, RemoveMode, Repo,
    SortField, SortOrder, CREATED_BY_FIELD, CREATED_ON_FIELD, DEFAULT_STORE, HISTORY_OF_FIELD,
    ID_FIELD, MODIFIED_BY_FIELD, MODIFIED_ON_FIELD, VERSION_FIELD,
};
pub use registry::StoreRegistry;
pub use relational::{ConnectionPool, RelationalAdapter};
