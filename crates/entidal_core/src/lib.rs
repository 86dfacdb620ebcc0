//! # Entidal Core
//!
//! Metadata-driven entity access with a read-through cache.
//!
//! This crate provides:
//! - The [`EntityAccessService`] façade: create, update, remove, recover,
//!   find, list and history operations over any configured backend
//! - The [`CacheLayer`] with a process-local and a shared store
//! - Entity events, delivered to local listeners and, in cluster mode,
//!   to the listeners of every other process through the [`Bus`]
//! - The [`Runtime`] that wires stores, cache and bus together
//!
//! ## Quick Start
//!
//! ```rust
//! use entidal_core::{Config, Context, MetaRegistry, Runtime};
//! use entidal_storage::{Backend, EntityMeta, FieldMeta, FieldType, RelationalStoreConfig};
//! use entidal_codec::{EntityValue, Value};
//! use std::sync::Arc;
//!
//! let metas = MetaRegistry::new();
//! metas.register(
//!     EntityMeta::new("Note", Backend::Relational)
//!         .field(FieldMeta::new("title", FieldType::String)),
//! );
//! let config = Config::new().relational_store(RelationalStoreConfig::in_memory("main"));
//! let runtime = Runtime::open(config, Arc::new(metas)).unwrap();
//! runtime.sync_storage().unwrap();
//!
//! let service = runtime.service();
//! let ctx = Context::new("alice");
//! let mut note = EntityValue::new();
//! note.insert("title".into(), Value::from("hello"));
//! let id = service.create(&ctx, "Note", note).unwrap();
//!
//! let found = service
//!     .find_one_by_id("Note", id, &Default::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(found["_version"], Value::Integer(1));
//! assert_eq!(found["_createdBy"], Value::from("alice"));
//! ```
//!
//! ## Errors
//!
//! Every failure is a [`CoreError`]. Client errors ([`UserError`] and
//! unique conflicts) carry a stable code and a message safe to show;
//! server errors are logged and described generically.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
mod config;
mod context;
mod error;
mod events;
mod meta;
mod runtime;
mod service;
mod stats;

pub use cache::{Bus, CacheLayer, CacheStore, LocalCache, SharedCache};
pub use config::{Config, SharedCacheConfig};
pub use context::{Context, SYSTEM_OPERATOR};
pub use error::{CoreError, CoreResult, ErrorBody, SystemError, UserError};
pub use events::{EntityEvent, EntityListener, EntityListeners, EventKind};
pub use meta::{MetaProvider, MetaRegistry};
pub use runtime::Runtime;
pub use service::{EntityAccessService, ListOptions, ListResult, UpdateOptions};
pub use stats::{ServiceStats, StatsSnapshot};
