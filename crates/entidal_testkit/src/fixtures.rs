//! Test fixtures and runtime helpers.
//!
//! Provides sample entity metadata and runtimes for each backend, with
//! their storage in temporary directories.

use entidal_codec::{EntityValue, Value};
use entidal_core::{Config, Context, MetaRegistry, Runtime, SharedCacheConfig};
use entidal_storage::{
    Backend, DocumentStoreConfig, EntityMeta, FieldMeta, FieldType, IndexMeta,
    RelationalStoreConfig, RemoveMode, SortOrder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Hard-deleted entity with a unique username.
pub const USER: &str = "User";
/// Entity removed to the trash.
pub const ARTICLE: &str = "Article";
/// Entity that archives every change.
pub const PAGE: &str = "Page";
/// Singleton entity.
pub const SETTINGS: &str = "Settings";
/// Entity that bypasses the service cache.
pub const AUDIT: &str = "Audit";

/// Message of the username unique index.
pub const USERNAME_TAKEN: &str = "username already taken";
/// Message of the page slug unique index.
pub const SLUG_TAKEN: &str = "slug already taken";

/// `User`: username (unique), name, age, score, active, tags, profile.
pub fn user_meta(backend: Backend) -> EntityMeta {
    EntityMeta::new(USER, backend)
        .table("users")
        .field(FieldMeta::new("username", FieldType::String).required(true))
        .field(FieldMeta::new("name", FieldType::String))
        .field(FieldMeta::new("age", FieldType::Int))
        .field(FieldMeta::new("score", FieldType::Float))
        .field(FieldMeta::new("active", FieldType::Boolean))
        .field(FieldMeta::new("tags", FieldType::String).multiple(true))
        .field(FieldMeta::new("profile", FieldType::Component))
        .index(
            IndexMeta::new("username")
                .field("username", SortOrder::Asc)
                .unique(true)
                .error_message(USERNAME_TAKEN),
        )
        .index(IndexMeta::new("age").field("age", SortOrder::Desc))
}

/// `Article`: title, views; removed to the trash.
pub fn article_meta(backend: Backend) -> EntityMeta {
    EntityMeta::new(ARTICLE, backend)
        .field(FieldMeta::new("title", FieldType::String))
        .field(FieldMeta::new("views", FieldType::Int))
        .remove_mode(RemoveMode::Trash)
}

/// `Page`: title, body, slug (unique when set); every change is archived.
pub fn page_meta(backend: Backend) -> EntityMeta {
    EntityMeta::new(PAGE, backend)
        .field(FieldMeta::new("title", FieldType::String))
        .field(FieldMeta::new("body", FieldType::String))
        .field(FieldMeta::new("slug", FieldType::String))
        .index(
            IndexMeta::new("slug")
                .field("slug", SortOrder::Asc)
                .unique(true)
                .sparse(true)
                .error_message(SLUG_TAKEN),
        )
        .remove_mode(RemoveMode::History)
}

/// `Settings`: a singleton.
pub fn settings_meta(backend: Backend) -> EntityMeta {
    EntityMeta::new(SETTINGS, backend)
        .field(FieldMeta::new("siteName", FieldType::String))
        .singleton(true)
}

/// `Audit`: never cached.
pub fn audit_meta(backend: Backend) -> EntityMeta {
    EntityMeta::new(AUDIT, backend)
        .field(FieldMeta::new("action", FieldType::String))
        .no_service_cache(true)
}

/// Every sample entity on `backend`.
pub fn sample_metas(backend: Backend) -> Vec<EntityMeta> {
    vec![
        user_meta(backend),
        article_meta(backend),
        page_meta(backend),
        settings_meta(backend),
        audit_meta(backend),
    ]
}

/// Context of the test operator.
pub fn ctx() -> Context {
    Context::new("tester")
}

/// Builds a row from a JSON object literal.
///
/// # Panics
///
/// Panics if `json` is not an object.
pub fn row(json: serde_json::Value) -> EntityValue {
    match Value::from(json) {
        Value::Map(map) => map,
        other => panic!("expected an object, got {}", other.type_name()),
    }
}

/// A runtime over the sample entities, cleaned up on drop.
pub struct TestRuntime {
    /// The runtime.
    pub runtime: Runtime,
    backend: Backend,
    _temp_dir: TempDir,
}

impl TestRuntime {
    /// A runtime whose sample entities live in the bundled document store.
    pub fn document() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self::open(Backend::Document, local_config(Backend::Document, &temp_dir), temp_dir)
    }

    /// A runtime whose sample entities live in a SQLite file.
    pub fn relational() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self::open(Backend::Relational, local_config(Backend::Relational, &temp_dir), temp_dir)
    }

    /// A runtime for `backend`.
    ///
    /// # Panics
    ///
    /// Panics for [`Backend::None`].
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Document => Self::document(),
            Backend::Relational => Self::relational(),
            Backend::None => panic!("no runtime for unpersisted entities"),
        }
    }

    fn open(backend: Backend, config: Config, temp_dir: TempDir) -> Self {
        let metas = Arc::new(MetaRegistry::with_metas(sample_metas(backend)));
        let runtime = Runtime::open(config, metas).expect("Failed to open runtime");
        runtime.sync_storage().expect("Failed to sync storage");
        Self {
            runtime,
            backend,
            _temp_dir: temp_dir,
        }
    }

    /// Backend of the sample entities.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Directory holding this runtime's files.
    pub fn dir(&self) -> PathBuf {
        self._temp_dir.path().to_path_buf()
    }
}

impl std::ops::Deref for TestRuntime {
    type Target = Runtime;

    fn deref(&self) -> &Self::Target {
        &self.runtime
    }
}

fn local_config(backend: Backend, dir: &TempDir) -> Config {
    match backend {
        Backend::Relational => Config::new().relational_store(RelationalStoreConfig::new(
            "main",
            dir.path().join("main.db").to_string_lossy(),
        )),
        _ => Config::new().document_store(DocumentStoreConfig::sqlite(
            "main",
            dir.path().join("documents.db").to_string_lossy(),
        )),
    }
}

/// Two runtimes sharing their stores and cache, as two processes of one
/// cluster would.
pub struct TestCluster {
    /// First process.
    pub first: Runtime,
    /// Second process.
    pub second: Runtime,
    _temp_dir: TempDir,
}

impl TestCluster {
    /// Opens two cluster runtimes over the sample entities on `backend`.
    ///
    /// The poll interval is long, so tests deliver bus events with
    /// [`Runtime::poll_bus`].
    pub fn open(backend: Backend) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let shared = SharedCacheConfig::new(temp_dir.path().join("cache.db"))
            .poll_interval(Duration::from_secs(3600));
        let config = local_config(backend, &temp_dir).cluster(shared);
        let open = || {
            let metas = Arc::new(MetaRegistry::with_metas(sample_metas(backend)));
            Runtime::open(config.clone(), metas).expect("Failed to open cluster runtime")
        };
        let first = open();
        let second = open();
        first.sync_storage().expect("Failed to sync storage");
        Self {
            first,
            second,
            _temp_dir: temp_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidal_core::ListOptions;

    #[test]
    fn runtimes_open_for_each_backend() {
        for backend in [Backend::Document, Backend::Relational] {
            let rt = TestRuntime::for_backend(backend);
            assert_eq!(rt.backend(), backend);
            assert!(rt.service().entity_meta(USER).is_ok());
        }
    }

    #[test]
    fn row_builds_maps() {
        let r = row(serde_json::json!({"a": 1, "b": [true]}));
        assert_eq!(r["a"], Value::Integer(1));
    }

    #[test]
    fn cluster_shares_document_store() {
        let cluster = TestCluster::open(Backend::Document);
        let id = cluster
            .first
            .service()
            .create(&ctx(), ARTICLE, row(serde_json::json!({"title": "t"})))
            .unwrap();
        let seen = cluster
            .second
            .service()
            .find_one_by_id(ARTICLE, id.clone(), &Default::default())
            .unwrap();
        assert!(seen.is_some());
        let listed = cluster
            .second
            .service()
            .list(ARTICLE, &ListOptions::default())
            .unwrap();
        assert_eq!(listed.rows.len(), 1);
        assert_eq!(listed.rows[0]["_id"], id);
        assert_eq!(listed.total, Some(1));
    }

    #[test]
    fn cluster_processes_do_not_share_drivers() {
        let cluster = TestCluster::open(Backend::Document);
        let first = cluster.first.stores().document_driver("main").unwrap();
        let second = cluster.second.stores().document_driver("main").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
