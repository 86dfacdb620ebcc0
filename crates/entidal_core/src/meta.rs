//! Entity metadata lookup.

use crate::error::{CoreError, CoreResult};
use entidal_storage::{Backend, EntityMeta};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Source of entity metadata.
///
/// The schema management layer owns the metadata; the access service only
/// reads it.
pub trait MetaProvider: Send + Sync {
    /// Metadata of `name`, if such an entity exists.
    fn entity_meta(&self, name: &str) -> Option<Arc<EntityMeta>>;

    /// Every known entity.
    fn entity_metas(&self) -> Vec<Arc<EntityMeta>>;
}

/// A [`MetaProvider`] holding metadata in memory.
///
/// Persisted entities get their system fields patched in on registration.
#[derive(Debug, Default)]
pub struct MetaRegistry {
    metas: RwLock<BTreeMap<String, Arc<EntityMeta>>>,
}

impl MetaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `metas`.
    pub fn with_metas(metas: impl IntoIterator<Item = EntityMeta>) -> Self {
        let registry = Self::new();
        for meta in metas {
            registry.register(meta);
        }
        registry
    }

    /// Reads a JSON array of entity metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))?;
        let metas: Vec<EntityMeta> = serde_json::from_str(&text)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))?;
        Ok(Self::with_metas(metas))
    }

    /// Adds or replaces an entity.
    pub fn register(&self, meta: EntityMeta) -> Arc<EntityMeta> {
        let meta = if meta.db == Backend::None {
            meta
        } else {
            meta.with_system_fields()
        };
        let meta = Arc::new(meta);
        self.metas
            .write()
            .insert(meta.name.clone(), Arc::clone(&meta));
        meta
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.metas.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.metas.read().is_empty()
    }
}

impl MetaProvider for MetaRegistry {
    fn entity_meta(&self, name: &str) -> Option<Arc<EntityMeta>> {
        self.metas.read().get(name).cloned()
    }

    fn entity_metas(&self) -> Vec<Arc<EntityMeta>> {
        self.metas.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidal_storage::{ID_FIELD, VERSION_FIELD};

    #[test]
    fn registration_patches_system_fields() {
        let registry = MetaRegistry::new();
        registry.register(EntityMeta::new("User", Backend::Relational));
        registry.register(EntityMeta::new("Form", Backend::None));

        let user = registry.entity_meta("User").unwrap();
        assert!(user.field_meta(ID_FIELD).is_some());
        assert!(user.field_meta(VERSION_FIELD).is_some());
        assert!(registry.entity_meta("Form").unwrap().fields.is_empty());
        assert!(registry.entity_meta("Nope").is_none());
        assert_eq!(registry.entity_metas().len(), 2);
    }

    #[test]
    fn reads_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metas.json");
        std::fs::write(
            &path,
            r#"[{"name": "User", "db": "mongodb", "removeMode": "toTrash",
                 "fields": {"username": {"name": "username", "type": "String"}}}]"#,
        )
        .unwrap();
        let registry = MetaRegistry::from_json_file(&path).unwrap();
        let user = registry.entity_meta("User").unwrap();
        assert_eq!(user.db, Backend::Document);
        assert_eq!(user.remove_mode, entidal_storage::RemoveMode::Trash);
        assert!(MetaRegistry::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
