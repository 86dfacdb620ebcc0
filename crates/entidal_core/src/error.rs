//! Error types for entidal core.
//!
//! Errors fall into three families. [`UserError`] and
//! [`CoreError::UniqueConflict`] are the caller's fault and map to a 4xx
//! response; [`SystemError`] and unclassified storage errors are server
//! faults and map to a 5xx response.

use entidal_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors caused by the caller's input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    /// Create was called with an empty instance.
    #[error("cannot create an empty entity")]
    CreateEmpty,

    /// The operation carries nothing to do.
    #[error("empty operation")]
    EmptyOperation,

    /// The named entity or row does not exist.
    #[error("no such entity: {0}")]
    NoSuchEntity(String),

    /// The criteria cannot run on the entity's backend.
    #[error("bad query criteria: {0}")]
    BadQueryCriteria(String),

    /// Bulk delete was requested with empty criteria.
    #[error("deleting all rows is forbidden")]
    DeleteAllForbidden,

    /// An optimistic update matched no row at the expected version.
    #[error("concurrent update on {entity}")]
    ConcurrentUpdate {
        /// Entity name.
        entity: String,
    },

    /// The requested history version does not exist.
    #[error("no history version {version} of {entity} {id}")]
    NoSuchHistory {
        /// Entity name.
        entity: String,
        /// Row id.
        id: String,
        /// Requested version.
        version: i64,
    },
}

impl UserError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            UserError::CreateEmpty => "CreateEmpty",
            UserError::EmptyOperation => "EmptyOperation",
            UserError::NoSuchEntity(_) => "NoSuchEntity",
            UserError::BadQueryCriteria(_) => "BadQueryCriteria",
            UserError::DeleteAllForbidden => "DeleteAllForbidden",
            UserError::ConcurrentUpdate { .. } => "ConcurrentUpdate",
            UserError::NoSuchHistory { .. } => "NoSuchHistory",
        }
    }
}

/// Invariant violations that point at a metadata or deployment bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SystemError {
    /// A field is used but not declared.
    #[error("no field meta for {entity}.{field}")]
    NoFieldMeta {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// The entity names a store that is not configured.
    #[error("no {backend} store named {name}")]
    NoStore {
        /// Backend family.
        backend: String,
        /// Store name.
        name: String,
    },

    /// The entity is not persisted.
    #[error("entity {0} has no storage backend")]
    NoBackend(String),
}

impl SystemError {
    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SystemError::NoFieldMeta { .. } => "NoFieldMeta",
            SystemError::NoStore { .. } => "NoStore",
            SystemError::NoBackend(_) => "NoBackend",
        }
    }
}

/// Errors that can occur in entidal core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The caller's input was rejected.
    #[error(transparent)]
    User(#[from] UserError),

    /// A unique index rejected a write.
    #[error("{message}")]
    UniqueConflict {
        /// Human readable message from the index declaration.
        message: String,
        /// Declared index name, when it could be matched.
        index: Option<String>,
    },

    /// A metadata or deployment invariant is broken.
    #[error(transparent)]
    System(#[from] SystemError),

    /// Unclassified storage error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Cache store error.
    #[error("cache error: {message}")]
    Cache {
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid config: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A listener failed.
    #[error("listener failed: {message}")]
    Listener {
        /// Description of the failure.
        message: String,
    },
}

/// Serializable `{code, message}` body of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl CoreError {
    /// Creates a cache error.
    pub fn cache(message: impl ToString) -> Self {
        Self::Cache {
            message: message.to_string(),
        }
    }

    /// Creates a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a listener error.
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::User(e) => e.code(),
            CoreError::UniqueConflict { .. } => "DupKey",
            CoreError::System(e) => e.code(),
            CoreError::Storage(_) => "StorageError",
            CoreError::Cache { .. } => "CacheError",
            CoreError::Config { .. } => "ConfigError",
            CoreError::Listener { .. } => "ListenerError",
        }
    }

    /// The `{code, message}` body shown to clients.
    ///
    /// Server errors get a generic message; their detail stays in the logs.
    pub fn describe(&self) -> ErrorBody {
        let message = if self.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        ErrorBody {
            code: self.code().to_string(),
            message,
        }
    }

    /// Returns true if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, CoreError::User(_) | CoreError::UniqueConflict { .. })
    }

    /// Returns true if this is a server error (5xx equivalent).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateKey { index, message } => {
                CoreError::UniqueConflict { message, index }
            }
            StorageError::UnboundedDelete => UserError::DeleteAllForbidden.into(),
            StorageError::BadCriteria(reason) => UserError::BadQueryCriteria(reason).into(),
            StorageError::UnknownField { entity, field } => {
                SystemError::NoFieldMeta { entity, field }.into()
            }
            StorageError::UnknownStore { backend, name } => SystemError::NoStore {
                backend: backend.to_string(),
                name,
            }
            .into(),
            StorageError::NoBackend(entity) => SystemError::NoBackend(entity).into(),
            other => CoreError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_become_unique_conflicts() {
        let err = CoreError::from(StorageError::DuplicateKey {
            index: Some("username".into()),
            message: "username already taken".into(),
        });
        assert_eq!(err.code(), "DupKey");
        assert!(err.is_client_error());
        assert_eq!(
            err.describe(),
            ErrorBody {
                code: "DupKey".into(),
                message: "username already taken".into(),
            }
        );
    }

    #[test]
    fn storage_classification() {
        assert_eq!(CoreError::from(StorageError::UnboundedDelete).code(), "DeleteAllForbidden");
        assert_eq!(
            CoreError::from(StorageError::unknown_field("User", "x")).code(),
            "NoFieldMeta"
        );
        assert_eq!(
            CoreError::from(StorageError::bad_criteria("native")).code(),
            "BadQueryCriteria"
        );
        let pool = CoreError::from(StorageError::PoolTimeout("main".into()));
        assert!(pool.is_server_error());
        assert_eq!(pool.describe().message, "internal error");
    }

    #[test]
    fn user_error_codes() {
        let err = CoreError::from(UserError::ConcurrentUpdate {
            entity: "User".into(),
        });
        assert_eq!(err.code(), "ConcurrentUpdate");
        assert_eq!(err.to_string(), "concurrent update on User");
        assert!(CoreError::from(SystemError::NoBackend("X".into())).is_server_error());
    }
}
