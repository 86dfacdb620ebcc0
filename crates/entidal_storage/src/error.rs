//! Error types for storage operations.

use crate::document::DriverError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the storage adapters.
///
/// Native driver errors are classified at the adapter boundary: duplicate
/// keys become [`StorageError::DuplicateKey`] while everything else is passed
/// through unchanged in the `Sqlite` / `Driver` variants.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique index rejected the write.
    #[error("{message}")]
    DuplicateKey {
        /// Declared index name, when it could be matched.
        index: Option<String>,
        /// Human readable message from the index declaration.
        message: String,
    },

    /// Bulk delete was requested without any criteria.
    #[error("deleting all rows is forbidden")]
    UnboundedDelete,

    /// A field is not declared in the entity metadata.
    #[error("no field meta for {entity}.{field}")]
    UnknownField {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// Criteria could not be compiled for this backend.
    #[error("bad criteria: {0}")]
    BadCriteria(String),

    /// No store is registered under the requested name.
    #[error("no {backend} store named {name}")]
    UnknownStore {
        /// Backend family.
        backend: &'static str,
        /// Store name.
        name: String,
    },

    /// The entity declares no storage backend.
    #[error("entity {0} has no storage backend")]
    NoBackend(String),

    /// A connection string could not be understood.
    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    /// Timed out waiting for a pooled connection.
    #[error("timed out waiting for a connection from pool {0}")]
    PoolTimeout(String),

    /// Relational driver error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Document driver error.
    #[error("document store error: {0}")]
    Driver(#[from] DriverError),

    /// Value encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] entidal_codec::CodecError),
}

impl StorageError {
    /// Creates a bad criteria error.
    pub fn bad_criteria(message: impl Into<String>) -> Self {
        Self::BadCriteria(message.into())
    }

    /// Creates an unknown field error.
    pub fn unknown_field(entity: &str, field: &str) -> Self {
        Self::UnknownField {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    /// Returns true for a classified duplicate key error.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
