//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Float values must be finite to be representable in JSON.
    #[error("non-finite float values cannot be encoded")]
    NonFiniteFloat,

    /// The envelope is not shaped as `{type, value}`.
    #[error("invalid envelope: {message}")]
    InvalidEnvelope {
        /// Description of the structural error.
        message: String,
    },

    /// The envelope carries an unknown type tag.
    #[error("unknown envelope type: {type_name}")]
    UnknownType {
        /// The tag that was found.
        type_name: String,
    },

    /// The payload is not valid JSON text.
    #[error("malformed JSON: {message}")]
    Malformed {
        /// Parser message.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid envelope error.
    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed {
            message: err.to_string(),
        }
    }
}
