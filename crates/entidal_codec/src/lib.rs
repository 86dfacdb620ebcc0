//! # entidal Codec
//!
//! Dynamic values for metadata-driven entities.
//!
//! Entities are described by schema records rather than Rust types, so rows
//! travel through the system as [`EntityValue`] maps of [`Value`]s. This
//! crate provides:
//! - The [`Value`] model with loose comparison used by query matching
//! - A plain JSON mapping for the wire (`serde` support)
//! - A type-tagged `{type, value}` envelope that preserves dates, object ids
//!   and bytes through flat text storage
//!
//! ## Usage
//!
//! ```
//! use entidal_codec::{from_envelope_str, to_envelope_string, Value};
//!
//! let value = Value::Array(vec![Value::Date(1_700_000_000_000), Value::from("x")]);
//! let text = to_envelope_string(&value).unwrap();
//! assert_eq!(from_envelope_str(&text).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod json;
mod value;

pub use decoder::{from_envelope, from_envelope_str};
pub use encoder::{to_envelope, to_envelope_string};
pub use error::{CodecError, CodecResult};
pub use value::{EntityValue, Value};
