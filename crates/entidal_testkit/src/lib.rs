//! # Entidal Testkit
//!
//! Test utilities for entidal.
//!
//! This crate provides:
//! - Sample entity metadata for every remove mode
//! - [`TestRuntime`] fixtures for each backend, cleaned up on drop
//! - A two-process cluster simulation over one shared cache file
//! - Property-based generators for criteria trees and field values
//!
//! ## Usage
//!
//! ```rust
//! use entidal_testkit::prelude::*;
//!
//! let rt = TestRuntime::relational();
//! let id = rt
//!     .service()
//!     .create(&ctx(), USER, row(serde_json::json!({"username": "a"})))
//!     .unwrap();
//! assert!(rt.service().find_one_by_id(USER, id, &Default::default()).unwrap().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
