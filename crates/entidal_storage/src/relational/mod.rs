//! Relational backend on SQLite.
//!
//! Scalar fields map onto native columns; nested, multi-valued and binary
//! fields are stored as type-tagged envelope text. Schema changes are
//! additive only.

mod adapter;
mod pool;
mod schema;
pub(crate) mod values;

pub use adapter::RelationalAdapter;
pub use pool::{ConnectionPool, PooledConnection, UnitOfWork};
