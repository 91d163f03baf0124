//! Embedded, sharded, log-structured object store.
//!
//! Every mutation appends one line to a per-shard operation log; the
//! authoritative state lives in memory and is rebuilt by replaying the
//! logs at open. Entities are schema-bound, enforce primary-key
//! uniqueness, and can carry secondary indexes consulted by the filter
//! planner. Stored composites are versioned and upgrade lazily on read
//! through registered upgrade chains; `optimize` compacts the logs to one
//! current-version INSERT per live record.

pub mod codec;
pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod index;
pub mod query;
pub mod registry;
pub mod schema;
pub mod shard;
pub mod value;

pub use config::DbConfig;
pub use db::YourDb;
pub use error::{DbError, Result};
pub use query::{Criterion, Filter, Op, Operand};
pub use registry::TypeRegistry;
pub use schema::{EntitySchema, FieldType};
pub use value::{FieldMap, FieldValue, Record};
