//! Storage engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// Storage engine operation errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity name is not a valid identifier
    #[error("Invalid entity name '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidName(String),

    /// Schema failed structural validation
    #[error("Invalid schema for entity '{entity}': {reason}")]
    InvalidSchema { entity: String, reason: String },

    /// Entity already exists
    #[error("Entity '{0}' already exists")]
    EntityExists(String),

    /// Entity does not exist
    #[error("Entity '{0}' does not exist")]
    EntityMissing(String),

    /// Field value does not match the schema's declared type
    #[error("Type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    /// Field is not declared in the schema
    #[error("Field '{field}' is not declared in the schema")]
    UnknownField { field: String },

    /// Primary-key field is null or absent
    #[error("Primary key '{field}' cannot be null")]
    NullPrimaryKey { field: String },

    /// Insert with a primary key already present
    #[error("Duplicate primary key {key}")]
    DuplicatePrimaryKey { key: String },

    /// Class tag has no registered constructor
    #[error("No registered class for tag '{0}'")]
    UnknownClass(String),

    /// Version gap in a class upgrade chain
    #[error("No upgrader registered for class '{class}' from version {from}")]
    MissingUpgrader { class: String, from: u32 },

    /// Malformed line encountered during replay (fatal for the entity)
    #[error("Corrupt log {} at line {line}: {reason}", .path.display())]
    CorruptLog {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    /// Update mutator returned a record with a different primary key
    #[error("Mutator changed the primary key of record {key}")]
    PrimaryKeyChanged { key: String },

    /// Encode/decode error outside of replay
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error during append, replay, or compaction
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage engine operations.
pub type Result<T> = std::result::Result<T, DbError>;
