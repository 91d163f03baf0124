//! Database configuration.

use std::path::PathBuf;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory under which `<db_name>.yourdb` lives
    pub root_dir: PathBuf,
    /// Number of shard logs per entity (applies at entity creation)
    pub shard_count: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            shard_count: 10,
        }
    }
}
