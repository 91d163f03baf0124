//! One shard: an append-only operation log and its materialized map.
//!
//! The log holds one entry per line. Replay applies entries in order to an
//! empty map: INSERT installs (overwriting any prior record with the same
//! key), UPDATE merges a partial field map into the existing record, DELETE
//! removes. Updates and deletes of absent keys are silent no-ops because
//! compaction may have truncated the history they referred to.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{self, LogOp};
use crate::error::{DbError, Result};
use crate::registry::TypeRegistry;
use crate::value::{FieldMap, FieldValue, Record};

pub struct Shard {
    path: PathBuf,
    /// Append handle, kept open for the entity's lifetime. Writes are
    /// serialized by the entity writer lock.
    log: File,
    pub(crate) records: HashMap<FieldValue, Arc<Record>>,
    registry: Arc<TypeRegistry>,
}

impl Shard {
    /// Opens (or creates) the shard log and replays it into memory.
    pub fn open(path: PathBuf, pk_field: &str, registry: Arc<TypeRegistry>) -> Result<Self> {
        let records = if path.exists() {
            replay(&path, pk_field, &registry)?
        } else {
            HashMap::new()
        };
        let log = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            log,
            records,
            registry,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, pk: &FieldValue) -> Option<&Arc<Record>> {
        self.records.get(pk)
    }

    pub fn append_insert(&mut self, record: &Record) -> Result<()> {
        let line = codec::encode_insert(record, &self.registry)?;
        self.append_line(&line)
    }

    pub fn append_update(&mut self, pk: &FieldValue, diff: &FieldMap) -> Result<()> {
        let line = codec::encode_update(pk, diff, &self.registry)?;
        self.append_line(&line)
    }

    pub fn append_delete(&mut self, pk: &FieldValue) -> Result<()> {
        let line = codec::encode_delete(pk, &self.registry)?;
        self.append_line(&line)
    }

    fn append_line(&mut self, line: &str) -> Result<()> {
        self.log.write_all(line.as_bytes())?;
        self.log.write_all(b"\n")?;
        self.log.flush()?;
        Ok(())
    }

    /// Compacts the log: one INSERT per live record, written to a sibling
    /// temp file and renamed into place, then the append handle reopened.
    /// On a crash either the old or the new file survives intact.
    pub fn rewrite(&mut self) -> Result<()> {
        let temp = self.path.with_extension("log.tmp");
        {
            let mut file = File::create(&temp)?;
            for record in self.records.values() {
                let line = codec::encode_insert(record, &self.registry)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&temp, &self.path)?;
        self.log = OpenOptions::new().append(true).open(&self.path)?;
        tracing::debug!(path = %self.path.display(), records = self.records.len(), "compacted shard log");
        Ok(())
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .finish()
    }
}

fn replay(
    path: &Path,
    pk_field: &str,
    registry: &TypeRegistry,
) -> Result<HashMap<FieldValue, Arc<Record>>> {
    let corrupt = |line: u64, reason: String| DbError::CorruptLog {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let reader = BufReader::new(File::open(path)?);
    let mut records: HashMap<FieldValue, Arc<Record>> = HashMap::new();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index as u64 + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let op = match codec::decode_op(&line, registry) {
            Ok(op) => op,
            // Grammar violations become CorruptLog with position context;
            // registry failures (UnknownClass, MissingUpgrader, upgrader
            // errors) keep their own kind.
            Err(DbError::Serialization(reason)) => return Err(corrupt(line_no, reason)),
            Err(other) => return Err(other),
        };
        match op {
            LogOp::Insert { data } => {
                let pk = data.get(pk_field).cloned().ok_or_else(|| {
                    corrupt(line_no, format!("INSERT without primary key '{pk_field}'"))
                })?;
                records.insert(pk, Arc::new(data));
            }
            LogOp::Update { pk, data } => {
                if let Some(existing) = records.get(&pk) {
                    let mut merged = (**existing).clone();
                    merged.fields.extend(data);
                    records.insert(pk, Arc::new(merged));
                }
            }
            LogOp::Delete { pk } => {
                records.remove(&pk);
            }
        }
    }
    tracing::debug!(path = %path.display(), records = records.len(), "replayed shard log");
    Ok(records)
}
