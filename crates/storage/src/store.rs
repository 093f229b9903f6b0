// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal-backed operation store
//!
//! The journal is a JSON-lines file of put/delete records; replaying it in
//! order rebuilds the index. An exclusive file lock guards the data directory
//! so a second instance fails fast instead of corrupting the journal.

use cairn_core::{Operation, OperationId, Query};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the operation store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store at {0} is locked by another instance")]
    Locked(PathBuf),
    #[error("journal corrupt at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("operation not found: {0}")]
    NotFound(OperationId),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
enum JournalEntry {
    Put { op: Operation },
    Del { id: OperationId },
}

/// Indexed durable storage for operations
///
/// Writes go to the journal before the index mutates, so a crash mid-write
/// loses at most the entry being written.
#[derive(Debug)]
pub struct OpStore {
    journal: File,
    index: BTreeMap<OperationId, Operation>,
    // NOTE(lifetime): held to maintain the exclusive directory lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
}

impl OpStore {
    /// Open or create a store in the given directory.
    ///
    /// Fails with `StoreError::Locked` when another live instance holds the
    /// directory; that condition is fatal at startup and must not be retried.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;

        let lock_path = dir.join("oplog.lock");
        let lock_file = File::create(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.to_path_buf()))?;

        let journal_path = dir.join("oplog.jsonl");
        let index = Self::replay(&journal_path)?;
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)?;

        Ok(Self {
            journal,
            index,
            lock_file,
        })
    }

    fn replay(path: &Path) -> Result<BTreeMap<OperationId, Operation>, StoreError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut index = BTreeMap::new();

        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line)
                .map_err(|source| StoreError::Corrupt { line: n + 1, source })?;
            match entry {
                JournalEntry::Put { op } => {
                    index.insert(op.id, op);
                }
                JournalEntry::Del { id } => {
                    index.remove(&id);
                }
            }
        }

        Ok(index)
    }

    fn append(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        let line = serde_json::to_string(entry)?;
        writeln!(self.journal, "{}", line)?;
        self.journal.sync_all()?;
        Ok(())
    }

    /// Insert a new record
    pub fn insert(&mut self, op: Operation) -> Result<(), StoreError> {
        self.append(&JournalEntry::Put { op: op.clone() })?;
        self.index.insert(op.id, op);
        Ok(())
    }

    /// Replace an existing record in full
    pub fn update(&mut self, op: Operation) -> Result<(), StoreError> {
        if !self.index.contains_key(&op.id) {
            return Err(StoreError::NotFound(op.id));
        }
        self.append(&JournalEntry::Put { op: op.clone() })?;
        self.index.insert(op.id, op);
        Ok(())
    }

    /// Remove a record, returning its pre-deletion snapshot
    pub fn remove(&mut self, id: OperationId) -> Result<Operation, StoreError> {
        if !self.index.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.append(&JournalEntry::Del { id })?;
        // contains_key checked above
        match self.index.remove(&id) {
            Some(op) => Ok(op),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Fetch a single record
    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.index.get(&id)
    }

    /// Scan records matching the query, ID ascending
    pub fn scan(&self, query: &Query) -> Vec<Operation> {
        let range = match (query.id_min, query.id_max) {
            (Some(min), Some(max)) if min > max => return Vec::new(),
            (min, max) => (
                min.map_or(std::ops::Bound::Unbounded, std::ops::Bound::Included),
                max.map_or(std::ops::Bound::Unbounded, std::ops::Bound::Included),
            ),
        };
        self.index
            .range(range)
            .map(|(_, op)| op)
            .filter(|op| query.matches(op))
            .cloned()
            .collect()
    }

    /// Replace several records as one journal batch.
    ///
    /// Every ID must already exist; nothing is journaled or applied
    /// otherwise. Used by migration passes that must not commit partially.
    pub fn apply_batch(&mut self, ops: Vec<Operation>) -> Result<(), StoreError> {
        for op in &ops {
            if !self.index.contains_key(&op.id) {
                return Err(StoreError::NotFound(op.id));
            }
        }
        let mut lines = String::new();
        for op in &ops {
            lines.push_str(&serde_json::to_string(&JournalEntry::Put { op: op.clone() })?);
            lines.push('\n');
        }
        self.journal.write_all(lines.as_bytes())?;
        self.journal.sync_all()?;
        for op in ops {
            self.index.insert(op.id, op);
        }
        Ok(())
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
