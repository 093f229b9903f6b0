// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-operation log blobs
//!
//! Task output is forwarded line by line into a blob keyed by operation ID.
//! Blobs are garbage-collected when their operation is deleted from the log.

use cairn_core::OperationId;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the task log store
#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Blob storage for per-operation task logs
#[derive(Clone)]
pub struct TaskLogStore {
    dir: PathBuf,
}

impl TaskLogStore {
    /// Open a log store rooted at the given directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, LogStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: OperationId) -> PathBuf {
        self.dir.join(format!("{}.log", id))
    }

    /// Open an append writer for the operation's blob, creating it if needed
    pub fn writer(&self, id: OperationId) -> Result<TaskLogWriter, LogStoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(id))?;
        Ok(TaskLogWriter { file })
    }

    /// Read the full blob for an operation; empty when none exists
    pub fn read(&self, id: OperationId) -> Result<Vec<u8>, LogStoreError> {
        match std::fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the blob for an operation; missing blobs are not an error
    pub fn delete(&self, id: OperationId) -> Result<(), LogStoreError> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a blob exists for the operation
    pub fn exists(&self, id: OperationId) -> bool {
        self.path_for(id).exists()
    }
}

/// Append handle for one operation's blob
pub struct TaskLogWriter {
    file: File,
}

impl Write for TaskLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
#[path = "logstore_tests.rs"]
mod tests;
