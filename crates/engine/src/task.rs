// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedulable task units
//!
//! Tasks are transient: they live in the scheduler's in-memory queue and
//! their durable trace is the operations they create. A task body receives a
//! cancellable context with a handle back to the operation log and the
//! per-operation log blob store.

use crate::oplog::OpLog;
use cairn_core::{OpKind, OperationId};
use cairn_storage::{LogStoreError, TaskLogStore, TaskLogWriter};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

/// How a task body failed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// Recorded once on the operation, never retried
    #[error("task failed: {0}")]
    Permanent(String),
    /// Retried with exponential backoff up to the attempt ceiling
    #[error("transient task failure: {0}")]
    Transient(String),
}

/// Execution context handed to a running task body
pub struct TaskContext {
    op_id: OperationId,
    oplog: Arc<OpLog>,
    logs: Arc<TaskLogStore>,
    cancel: watch::Receiver<bool>,
}

impl TaskContext {
    pub(crate) fn new(
        op_id: OperationId,
        oplog: Arc<OpLog>,
        logs: Arc<TaskLogStore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            op_id,
            oplog,
            logs,
            cancel,
        }
    }

    /// The operation this execution is recorded under
    pub fn op_id(&self) -> OperationId {
        self.op_id
    }

    /// Handle to create/update operations as the task progresses
    pub fn oplog(&self) -> &Arc<OpLog> {
        &self.oplog
    }

    /// Append writer for this operation's log blob
    pub fn log_writer(&self) -> Result<TaskLogWriter, LogStoreError> {
        self.logs.writer(self.op_id)
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve when shutdown is requested. Task bodies doing long external
    /// work should select against this.
    pub async fn cancelled(&mut self) {
        while !*self.cancel.borrow() {
            if self.cancel.changed().await.is_err() {
                return;
            }
        }
    }

    /// Borrow the raw cancellation signal, for selecting alongside I/O
    pub fn cancel_signal(&mut self) -> &mut watch::Receiver<bool> {
        &mut self.cancel
    }
}

/// A schedulable unit of work
#[async_trait::async_trait]
pub trait Task: Send {
    /// Short label for logs ("backup", "prune", ...)
    fn kind(&self) -> &str;
    /// Target repository; at most one task runs per repository at a time
    fn repo_id(&self) -> &str;
    fn plan_id(&self) -> &str;
    /// Initial payload of the operation created for this execution
    fn op_kind(&self) -> OpKind;
    /// Interval at which the task re-schedules itself after reaching a
    /// terminal status; `None` for one-off tasks
    fn recurrence(&self) -> Option<std::time::Duration> {
        None
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError>;
}

/// Heap entry ordering scheduled tasks by due time, FIFO among equals
pub(crate) struct ScheduledEntry {
    pub due: Instant,
    pub seq: u64,
    /// Completed runs of this entry (drives backoff)
    pub attempts: u32,
    /// Set once the first attempt has created the operation
    pub op_id: Option<OperationId>,
    pub task: Box<dyn Task>,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Min-heap: earliest due first, then insertion order
        other
            .due
            .cmp(&self.due)
            .then(other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
