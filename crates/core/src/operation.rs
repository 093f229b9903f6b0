// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Operation record: a durable trace of one attempted unit of
//! backup/maintenance work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-unique, monotonically sortable operation identifier.
/// Doubles as the primary key and the recency ordering of the log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct OperationId(pub i64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OperationId {
    fn from(v: i64) -> Self {
        OperationId(v)
    }
}

/// Lifecycle status of an operation
///
/// Transitions are monotonic: `Pending -> Running -> {Success, Error,
/// Cancelled}`. Terminal states are only re-entered through an explicit
/// transform pass, never by normal task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpStatus {
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl OpStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpStatus::Success | OpStatus::Error | OpStatus::Cancelled)
    }

    /// Whether a normal (non-migration) update may move from `self` to `next`
    pub fn can_transition_to(&self, next: OpStatus) -> bool {
        match self {
            OpStatus::Pending => true,
            OpStatus::Running => next != OpStatus::Pending,
            _ => *self == next,
        }
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpStatus::Pending => "pending",
            OpStatus::Running => "running",
            OpStatus::Success => "success",
            OpStatus::Error => "error",
            OpStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Counters reported for a completed backup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub files_new: u64,
    pub files_changed: u64,
    pub bytes_added: u64,
    pub total_bytes: u64,
    pub snapshot_id: Option<String>,
}

/// Parameters of a restore request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSpec {
    pub snapshot_id: String,
    pub source_path: String,
    pub target_path: String,
}

/// Outcome of a prune or check pass, captured as opaque tool output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceResult {
    pub output: String,
}

/// Operation-type-specific payload
///
/// A sum type with one case per operation kind; the fields of one case never
/// apply to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Backup(BackupSummary),
    Restore(RestoreSpec),
    Prune(MaintenanceResult),
    Check(MaintenanceResult),
    Message(String),
}

impl OpKind {
    /// Short label used in logs and display contexts
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Backup(_) => "backup",
            OpKind::Restore(_) => "restore",
            OpKind::Prune(_) => "prune",
            OpKind::Check(_) => "check",
            OpKind::Message(_) => "message",
        }
    }
}

/// A durable record of one attempted unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    /// User-visible repository identifier; may be renamed over time
    pub repo_id: String,
    /// Stable repository identity; empty until known, then immutable
    #[serde(default)]
    pub repo_guid: String,
    pub plan_id: String,
    /// Groups operations belonging to one logical flow (e.g. backup + prune)
    #[serde(default)]
    pub flow_id: Option<i64>,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    pub status: OpStatus,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub kind: OpKind,
    /// Error text; populated when the operation ends in `Error` or carries
    /// cancellation context
    #[serde(default)]
    pub error: Option<String>,
}

impl Operation {
    /// Create a new operation in the Pending state, ID unassigned
    pub fn new(
        repo_id: impl Into<String>,
        plan_id: impl Into<String>,
        kind: OpKind,
    ) -> Self {
        Self {
            id: OperationId::default(),
            repo_id: repo_id.into(),
            repo_guid: String::new(),
            plan_id: plan_id.into(),
            flow_id: None,
            snapshot_id: None,
            status: OpStatus::Pending,
            created_at: None,
            started_at: None,
            ended_at: None,
            kind,
            error: None,
        }
    }

    /// Set the stable repository identity
    pub fn with_repo_guid(mut self, guid: impl Into<String>) -> Self {
        self.repo_guid = guid.into();
        self
    }

    pub fn with_flow_id(mut self, flow_id: i64) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    /// Whether the operation has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
