// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, crash recovery, plan materialization.

use crate::config::{ConfigError, FileProvider};
use crate::tasks::{BackupTask, PruneTask};
use cairn_core::{
    ClockIdGen, ConfigProvider, OpStatus, Query, SystemClock,
};
use cairn_engine::{register_log_gc, OpLog, OpLogError, Orchestrator};
use cairn_storage::{LogStoreError, OpStore, StoreError, TaskLogStore};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors fatal to daemon startup
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another live instance holds the store; retrying risks concurrent
    /// corruption, so this is never retried automatically.
    #[error("operation store at {0} is locked by another instance")]
    StoreLocked(PathBuf),
    /// The journal failed to replay. The backup repositories themselves are
    /// untouched; the operator recovers by restoring or moving the journal.
    #[error("operation store is corrupt: {0}")]
    StoreCorrupt(StoreError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("task log store: {0}")]
    Logs(#[from] LogStoreError),
    #[error("recovery pass failed: {0}")]
    Recovery(#[from] OpLogError),
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Locked(path) => LifecycleError::StoreLocked(path),
            e @ StoreError::Corrupt { .. } => LifecycleError::StoreCorrupt(e),
            e => LifecycleError::Store(e),
        }
    }
}

/// A started daemon: the wired component graph
impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("tool_command", &self.tool_command)
            .finish_non_exhaustive()
    }
}

pub struct Daemon {
    pub provider: Arc<FileProvider>,
    pub oplog: Arc<OpLog>,
    pub logs: Arc<TaskLogStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub tool_command: String,
}

/// Wire the component graph from the configuration file.
///
/// Opens the operation store (a held lock or corrupt journal is fatal),
/// registers the log-blob collector, marks operations interrupted by a
/// previous crash, and materializes plan tasks into the scheduler.
pub fn startup(config_path: &Path) -> Result<Daemon, LifecycleError> {
    let provider = Arc::new(FileProvider::load(config_path)?);
    let config = provider.snapshot();

    let store = OpStore::open(&config.data_dir.join("oplog"))?;
    let oplog = Arc::new(OpLog::new(store, ClockIdGen::new(), SystemClock));
    let logs = Arc::new(TaskLogStore::open(config.data_dir.join("logs"))?);
    register_log_gc(&oplog, Arc::clone(&logs));

    let recovered = recover_interrupted(&oplog, Utc::now())?;
    if recovered > 0 {
        warn!(recovered, "marked operations interrupted by a previous run");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&oplog),
        Arc::clone(&logs),
        Arc::new(SystemClock),
        config.retry.clone(),
    ));

    let daemon = Daemon {
        provider,
        oplog,
        logs,
        orchestrator,
        tool_command: config.tool.command,
    };
    let scheduled = materialize_plans(&daemon);
    info!(scheduled, data_dir = %config.data_dir.display(), "daemon wired");
    Ok(daemon)
}

/// Mark operations a previous process left non-terminal as failed.
///
/// Runs as a transform pass so a replayed journal never shows phantom
/// in-flight work; safe to run repeatedly.
pub fn recover_interrupted(oplog: &OpLog, now: DateTime<Utc>) -> Result<usize, OpLogError> {
    let open = Query::all().with_statuses(vec![OpStatus::Pending, OpStatus::Running]);
    oplog.transform(&open, |op| {
        let mut op = op.clone();
        op.status = OpStatus::Error;
        op.error = Some("interrupted by daemon restart".to_string());
        op.ended_at = Some(now);
        Ok(Some(op))
    })
}

/// Schedule a backup task per plan, and a prune task per plan that carries
/// a retention policy. First runs land one interval after startup; each
/// completed run re-schedules itself through the task's recurrence.
///
/// Reads the provider once; a later config edit takes effect when the
/// daemon is restarted (recurring tasks capture their plan snapshot).
pub fn materialize_plans(daemon: &Daemon) -> usize {
    let repos = daemon.provider.repos();
    let mut scheduled = 0;
    for plan in daemon.provider.plans() {
        let Some(repo) = repos.iter().find(|r| r.id == plan.repo_id) else {
            warn!(plan_id = %plan.id, repo_id = %plan.repo_id, "plan targets an unknown repository");
            continue;
        };
        let due = std::time::Instant::now() + plan.interval;
        if let Some(retention) = plan.retention {
            daemon.orchestrator.schedule(
                Box::new(PruneTask::new(
                    repo.clone(),
                    plan.clone(),
                    retention,
                    &daemon.tool_command,
                )),
                due,
            );
            scheduled += 1;
        }
        daemon.orchestrator.schedule(
            Box::new(BackupTask::new(
                repo.clone(),
                plan.clone(),
                &daemon.tool_command,
            )),
            due,
        );
        scheduled += 1;
    }
    scheduled
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
