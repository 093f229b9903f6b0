// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete backup-tool tasks
//!
//! One task type per operation kind. Each body invokes the external tool
//! with the repository's connection parameters, forwards the tool's output
//! into the operation's log blob through the bounded sink, and reports the
//! truncation drop count once at completion.

use cairn_core::{
    BackupSummary, MaintenanceResult, OpKind, PlanConfig, RepoConfig, RestoreSpec, Retention,
};
use cairn_engine::{BoundedLineSink, Task, TaskContext, TaskError, ToolRunner, DEFAULT_LOG_CAP};
use tracing::warn;

/// Plan identifier recorded on operations not tied to a user plan
/// (one-off restores and checks)
pub const SYSTEM_PLAN_ID: &str = "_system_";

fn tool_for(repo: &RepoConfig, command: &str) -> ToolRunner {
    ToolRunner::new(command).with_env(repo.env.clone())
}

async fn run_tool(
    runner: &ToolRunner,
    args: &[String],
    ctx: &mut TaskContext,
) -> Result<(), TaskError> {
    let writer = ctx
        .log_writer()
        .map_err(|e| TaskError::Permanent(format!("cannot open task log: {}", e)))?;
    let mut sink = BoundedLineSink::new(writer, DEFAULT_LOG_CAP);
    let result = runner.run(args, &mut sink, ctx.cancel_signal()).await;
    match sink.finish() {
        Ok(dropped) if dropped > 0 => {
            warn!(op_id = %ctx.op_id(), dropped, "tool output truncated");
        }
        Ok(_) => {}
        Err(e) => warn!(op_id = %ctx.op_id(), error = %e, "failed to flush task log"),
    }
    result
}

/// Recurring backup of a plan's paths
pub struct BackupTask {
    repo: RepoConfig,
    plan: PlanConfig,
    runner: ToolRunner,
}

impl BackupTask {
    pub fn new(repo: RepoConfig, plan: PlanConfig, command: &str) -> Self {
        let runner = tool_for(&repo, command);
        Self { repo, plan, runner }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "backup".to_string(),
            "--repo".to_string(),
            self.repo.uri.clone(),
        ];
        args.extend(self.plan.paths.iter().cloned());
        args
    }
}

#[async_trait::async_trait]
impl Task for BackupTask {
    fn kind(&self) -> &str {
        "backup"
    }

    fn repo_id(&self) -> &str {
        &self.repo.id
    }

    fn plan_id(&self) -> &str {
        &self.plan.id
    }

    fn op_kind(&self) -> OpKind {
        OpKind::Backup(BackupSummary::default())
    }

    fn recurrence(&self) -> Option<std::time::Duration> {
        Some(self.plan.interval)
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        run_tool(&self.runner, &self.args(), ctx).await
    }
}

/// Recurring retention enforcement for a plan
pub struct PruneTask {
    repo: RepoConfig,
    plan: PlanConfig,
    retention: Retention,
    runner: ToolRunner,
}

impl PruneTask {
    pub fn new(repo: RepoConfig, plan: PlanConfig, retention: Retention, command: &str) -> Self {
        let runner = tool_for(&repo, command);
        Self {
            repo,
            plan,
            retention,
            runner,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "forget".to_string(),
            "--repo".to_string(),
            self.repo.uri.clone(),
            "--keep-last".to_string(),
            self.retention.keep_last.to_string(),
            "--prune".to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl Task for PruneTask {
    fn kind(&self) -> &str {
        "prune"
    }

    fn repo_id(&self) -> &str {
        &self.repo.id
    }

    fn plan_id(&self) -> &str {
        &self.plan.id
    }

    fn op_kind(&self) -> OpKind {
        OpKind::Prune(MaintenanceResult::default())
    }

    fn recurrence(&self) -> Option<std::time::Duration> {
        Some(self.plan.interval)
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        run_tool(&self.runner, &self.args(), ctx).await
    }
}

/// One-off repository consistency check
pub struct CheckTask {
    repo: RepoConfig,
    runner: ToolRunner,
}

impl CheckTask {
    pub fn new(repo: RepoConfig, command: &str) -> Self {
        let runner = tool_for(&repo, command);
        Self { repo, runner }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "check".to_string(),
            "--repo".to_string(),
            self.repo.uri.clone(),
        ]
    }
}

#[async_trait::async_trait]
impl Task for CheckTask {
    fn kind(&self) -> &str {
        "check"
    }

    fn repo_id(&self) -> &str {
        &self.repo.id
    }

    fn plan_id(&self) -> &str {
        SYSTEM_PLAN_ID
    }

    fn op_kind(&self) -> OpKind {
        OpKind::Check(MaintenanceResult::default())
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        run_tool(&self.runner, &self.args(), ctx).await
    }
}

/// One-off restore of a snapshot path
pub struct RestoreTask {
    repo: RepoConfig,
    spec: RestoreSpec,
    runner: ToolRunner,
}

impl RestoreTask {
    pub fn new(repo: RepoConfig, spec: RestoreSpec, command: &str) -> Self {
        let runner = tool_for(&repo, command);
        Self { repo, spec, runner }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "restore".to_string(),
            self.spec.snapshot_id.clone(),
            "--repo".to_string(),
            self.repo.uri.clone(),
            "--include".to_string(),
            self.spec.source_path.clone(),
            "--target".to_string(),
            self.spec.target_path.clone(),
        ]
    }
}

#[async_trait::async_trait]
impl Task for RestoreTask {
    fn kind(&self) -> &str {
        "restore"
    }

    fn repo_id(&self) -> &str {
        &self.repo.id
    }

    fn plan_id(&self) -> &str {
        SYSTEM_PLAN_ID
    }

    fn op_kind(&self) -> OpKind {
        OpKind::Restore(self.spec.clone())
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        run_tool(&self.runner, &self.args(), ctx).await
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
