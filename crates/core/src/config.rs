// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration types consumed by the orchestrator
//!
//! The orchestrator reads repositories and plans through `ConfigProvider`
//! and must tolerate the underlying configuration changing between reads;
//! there is no transactional coupling with the provider.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An external content-addressed backup repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// User-visible identifier; may be renamed
    pub id: String,
    /// Stable identity; empty when not yet known
    #[serde(default)]
    pub guid: String,
    /// Connection string handed to the backup tool
    pub uri: String,
    /// Extra environment for tool invocations (credentials etc.)
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Retention policy bound to a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub keep_last: u32,
}

/// A named recurring policy: schedule plus retention, bound to a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub id: String,
    pub repo_id: String,
    /// Interval between runs
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Paths included in the backup
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub retention: Option<Retention>,
}

/// Supplies the current repository and plan set
///
/// Implementations may re-read external state on every call; callers take a
/// snapshot per materialization and never assume two reads agree.
pub trait ConfigProvider: Send + Sync {
    fn repos(&self) -> Vec<RepoConfig>;
    fn plans(&self) -> Vec<PlanConfig>;

    /// Look up a repository by user-visible ID
    fn repo(&self, repo_id: &str) -> Option<RepoConfig> {
        self.repos().into_iter().find(|r| r.id == repo_id)
    }
}

/// Backoff schedule for transient task failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    /// Multiplier applied per attempt
    pub factor: f64,
    /// Total attempts (first run included) before the failure becomes permanent
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based: attempt 1 is the
    /// first retry). Strictly increasing with the default factor.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        self.initial.mul_f64(self.factor.powi(exp as i32))
    }

    /// Whether another attempt is allowed after `attempts` completed runs
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
