// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration file
//!
//! A single TOML file declares the data directory, the backup tool, the
//! retry policy, and the repository/plan set. `FileProvider` re-reads the
//! file on every query so edits take effect at the next materialization;
//! an unreadable or unparseable file falls back to the last good snapshot.

use cairn_core::{ConfigProvider, PlanConfig, RepoConfig, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The external backup tool to invoke
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolConfig {
    pub command: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: "restic".to_string(),
        }
    }
}

/// Parsed contents of the daemon configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Root for the operation journal and task log blobs
    pub data_dir: PathBuf,
    /// Daemon log file; defaults to `<data_dir>/cairnd.log`
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default, rename = "repo")]
    pub repos: Vec<RepoConfig>,
    #[serde(default, rename = "plan")]
    pub plans: Vec<PlanConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cairnd.log"))
    }
}

/// `ConfigProvider` backed by the configuration file.
///
/// Queries re-read the file, so two reads may disagree; callers snapshot per
/// materialization and never assume coupling between reads.
pub struct FileProvider {
    path: PathBuf,
    current: Mutex<FileConfig>,
}

impl FileProvider {
    /// Load the provider, failing when the initial read fails
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let current = FileConfig::load(&path)?;
        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    /// The most recent good parse of the file
    pub fn snapshot(&self) -> FileConfig {
        self.refresh()
    }

    fn refresh(&self) -> FileConfig {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match FileConfig::load(&self.path) {
            Ok(config) => {
                *current = config;
            }
            Err(e) => {
                warn!(error = %e, "config reload failed, keeping last good configuration");
            }
        }
        current.clone()
    }
}

impl ConfigProvider for FileProvider {
    fn repos(&self) -> Vec<RepoConfig> {
        self.refresh().repos
    }

    fn plans(&self) -> Vec<PlanConfig> {
        self.refresh().plans
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
