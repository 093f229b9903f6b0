// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Query filters over operations
//!
//! One filter shape serves three purposes: read queries, scoping a transform
//! pass, and scoping a subscription. A subscription matches an event iff the
//! affected operation satisfies the query at commit time.

use crate::operation::{OpStatus, Operation, OperationId};
use serde::{Deserialize, Serialize};

/// An immutable filter specification over operations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default)]
    pub repo_guid: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub statuses: Option<Vec<OpStatus>>,
    /// Inclusive lower ID bound
    #[serde(default)]
    pub id_min: Option<OperationId>,
    /// Inclusive upper ID bound
    #[serde(default)]
    pub id_max: Option<OperationId>,
}

impl Query {
    /// A query matching every operation
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_repo_id(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn with_repo_guid(mut self, guid: impl Into<String>) -> Self {
        self.repo_guid = Some(guid.into());
        self
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<OpStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_id_range(mut self, min: OperationId, max: OperationId) -> Self {
        self.id_min = Some(min);
        self.id_max = Some(max);
        self
    }

    /// Check whether an operation satisfies every set clause
    pub fn matches(&self, op: &Operation) -> bool {
        if let Some(repo_id) = &self.repo_id {
            if op.repo_id != *repo_id {
                return false;
            }
        }
        if let Some(guid) = &self.repo_guid {
            if op.repo_guid != *guid {
                return false;
            }
        }
        if let Some(plan_id) = &self.plan_id {
            if op.plan_id != *plan_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&op.status) {
                return false;
            }
        }
        if let Some(min) = self.id_min {
            if op.id < min {
                return false;
            }
        }
        if let Some(max) = self.id_max {
            if op.id > max {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
