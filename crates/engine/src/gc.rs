// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log-blob garbage collection
//!
//! Deleting an operation from the log also retires its task log blob. The
//! wiring goes through the log's subscription mechanism: the `Deleted` event
//! carries pre-deletion snapshots, so the blob keys are still known here.

use crate::oplog::{OpEventKind, OpLog, SubscriptionId};
use cairn_core::Query;
use cairn_storage::TaskLogStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Subscribe a collector that deletes an operation's log blob when the
/// operation itself is deleted. Returns the handle for `unsubscribe`.
pub fn register_log_gc(oplog: &OpLog, logs: Arc<TaskLogStore>) -> SubscriptionId {
    oplog.subscribe(Query::all(), move |event| {
        if event.kind != OpEventKind::Deleted {
            return;
        }
        for op in &event.ops {
            match logs.delete(op.id) {
                Ok(()) => debug!(op_id = %op.id, "task log blob collected"),
                Err(e) => warn!(op_id = %op.id, error = %e, "failed to delete task log blob"),
            }
        }
    })
}
