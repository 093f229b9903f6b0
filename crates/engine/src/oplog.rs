// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The operation log: typed queries, atomic migrations, and live
//! subscriptions over the operation store
//!
//! The log owns every operation after creation; the scheduler holds only IDs
//! and commits mutations back through here. Subscribers are notified after
//! the store lock is released, so a callback may call back into the log
//! without deadlocking.

use cairn_core::{Clock, OpIdGen, Operation, OperationId, Query};
use cairn_storage::{OpStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

/// Errors raised by operation log mutations
#[derive(Debug, Error)]
pub enum OpLogError {
    #[error("invalid operation: {0}")]
    Validation(String),
    #[error("operation not found: {0}")]
    NotFound(OperationId),
    #[error("transform aborted: {0}")]
    TransformAborted(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What happened to the operations carried by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpEventKind {
    Added,
    Updated,
    Deleted,
}

/// A batch of affected operations delivered to a subscriber
///
/// `Deleted` events carry the pre-deletion snapshots so subscribers can
/// clean up resources keyed by the now-gone IDs.
#[derive(Debug, Clone)]
pub struct OpEvent {
    pub kind: OpEventKind,
    pub ops: Vec<Operation>,
}

/// Handle returned by `subscribe`, required by `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&OpEvent) + Send + Sync>;

struct Subscriber {
    query: Query,
    callback: Callback,
}

/// Durable, queryable, subscribable ledger of operations
pub struct OpLog {
    store: Mutex<OpStore>,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_subscription: AtomicU64,
    id_gen: Box<dyn OpIdGen>,
    clock: Box<dyn Clock>,
}

impl OpLog {
    pub fn new(
        store: OpStore,
        id_gen: impl OpIdGen + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            id_gen: Box::new(id_gen),
            clock: Box::new(clock),
        }
    }

    fn validate_scope(op: &Operation) -> Result<(), OpLogError> {
        if op.repo_id.is_empty() {
            return Err(OpLogError::Validation("repo_id must be set".to_string()));
        }
        if op.plan_id.is_empty() {
            return Err(OpLogError::Validation("plan_id must be set".to_string()));
        }
        Ok(())
    }

    /// Persist a new operation, assigning its ID and creation timestamp.
    /// Returns the stored record and fires `Added` to matching subscribers.
    pub fn add(&self, mut op: Operation) -> Result<Operation, OpLogError> {
        Self::validate_scope(&op)?;
        op.id = self.id_gen.next();
        if op.created_at.is_none() {
            op.created_at = Some(self.clock.now_utc());
        }

        {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            store.insert(op.clone())?;
        }
        self.notify(OpEventKind::Added, vec![op.clone()]);
        Ok(op)
    }

    /// Replace an existing operation in full and fire `Updated`.
    ///
    /// Rejects status regressions and any change to a known repository GUID;
    /// such rewrites only happen through `transform`.
    pub fn update(&self, op: Operation) -> Result<(), OpLogError> {
        Self::validate_scope(&op)?;
        {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            let existing = store.get(op.id).ok_or(OpLogError::NotFound(op.id))?;
            if !existing.repo_guid.is_empty() && op.repo_guid != existing.repo_guid {
                return Err(OpLogError::Validation(
                    "repository GUID cannot be changed once set".to_string(),
                ));
            }
            if !existing.status.can_transition_to(op.status) {
                return Err(OpLogError::Validation(format!(
                    "status cannot move {} -> {}",
                    existing.status, op.status
                )));
            }
            store.update(op.clone())?;
        }
        self.notify(OpEventKind::Updated, vec![op]);
        Ok(())
    }

    /// Remove operations and fire `Deleted` with their pre-deletion
    /// snapshots. Fails without deleting anything if any ID is unknown.
    pub fn delete(&self, ids: &[OperationId]) -> Result<Vec<Operation>, OpLogError> {
        let snapshots = {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            for id in ids {
                if store.get(*id).is_none() {
                    return Err(OpLogError::NotFound(*id));
                }
            }
            let mut snapshots = Vec::with_capacity(ids.len());
            for id in ids {
                snapshots.push(store.remove(*id)?);
            }
            snapshots
        };
        self.notify(OpEventKind::Deleted, snapshots.clone());
        Ok(snapshots)
    }

    /// Fetch one operation
    pub fn get(&self, id: OperationId) -> Result<Operation, OpLogError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.get(id).cloned().ok_or(OpLogError::NotFound(id))
    }

    /// Return matching operations ordered by ID ascending.
    ///
    /// The result is a snapshot as of this call; a fresh call re-reads
    /// current state.
    pub fn query(&self, query: &Query) -> Vec<Operation> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.scan(query)
    }

    /// Atomically rewrite every operation matching `query`.
    ///
    /// `f` returns `Ok(None)` to leave a record unchanged, `Ok(Some(op))` to
    /// replace it, or `Err` to abort the whole pass; an aborted pass leaves
    /// no partial commit visible to queries. Changed records fire `Updated`.
    /// Returns the number of records rewritten.
    pub fn transform<F>(&self, query: &Query, mut f: F) -> Result<usize, OpLogError>
    where
        F: FnMut(&Operation) -> Result<Option<Operation>, String>,
    {
        let changed = {
            let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
            let matches = store.scan(query);
            let mut changed = Vec::new();
            for op in &matches {
                match f(op).map_err(OpLogError::TransformAborted)? {
                    None => {}
                    Some(mut new_op) => {
                        new_op.id = op.id;
                        if !op.repo_guid.is_empty() && new_op.repo_guid != op.repo_guid {
                            return Err(OpLogError::Validation(
                                "repository GUID cannot be changed once set".to_string(),
                            ));
                        }
                        changed.push(new_op);
                    }
                }
            }
            if !changed.is_empty() {
                store.apply_batch(changed.clone())?;
            }
            changed
        };

        let count = changed.len();
        if count > 0 {
            self.notify(OpEventKind::Updated, changed);
        }
        Ok(count)
    }

    /// Register a live observer for operations matching `query`.
    ///
    /// Registration is atomic with respect to in-flight commits: every
    /// operation committed after this call returns is delivered.
    pub fn subscribe<F>(&self, query: Query, callback: F) -> SubscriptionId
    where
        F: Fn(&OpEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.insert(
            id,
            Subscriber {
                query,
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Remove a subscription. Safe to call while a notification is in
    /// flight; events for commits that start after this returns are no
    /// longer delivered.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.remove(&id);
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    // Deliver to matching subscribers. Callbacks run outside every log lock
    // so they may re-enter the log.
    fn notify(&self, kind: OpEventKind, ops: Vec<Operation>) {
        let targets: Vec<(Callback, Vec<Operation>)> = {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subs.values()
                .filter_map(|sub| {
                    let matched: Vec<Operation> = ops
                        .iter()
                        .filter(|op| sub.query.matches(op))
                        .cloned()
                        .collect();
                    if matched.is_empty() {
                        None
                    } else {
                        Some((Arc::clone(&sub.callback), matched))
                    }
                })
                .collect()
        };

        for (callback, matched) in targets {
            callback(&OpEvent { kind, ops: matched });
        }
    }
}

#[cfg(test)]
#[path = "oplog_tests.rs"]
mod tests;
