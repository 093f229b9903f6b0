// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task scheduling loop
//!
//! One long-lived loop picks the earliest-due task whose repository is idle,
//! records a pending operation, and hands the body to a worker. Repositories
//! execute serially; unrelated repositories run in parallel. Transient
//! failures are re-scheduled with exponential backoff until the attempt
//! ceiling, permanent failures are recorded once, and cancellation is never
//! retried. Shutdown stops dispatch and drains in-flight workers before the
//! loop returns.

use crate::oplog::{OpLog, OpLogError};
use crate::task::{ScheduledEntry, Task, TaskContext, TaskError};
use cairn_core::{Clock, OpStatus, Operation, OperationId, RetryPolicy};
use cairn_storage::TaskLogStore;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};

/// What a finished worker hands back to the loop
enum Outcome {
    Finished(Box<dyn Task>, Result<(), TaskError>),
    /// The body terminated abnormally; the task is gone
    Died(String),
}

struct Completion {
    repo_id: String,
    op_id: OperationId,
    attempts: u32,
    outcome: Outcome,
}

/// Schedules tasks and drives their execution
///
/// Shared between the loop (`run`) and producers (`schedule`); wrap in an
/// `Arc` and call `schedule` from any thread.
pub struct Orchestrator {
    oplog: Arc<OpLog>,
    logs: Arc<TaskLogStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    queue: Mutex<BinaryHeap<ScheduledEntry>>,
    /// Repositories with a task currently running
    busy: Mutex<HashSet<String>>,
    seq: AtomicU64,
    arrival: Notify,
    cancel: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn new(
        oplog: Arc<OpLog>,
        logs: Arc<TaskLogStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            oplog,
            logs,
            clock,
            retry,
            queue: Mutex::new(BinaryHeap::new()),
            busy: Mutex::new(HashSet::new()),
            seq: AtomicU64::new(0),
            arrival: Notify::new(),
            cancel,
        }
    }

    /// Queue a task for execution at `due`.
    ///
    /// Equally-due tasks run in the order they were scheduled. The scheduler
    /// does not deduplicate: re-scheduling a recurring task that is already
    /// queued yields two runs.
    pub fn schedule(&self, task: Box<dyn Task>, due: Instant) {
        self.push_entry(ScheduledEntry {
            due,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            attempts: 0,
            op_id: None,
            task,
        });
    }

    /// Queue a task for immediate execution
    pub fn schedule_now(&self, task: Box<dyn Task>) {
        self.schedule(task, self.clock.now());
    }

    fn push_entry(&self, entry: ScheduledEntry) {
        debug!(
            kind = entry.task.kind(),
            repo_id = entry.task.repo_id(),
            attempts = entry.attempts,
            "task scheduled"
        );
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.push(entry);
        drop(queue);
        self.arrival.notify_one();
    }

    /// Number of tasks waiting in the queue
    pub fn pending_count(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The main loop. Returns once `shutdown` flips to `true` and every
    /// in-flight task has reached a terminal state.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut running = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Some(entry) = self.pop_runnable() {
                if self.dispatch(entry, done_tx.clone()) {
                    running += 1;
                }
            }

            let wakeup = self.next_wakeup();
            tokio::select! {
                _ = shutdown.changed() => {}
                Some(done) = done_rx.recv() => {
                    running -= 1;
                    self.complete(done);
                }
                _ = self.arrival.notified() => {}
                _ = sleep_until(wakeup), if wakeup.is_some() => {}
            }
        }

        // Drain: signal cancellation to running bodies and await each one.
        // Bodies are not killed; one that ignores the signal delays shutdown.
        info!(in_flight = running, "orchestrator draining");
        self.cancel.send_replace(true);
        while running > 0 {
            match done_rx.recv().await {
                Some(done) => {
                    running -= 1;
                    self.complete(done);
                }
                None => break,
            }
        }
    }

    // Earliest-due entry that is due now and whose repository is idle.
    // A busy repository defers only its own entries; later-due entries for
    // other repositories are still considered.
    fn pop_runnable(&self) -> Option<ScheduledEntry> {
        let now = self.clock.now();
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());

        let mut deferred = Vec::new();
        let mut picked = None;
        while let Some(entry) = queue.pop() {
            if entry.due > now {
                deferred.push(entry);
                break;
            }
            if busy.contains(entry.task.repo_id()) {
                deferred.push(entry);
                continue;
            }
            picked = Some(entry);
            break;
        }
        for entry in deferred {
            queue.push(entry);
        }
        picked
    }

    // Next future deadline, for the loop's sleep. Entries already due can
    // only be waiting on a busy repository; the completion that frees the
    // repository wakes the loop, so they set no timer.
    fn next_wakeup(&self) -> Option<Instant> {
        let now = self.clock.now();
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.iter().map(|entry| entry.due).filter(|due| *due > now).min()
    }

    // Returns whether a worker was actually spawned
    fn dispatch(&self, mut entry: ScheduledEntry, done_tx: mpsc::UnboundedSender<Completion>) -> bool {
        let repo_id = entry.task.repo_id().to_string();
        {
            let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
            busy.insert(repo_id.clone());
        }

        let op_id = match self.ensure_operation(&mut entry) {
            Ok(id) => id,
            Err(e) => {
                error!(%repo_id, error = %e, "failed to record operation, dropping task");
                let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
                busy.remove(&repo_id);
                return false;
            }
        };

        debug!(%repo_id, %op_id, kind = entry.task.kind(), "task starting");
        let mut ctx = TaskContext::new(
            op_id,
            Arc::clone(&self.oplog),
            Arc::clone(&self.logs),
            self.cancel.subscribe(),
        );
        let attempts = entry.attempts;
        let mut task = entry.task;
        let body = tokio::spawn(async move {
            let result = task.run(&mut ctx).await;
            (task, result)
        });
        tokio::spawn(async move {
            let outcome = match body.await {
                Ok((task, result)) => Outcome::Finished(task, result),
                Err(e) => Outcome::Died(e.to_string()),
            };
            let _ = done_tx.send(Completion {
                repo_id,
                op_id,
                attempts,
                outcome,
            });
        });
        true
    }

    // First attempt creates the operation and flips it to Running; retries
    // reuse the operation, which stays Running across the backoff window.
    fn ensure_operation(&self, entry: &mut ScheduledEntry) -> Result<OperationId, OpLogError> {
        if let Some(op_id) = entry.op_id {
            return Ok(op_id);
        }
        let op = Operation::new(
            entry.task.repo_id(),
            entry.task.plan_id(),
            entry.task.op_kind(),
        );
        let mut op = self.oplog.add(op)?;
        op.status = OpStatus::Running;
        op.started_at = Some(self.clock.now_utc());
        self.oplog.update(op.clone())?;
        entry.op_id = Some(op.id);
        Ok(op.id)
    }

    fn complete(&self, done: Completion) {
        {
            let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
            busy.remove(&done.repo_id);
        }
        self.arrival.notify_one();

        let cancelled = *self.cancel.borrow();
        match done.outcome {
            Outcome::Finished(task, Ok(())) => {
                self.finish_operation(done.op_id, OpStatus::Success, None);
                self.reschedule_recurring(task);
            }
            Outcome::Finished(_, Err(err)) if cancelled => {
                // Shutdown was requested while the body ran; record the
                // interruption and never retry.
                self.finish_operation(done.op_id, OpStatus::Cancelled, Some(err.to_string()));
            }
            Outcome::Finished(task, Err(TaskError::Permanent(msg))) => {
                warn!(repo_id = %done.repo_id, op_id = %done.op_id, error = %msg, "task failed");
                self.finish_operation(done.op_id, OpStatus::Error, Some(msg));
                self.reschedule_recurring(task);
            }
            Outcome::Finished(task, Err(TaskError::Transient(msg))) => {
                let attempts = done.attempts + 1;
                if self.retry.allows_retry(attempts) {
                    let backoff = self.retry.backoff(attempts);
                    debug!(
                        repo_id = %done.repo_id,
                        op_id = %done.op_id,
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %msg,
                        "transient failure, retrying"
                    );
                    self.push_entry(ScheduledEntry {
                        due: self.clock.now() + backoff,
                        seq: self.seq.fetch_add(1, Ordering::SeqCst),
                        attempts,
                        op_id: Some(done.op_id),
                        task,
                    });
                } else {
                    warn!(
                        repo_id = %done.repo_id,
                        op_id = %done.op_id,
                        attempts,
                        error = %msg,
                        "retries exhausted"
                    );
                    self.finish_operation(done.op_id, OpStatus::Error, Some(msg));
                    self.reschedule_recurring(task);
                }
            }
            Outcome::Died(msg) => {
                error!(repo_id = %done.repo_id, op_id = %done.op_id, error = %msg, "task body died");
                self.finish_operation(
                    done.op_id,
                    OpStatus::Error,
                    Some(format!("task terminated abnormally: {}", msg)),
                );
            }
        }
    }

    fn reschedule_recurring(&self, task: Box<dyn Task>) {
        if *self.cancel.borrow() {
            return;
        }
        if let Some(interval) = task.recurrence() {
            let due = self.clock.now() + interval;
            self.push_entry(ScheduledEntry {
                due,
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                attempts: 0,
                op_id: None,
                task,
            });
        }
    }

    fn finish_operation(&self, op_id: OperationId, status: OpStatus, error: Option<String>) {
        let result = self.oplog.get(op_id).and_then(|mut op| {
            op.status = status;
            op.error = error;
            op.ended_at = Some(self.clock.now_utc());
            self.oplog.update(op)
        });
        if let Err(e) = result {
            error!(%op_id, error = %e, "failed to record task completion");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        // Guarded out by the caller's `if wakeup.is_some()`
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
