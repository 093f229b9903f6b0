// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cairn_core::{FakeClock, OpKind, OpStatus, SequentialIdGen};
use tempfile::TempDir;

fn open_log(dir: &TempDir) -> OpLog {
    let store = OpStore::open(dir.path()).unwrap();
    OpLog::new(store, SequentialIdGen::new(), FakeClock::new())
}

fn message_op(repo: &str, plan: &str) -> Operation {
    Operation::new(repo, plan, OpKind::Message("test".to_string()))
}

#[test]
fn add_assigns_id_and_creation_time() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let op = log.add(message_op("r1", "p1")).unwrap();
    assert_eq!(op.id, OperationId(1));
    assert!(op.created_at.is_some());

    let op2 = log.add(message_op("r1", "p1")).unwrap();
    assert_eq!(op2.id, OperationId(2));
}

#[test]
fn add_rejects_missing_scope() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let err = log.add(message_op("", "p1")).unwrap_err();
    assert!(matches!(err, OpLogError::Validation(_)));

    let err = log.add(message_op("r1", "")).unwrap_err();
    assert!(matches!(err, OpLogError::Validation(_)));
}

#[test]
fn update_unknown_id_fails() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut op = message_op("r1", "p1");
    op.id = OperationId(99);
    let err = log.update(op).unwrap_err();
    assert!(matches!(err, OpLogError::NotFound(OperationId(99))));
}

#[test]
fn update_replaces_record_in_full() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut op = log.add(message_op("r1", "p1")).unwrap();
    op.status = OpStatus::Running;
    op.snapshot_id = Some("snap".to_string());
    log.update(op.clone()).unwrap();

    let got = log.get(op.id).unwrap();
    assert_eq!(got.status, OpStatus::Running);
    assert_eq!(got.snapshot_id.as_deref(), Some("snap"));
}

#[test]
fn update_rejects_status_regression() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut op = log.add(message_op("r1", "p1")).unwrap();
    op.status = OpStatus::Success;
    log.update(op.clone()).unwrap();

    op.status = OpStatus::Running;
    let err = log.update(op).unwrap_err();
    assert!(matches!(err, OpLogError::Validation(_)));
}

#[test]
fn update_rejects_guid_change_but_allows_backfill() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut op = log.add(message_op("r1", "p1")).unwrap();

    // Populating an empty GUID is allowed
    op.repo_guid = "g1".to_string();
    log.update(op.clone()).unwrap();

    // Changing or clearing a known GUID is not
    op.repo_guid = "g2".to_string();
    assert!(matches!(
        log.update(op.clone()).unwrap_err(),
        OpLogError::Validation(_)
    ));
    op.repo_guid = String::new();
    assert!(matches!(log.update(op).unwrap_err(), OpLogError::Validation(_)));
}

#[test]
fn query_after_mutations_returns_survivors_in_id_order() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let a = log.add(message_op("r1", "p1")).unwrap();
    let b = log.add(message_op("r2", "p1")).unwrap();
    let c = log.add(message_op("r1", "p2")).unwrap();

    let mut updated = b.clone();
    updated.status = OpStatus::Success;
    log.update(updated).unwrap();
    log.delete(&[a.id]).unwrap();

    let ops = log.query(&Query::all());
    let ids: Vec<OperationId> = ops.iter().map(|op| op.id).collect();
    assert_eq!(ids, vec![b.id, c.id]);
    assert_eq!(ops[0].status, OpStatus::Success);
}

#[test]
fn delete_returns_pre_deletion_snapshots() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let a = log.add(message_op("r1", "p1")).unwrap();
    let snapshots = log.delete(&[a.id]).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, a.id);
    assert_eq!(snapshots[0].repo_id, "r1");
}

#[test]
fn delete_unknown_id_removes_nothing() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let a = log.add(message_op("r1", "p1")).unwrap();
    let err = log.delete(&[a.id, OperationId(99)]).unwrap_err();
    assert!(matches!(err, OpLogError::NotFound(OperationId(99))));
    assert_eq!(log.query(&Query::all()).len(), 1);
}

#[test]
fn subscriber_sees_each_added_operation() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_cb = Arc::clone(&seen);
    let sub = log.subscribe(Query::all(), move |event| {
        if event.kind == OpEventKind::Added {
            let mut seen = seen_by_cb.lock().unwrap_or_else(|e| e.into_inner());
            seen.extend(event.ops.iter().map(|op| op.id));
        }
    });

    let mut expected = Vec::new();
    for _ in 0..5 {
        expected.push(log.add(message_op("r1", "p1")).unwrap().id);
    }
    assert_eq!(*seen.lock().unwrap(), expected);

    log.unsubscribe(sub);
    log.add(message_op("r1", "p1")).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 5);
}

#[test]
fn subscription_query_scopes_delivery() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_cb = Arc::clone(&seen);
    log.subscribe(Query::all().with_repo_id("r1"), move |event| {
        let mut seen = seen_by_cb.lock().unwrap_or_else(|e| e.into_inner());
        seen.extend(event.ops.iter().map(|op| op.repo_id.clone()));
    });

    log.add(message_op("r1", "p1")).unwrap();
    log.add(message_op("r2", "p1")).unwrap();
    log.add(message_op("r1", "p2")).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["r1".to_string(), "r1".to_string()]);
}

#[test]
fn deleted_event_carries_snapshots() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let op = log.add(message_op("r1", "p1")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_cb = Arc::clone(&seen);
    log.subscribe(Query::all(), move |event| {
        if event.kind == OpEventKind::Deleted {
            let mut seen = seen_by_cb.lock().unwrap_or_else(|e| e.into_inner());
            seen.extend(event.ops.clone());
        }
    });

    log.delete(&[op.id]).unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].id, op.id);
}

#[test]
fn callback_may_reenter_the_log() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(open_log(&dir));

    let log_for_cb = Arc::clone(&log);
    let observed = Arc::new(Mutex::new(0usize));
    let observed_cb = Arc::clone(&observed);
    log.subscribe(Query::all().with_repo_id("r1"), move |event| {
        if event.kind == OpEventKind::Added {
            // Re-entrant query must not deadlock
            let count = log_for_cb.query(&Query::all()).len();
            *observed_cb.lock().unwrap_or_else(|e| e.into_inner()) = count;
        }
    });

    log.add(message_op("r1", "p1")).unwrap();
    assert_eq!(*observed.lock().unwrap(), 1);
}

#[test]
fn transform_backfills_guid_for_matching_repo_only() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let a = log.add(message_op("r1", "p1")).unwrap();
    let b = log.add(message_op("r2", "p1")).unwrap();

    let count = log
        .transform(&Query::all().with_repo_id("r1"), |op| {
            if op.repo_guid.is_empty() {
                let mut new_op = op.clone();
                new_op.repo_guid = "g1".to_string();
                Ok(Some(new_op))
            } else {
                Ok(None)
            }
        })
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(log.get(a.id).unwrap().repo_guid, "g1");
    assert!(log.get(b.id).unwrap().repo_guid.is_empty());

    // Running the same pass again changes nothing
    let count = log
        .transform(&Query::all().with_repo_id("r1"), |op| {
            if op.repo_guid.is_empty() {
                let mut new_op = op.clone();
                new_op.repo_guid = "g1".to_string();
                Ok(Some(new_op))
            } else {
                Ok(None)
            }
        })
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn transform_error_leaves_no_partial_commit() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    for _ in 0..3 {
        log.add(message_op("r1", "p1")).unwrap();
    }

    let mut visited = 0;
    let err = log
        .transform(&Query::all(), |op| {
            visited += 1;
            if visited == 2 {
                return Err("forced mid-pass failure".to_string());
            }
            let mut new_op = op.clone();
            new_op.status = OpStatus::Success;
            Ok(Some(new_op))
        })
        .unwrap_err();
    assert!(matches!(err, OpLogError::TransformAborted(_)));

    // The first record's rewrite must not be visible
    for op in log.query(&Query::all()) {
        assert_eq!(op.status, OpStatus::Pending);
    }
}

#[test]
fn transform_fires_updated_events_for_changed_records() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    log.add(message_op("r1", "p1")).unwrap();
    log.add(message_op("r2", "p1")).unwrap();

    let seen = Arc::new(Mutex::new(0usize));
    let seen_cb = Arc::clone(&seen);
    log.subscribe(Query::all(), move |event| {
        if event.kind == OpEventKind::Updated {
            *seen_cb.lock().unwrap_or_else(|e| e.into_inner()) += event.ops.len();
        }
    });

    log.transform(&Query::all().with_repo_id("r1"), |op| {
        let mut new_op = op.clone();
        new_op.repo_guid = "g1".to_string();
        Ok(Some(new_op))
    })
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), 1);
}

#[test]
fn log_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let first_id = {
        let log = open_log(&dir);
        log.add(message_op("r1", "p1")).unwrap().id
    };

    let store = OpStore::open(dir.path()).unwrap();
    let log = OpLog::new(store, SequentialIdGen::starting_at(2), FakeClock::new());
    assert_eq!(log.get(first_id).unwrap().repo_id, "r1");
}
