// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cairn_core::{OpKind, Operation, SequentialIdGen};
use std::io::Write;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("cairn.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "data_dir = {:?}", dir.path().join("data")).unwrap();
    write!(file, "{}", body).unwrap();
    path
}

const TWO_PLANS: &str = r#"
[[repo]]
id = "local"
uri = "/backups/local"

[[plan]]
id = "docs"
repo_id = "local"
interval = "1h"
paths = ["/home/docs"]

[plan.retention]
keep_last = 5

[[plan]]
id = "media"
repo_id = "local"
interval = "12h"
paths = ["/home/media"]
"#;

#[test]
fn startup_wires_the_component_graph() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, TWO_PLANS);

    let daemon = startup(&path).unwrap();
    assert_eq!(daemon.tool_command, "restic");
    // docs backup + docs prune + media backup
    assert_eq!(daemon.orchestrator.pending_count(), 3);

    // The log is live: adds persist and are queryable
    let op = daemon
        .oplog
        .add(Operation::new("local", "docs", OpKind::Message("hello".to_string())))
        .unwrap();
    assert_eq!(daemon.oplog.get(op.id).unwrap().repo_id, "local");
}

#[test]
fn locked_store_is_fatal_and_distinct() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let _holder = OpStore::open(&dir.path().join("data").join("oplog")).unwrap();
    let err = startup(&path).unwrap_err();
    assert!(matches!(err, LifecycleError::StoreLocked(_)));
}

#[test]
fn corrupt_journal_is_reported_distinctly() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let oplog_dir = dir.path().join("data").join("oplog");
    std::fs::create_dir_all(&oplog_dir).unwrap();
    std::fs::write(oplog_dir.join("oplog.jsonl"), "not json\n").unwrap();

    let err = startup(&path).unwrap_err();
    assert!(matches!(err, LifecycleError::StoreCorrupt(_)));
}

#[test]
fn plans_for_unknown_repos_are_skipped() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[[plan]]
id = "orphan"
repo_id = "missing"
interval = "1h"
"#,
    );

    let daemon = startup(&path).unwrap();
    assert_eq!(daemon.orchestrator.pending_count(), 0);
}

#[test]
fn recovery_marks_open_operations_failed() {
    let dir = TempDir::new().unwrap();
    let store = OpStore::open(dir.path()).unwrap();
    let oplog = OpLog::new(store, SequentialIdGen::new(), SystemClock);

    let pending = oplog
        .add(Operation::new("r1", "p1", OpKind::Message("a".to_string())))
        .unwrap();
    let mut running = oplog
        .add(Operation::new("r1", "p1", OpKind::Message("b".to_string())))
        .unwrap();
    running.status = OpStatus::Running;
    oplog.update(running.clone()).unwrap();
    let mut finished = oplog
        .add(Operation::new("r1", "p1", OpKind::Message("c".to_string())))
        .unwrap();
    finished.status = OpStatus::Success;
    oplog.update(finished.clone()).unwrap();

    let now = Utc::now();
    let recovered = recover_interrupted(&oplog, now).unwrap();
    assert_eq!(recovered, 2);

    for id in [pending.id, running.id] {
        let op = oplog.get(id).unwrap();
        assert_eq!(op.status, OpStatus::Error);
        assert_eq!(op.error.as_deref(), Some("interrupted by daemon restart"));
        assert_eq!(op.ended_at, Some(now));
    }
    assert_eq!(oplog.get(finished.id).unwrap().status, OpStatus::Success);

    // Idempotent: a second pass finds nothing open
    assert_eq!(recover_interrupted(&oplog, Utc::now()).unwrap(), 0);
}

#[test]
fn recovered_operations_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = OpStore::open(dir.path()).unwrap();
        let oplog = OpLog::new(store, SequentialIdGen::new(), SystemClock);
        let mut op = oplog
            .add(Operation::new("r1", "p1", OpKind::Message("a".to_string())))
            .unwrap();
        op.status = OpStatus::Running;
        oplog.update(op).unwrap();
        recover_interrupted(&oplog, Utc::now()).unwrap();
    }

    let store = OpStore::open(dir.path()).unwrap();
    let oplog = OpLog::new(store, SequentialIdGen::starting_at(10), SystemClock);
    let ops = oplog.query(&Query::all());
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OpStatus::Error);
}
