// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pinrun_core::test_support::{leased_event, submitted_event};
use pinrun_core::{Event, JobStatus};
use tempfile::tempdir;

fn append(wal: &mut Wal, state: &mut MaterializedState, event: Event) {
    wal.append(&event).unwrap();
    state.apply_event(&event);
}

#[test]
fn is_due_after_threshold() {
    let checkpointer = Checkpointer::new("/tmp/unused", 10, 5);
    assert!(!checkpointer.is_due(14));
    assert!(checkpointer.is_due(15));
}

#[test]
fn checkpoint_truncates_wal_and_restores() {
    let dir = tempdir().unwrap();
    let snap = dir.path().join("snapshot.json");
    let wal_path = dir.path().join("ledger.wal");

    let mut wal = Wal::open(&wal_path, 0).unwrap();
    let mut state = MaterializedState::default();
    append(&mut wal, &mut state, submitted_event("job-a", None));
    append(&mut wal, &mut state, submitted_event("job-b", None));

    let mut checkpointer = Checkpointer::new(&snap, DEFAULT_CHECKPOINT_EVERY, 0);
    assert_eq!(checkpointer.checkpoint(&mut wal, &state).unwrap(), 2);
    assert!(wal.entries_after(0).unwrap().is_empty());

    // Events after the checkpoint live only in the WAL
    append(&mut wal, &mut state, leased_event("job-a", "wkr-1", 9_000));
    wal.flush().unwrap();
    drop(wal);

    let (restored, snapshot_seq, wal) = load_snapshot(&snap, &wal_path).unwrap();
    assert_eq!(snapshot_seq, 2);
    assert_eq!(wal.write_seq(), 3);
    assert_eq!(restored.get_job("job-a").unwrap().status, JobStatus::Running);
    assert_eq!(restored.get_job("job-b").unwrap().status, JobStatus::Queued);
}

#[test]
fn load_without_snapshot_replays_whole_wal() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("ledger.wal");
    {
        let mut wal = Wal::open(&wal_path, 0).unwrap();
        wal.append(&submitted_event("job-a", Some("k"))).unwrap();
        wal.flush().unwrap();
    }

    let (state, snapshot_seq, wal) =
        load_snapshot(&dir.path().join("snapshot.json"), &wal_path).unwrap();
    assert_eq!(snapshot_seq, 0);
    assert_eq!(wal.write_seq(), 1);
    assert_eq!(state.idempotency.len(), 1);
}
