// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pinrun_core::test_support::{finished_event, leased_event, submitted_event};
use pinrun_core::{ErrorClass, JobOutcome, WorkerId};

mod jobs;
mod mirrors;

/// Apply every event twice; handlers must make that equivalent to once.
fn apply_twice(state: &mut MaterializedState, events: &[Event]) {
    for event in events {
        state.apply_event(event);
        state.apply_event(event);
    }
}

#[test]
fn get_job_by_exact_id_or_unique_prefix() {
    let mut state = MaterializedState::default();
    state.apply_event(&submitted_event("job-abc123", None));
    state.apply_event(&submitted_event("job-abd456", None));

    assert!(state.get_job("job-abc123").is_some());
    assert_eq!(state.get_job("job-abc").map(|j| j.id.as_str()), Some("job-abc123"));
    // Ambiguous
    assert!(state.get_job("job-ab").is_none());
    assert!(state.get_job("").is_none());
    assert!(state.get_job("job-zzz").is_none());
}

#[test]
fn list_recent_is_newest_first_and_limited() {
    let mut state = MaterializedState::default();
    for (i, id) in ["job-a", "job-b", "job-c"].iter().enumerate() {
        let mut event = submitted_event(id, None);
        if let Event::JobSubmitted { submitted_at_ms, .. } = &mut event {
            *submitted_at_ms = 1_000 + i as u64;
        }
        state.apply_event(&event);
    }

    let ids: Vec<&str> = state.list_recent(2).iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["job-c", "job-b"]);
    assert_eq!(state.list_recent(10).len(), 3);
}

#[test]
fn expired_leases_only_for_running_jobs() {
    let mut state = MaterializedState::default();
    state.apply_event(&submitted_event("job-a", None));
    state.apply_event(&submitted_event("job-b", None));
    state.apply_event(&leased_event("job-a", "wkr-1", 5_000));

    assert!(state.expired_leases(4_999).is_empty());
    let expired: Vec<&str> = state.expired_leases(5_000).iter().map(|j| j.id.as_str()).collect();
    assert_eq!(expired, vec!["job-a"]);
}

#[test]
fn rebuild_indexes_restores_dedup_index() {
    let mut state = MaterializedState::default();
    state.apply_event(&submitted_event("job-a", Some("k1")));
    state.idempotency.clear();

    state.rebuild_indexes();

    let key = pinrun_core::job::dedup_key("local_echo", "demo", "k1");
    assert_eq!(state.find_by_dedup_key(&key).map(|j| j.id.as_str()), Some("job-a"));
}

#[test]
fn full_lifecycle_is_idempotent_under_double_apply() {
    let mut once = MaterializedState::default();
    let mut twice = MaterializedState::default();
    let events = vec![
        submitted_event("job-a", Some("k")),
        leased_event("job-a", "wkr-1", 10_000),
        Event::JobLeaseRenewed {
            id: JobId::from_string("job-a"),
            worker: WorkerId::from_string("wkr-1"),
            expires_at_ms: 20_000,
        },
        finished_event("job-a", JobOutcome::failed(ErrorClass::Timeout, "took too long")),
        Event::JobArtifacts { id: JobId::from_string("job-a"), artifact_dir: "/art/job-a".into() },
    ];

    for event in &events {
        once.apply_event(event);
    }
    apply_twice(&mut twice, &events);

    let a = once.get_job("job-a").unwrap();
    let b = twice.get_job("job-a").unwrap();
    assert_eq!(a, b);
    assert_eq!(b.attempts, 1);
    assert_eq!(b.status, JobStatus::Failure);
    assert_eq!(once.idempotency, twice.idempotency);
}

#[test]
fn state_serde_round_trip() {
    let mut state = MaterializedState::default();
    state.apply_event(&submitted_event("job-a", Some("k")));
    state.apply_event(&Event::MirrorCreated {
        repo_name: "demo".into(),
        remote_url: "file:///demo".into(),
        path: "/m/demo.git".into(),
        created_at_ms: 1,
    });

    let json = serde_json::to_string(&state).unwrap();
    let parsed: MaterializedState = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.jobs, state.jobs);
    assert_eq!(parsed.idempotency, state.idempotency);
    assert_eq!(parsed.mirrors, state.mirrors);
}
