// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::PathBuf;

fn state_with(events: &[Event]) -> MaterializedState {
    let mut state = MaterializedState::default();
    for event in events {
        state.apply_event(event);
    }
    state
}

#[test]
fn submitted_inserts_queued_job_and_index() {
    let state = state_with(&[submitted_event("job-a", Some("k1"))]);

    let job = state.get_job("job-a").unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.idempotency_key.as_deref(), Some("k1"));
    assert_eq!(state.idempotency.len(), 1);
}

#[test]
fn second_submission_with_same_key_keeps_first_index_entry() {
    let state = state_with(&[
        submitted_event("job-a", Some("k1")),
        submitted_event("job-b", Some("k1")),
    ]);

    let key = pinrun_core::job::dedup_key("local_echo", "demo", "k1");
    assert_eq!(state.idempotency.get(&key).map(JobId::as_str), Some("job-a"));
}

#[test]
fn resubmitted_id_does_not_reset_job() {
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        submitted_event("job-a", None),
    ]);
    assert_eq!(state.get_job("job-a").unwrap().status, JobStatus::Running);
}

#[test]
fn leased_moves_queued_to_running() {
    let state = state_with(&[submitted_event("job-a", None), leased_event("job-a", "wkr-1", 9_000)]);

    let job = state.get_job("job-a").unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.started_at_ms, Some(1_000_000));
    assert!(job.leased_by(&WorkerId::from_string("wkr-1")));
}

#[test]
fn second_lease_on_running_job_is_ignored() {
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        leased_event("job-a", "wkr-2", 9_500),
    ]);

    let job = state.get_job("job-a").unwrap();
    assert!(job.leased_by(&WorkerId::from_string("wkr-1")));
    assert_eq!(job.attempts, 1);
}

#[test]
fn renewal_by_non_holder_is_ignored() {
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        Event::JobLeaseRenewed {
            id: JobId::from_string("job-a"),
            worker: WorkerId::from_string("wkr-2"),
            expires_at_ms: 50_000,
        },
    ]);
    assert_eq!(state.get_job("job-a").unwrap().lease.as_ref().unwrap().expires_at_ms, 9_000);
}

#[test]
fn requeue_then_lease_counts_attempts() {
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        Event::JobRequeued { id: JobId::from_string("job-a"), reason: "lease expired".into() },
        leased_event("job-a", "wkr-2", 19_000),
    ]);

    let job = state.get_job("job-a").unwrap();
    assert_eq!(job.attempts, 2);
    assert!(job.leased_by(&WorkerId::from_string("wkr-2")));
}

#[test]
fn requeue_of_queued_job_is_noop() {
    let state = state_with(&[
        submitted_event("job-a", None),
        Event::JobRequeued { id: JobId::from_string("job-a"), reason: "x".into() },
    ]);
    assert_eq!(state.get_job("job-a").unwrap().status, JobStatus::Queued);
}

#[test]
fn finished_records_outcome_and_clears_lease() {
    let outcome = JobOutcome::completed(0, true).with_artifact_dir("/art/job-a");
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        finished_event("job-a", outcome),
    ]);

    let job = state.get_job("job-a").unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.exit_code, Some(0));
    assert!(job.truncated);
    assert!(job.lease.is_none());
    assert_eq!(job.finished_at_ms, Some(2_000_000));
    assert_eq!(job.artifact_dir, Some(PathBuf::from("/art/job-a")));
}

#[test]
fn terminal_jobs_are_immutable() {
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        finished_event("job-a", JobOutcome::failed(ErrorClass::DirtyWorktree, "M file")),
        finished_event("job-a", JobOutcome::completed(0, false)),
        Event::JobRequeued { id: JobId::from_string("job-a"), reason: "x".into() },
        leased_event("job-a", "wkr-2", 99_000),
    ]);

    let job = state.get_job("job-a").unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error_class, Some(ErrorClass::DirtyWorktree));
    assert_eq!(job.attempts, 1);
}

#[test]
fn artifacts_backfill_allowed_on_terminal_job() {
    let state = state_with(&[
        submitted_event("job-a", None),
        leased_event("job-a", "wkr-1", 9_000),
        finished_event("job-a", JobOutcome::failed(ErrorClass::WorkerLost, "gone")),
        Event::JobArtifacts { id: JobId::from_string("job-a"), artifact_dir: "/art/job-a".into() },
    ]);
    assert_eq!(state.get_job("job-a").unwrap().artifact_dir, Some(PathBuf::from("/art/job-a")));
}

#[test]
fn events_for_unknown_jobs_are_ignored() {
    let state = state_with(&[
        leased_event("job-missing", "wkr-1", 9_000),
        finished_event("job-missing", JobOutcome::completed(0, false)),
    ]);
    assert!(state.jobs.is_empty());
}
