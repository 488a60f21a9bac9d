// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{open_ledger, test_allowlist};
use pinrun_core::test_support::{job_request, TEST_SHA};
use pinrun_core::{FakeClock, JobStatus};
use tempfile::TempDir;
use yare::parameterized;

struct Harness {
    dir: TempDir,
    ledger: Arc<JobLedger<FakeClock>>,
    queue: Arc<JobQueue>,
    service: Arc<JobService<FakeClock>>,
}

impl Harness {
    fn with_capacity(capacity: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path(), &FakeClock::new());
        let queue = Arc::new(JobQueue::new(capacity));
        let service = Arc::new(JobService::new(
            Arc::clone(&ledger),
            Arc::clone(&queue),
            test_allowlist(),
            ArtifactStore::new(dir.path().join("artifacts")),
            4,
        ));
        Self { dir, ledger, queue, service }
    }

    fn new() -> Self {
        Self::with_capacity(16)
    }
}

#[test]
fn submit_queues_job_and_reports_artifact_dir() {
    let h = Harness::new();
    let sub = h.service.submit(job_request(None)).unwrap();

    assert!(!sub.deduplicated);
    assert_eq!(sub.job.status, JobStatus::Queued);
    assert_eq!(sub.artifact_dir, h.dir.path().join("artifacts").join(sub.job.id.as_str()));
    assert_eq!(h.queue.try_pop(), Some(sub.job.id));
}

#[test]
fn submit_normalizes_sha() {
    let h = Harness::new();
    let mut request = job_request(None);
    request.sha = TEST_SHA.to_uppercase();

    let sub = h.service.submit(request).unwrap();
    assert_eq!(sub.job.sha, TEST_SHA);
}

#[test]
fn unknown_job_type_creates_nothing() {
    let h = Harness::new();
    let mut request = job_request(None);
    request.job_type = "rm_rf".to_string();

    let err = h.service.submit(request).unwrap_err();
    assert!(matches!(err, SubmitError::UnknownJobType(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.ledger.list_recent(10).is_empty());
    assert!(h.queue.is_empty());
    assert!(!h.dir.path().join("artifacts").exists());
}

#[parameterized(
    bad_sha = { |r: &mut JobRequest| r.sha = "abc123".into() },
    bad_repo = { |r: &mut JobRequest| r.repo_name = "../etc".into() },
    bad_url = { |r: &mut JobRequest| r.remote_url = "--upload-pack=evil".into() },
    bad_type = { |r: &mut JobRequest| r.job_type = "Local Echo".into() },
)]
fn malformed_request_is_rejected(mutate: fn(&mut JobRequest)) {
    let h = Harness::new();
    let mut request = job_request(None);
    mutate(&mut request);

    let err = h.service.submit(request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.ledger.list_recent(10).is_empty());
}

#[test]
fn repeated_key_returns_existing_job() {
    let h = Harness::new();
    let first = h.service.submit(job_request(Some("build-42"))).unwrap();
    let second = h.service.submit(job_request(Some("build-42"))).unwrap();

    assert!(second.deduplicated);
    assert_eq!(first.job.id, second.job.id);
    assert_eq!(h.queue.len(), 1);
}

#[test]
fn concurrent_submissions_with_one_key_yield_one_job() {
    let h = Harness::new();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&h.service);
            std::thread::spawn(move || service.submit(job_request(Some("same"))).unwrap())
        })
        .collect();
    let subs: Vec<Submission> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    let id = &subs[0].job.id;
    assert!(subs.iter().all(|s| &s.job.id == id));
    assert_eq!(subs.iter().filter(|s| !s.deduplicated).count(), 1);
    assert_eq!(h.ledger.list_recent(10).len(), 1);
    assert_eq!(h.queue.len(), 1);
}

#[test]
fn full_queue_rejects_new_work() {
    let h = Harness::with_capacity(1);
    h.service.submit(job_request(None)).unwrap();

    let err = h.service.submit(job_request(None)).unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull { capacity: 1 }));
    assert_eq!(err.kind(), ErrorKind::QueueFull);
    assert_eq!(h.ledger.list_recent(10).len(), 1);
}

#[test]
fn full_queue_still_answers_duplicates() {
    let h = Harness::with_capacity(1);
    let first = h.service.submit(job_request(Some("k"))).unwrap();

    let again = h.service.submit(job_request(Some("k"))).unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.job.id, first.job.id);
}

#[test]
fn shutting_down_refuses_submissions() {
    let h = Harness::new();
    h.service.begin_shutdown();
    assert!(matches!(h.service.submit(job_request(None)), Err(SubmitError::ShuttingDown)));
}

#[test]
fn list_defaults_and_clamps_limit() {
    let h = Harness::new();
    for _ in 0..3 {
        h.service.submit(job_request(None)).unwrap();
    }
    assert_eq!(h.service.list(None).len(), 3);
    assert_eq!(h.service.list(Some(2)).len(), 2);
    assert_eq!(h.service.list(Some(0)).len(), 1);
}

#[tokio::test]
async fn logs_for_unknown_job_is_not_found() {
    let h = Harness::new();
    let err = h.service.logs("job-nope", LogStream::Stdout, None).await.unwrap_err();
    assert!(matches!(err, LogsError::JobNotFound(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn logs_before_run_is_not_found() {
    let h = Harness::new();
    let sub = h.service.submit(job_request(None)).unwrap();
    let err = h.service.logs(sub.job.id.as_str(), LogStream::Stderr, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn logs_tails_captured_output() {
    let h = Harness::new();
    let sub = h.service.submit(job_request(None)).unwrap();
    std::fs::create_dir_all(&sub.artifact_dir).unwrap();
    std::fs::write(sub.artifact_dir.join("stdout.log"), "one\ntwo\nthree\n").unwrap();

    let content = h.service.logs(sub.job.id.as_str(), LogStream::Stdout, Some(2)).await.unwrap();
    assert_eq!(content, "two\nthree\n");
}

#[test]
fn health_counts_jobs() {
    let h = Harness::new();
    h.service.submit(job_request(None)).unwrap();
    let health = h.service.health();
    assert_eq!(health.queued, 1);
    assert_eq!(health.running, 0);
    assert_eq!(health.workers, 4);
}
