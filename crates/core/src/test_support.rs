// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::job::{JobId, JobOutcome, JobRequest, WorkerId};
use crate::Event;

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for core types.
pub mod strategies {
    use crate::job::{ErrorClass, JobStatus};
    use proptest::prelude::*;

    pub fn arb_job_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Queued),
            Just(JobStatus::Running),
            Just(JobStatus::Success),
            Just(JobStatus::Failure),
            Just(JobStatus::Error),
        ]
    }

    pub fn arb_error_class() -> impl Strategy<Value = ErrorClass> {
        prop_oneof![
            Just(ErrorClass::Validation),
            Just(ErrorClass::MirrorFetchFailed),
            Just(ErrorClass::RefNotFound),
            Just(ErrorClass::ExecLaunchFailed),
            Just(ErrorClass::Timeout),
            Just(ErrorClass::DirtyWorktree),
            Just(ErrorClass::ProvisionFailed),
            Just(ErrorClass::WorkerLost),
        ]
    }

    /// 40-character lowercase hex strings.
    pub fn arb_sha() -> impl Strategy<Value = String> {
        "[0-9a-f]{40}"
    }
}

// ── Factory functions ─────────────────────────────────────────────────

pub const TEST_SHA: &str = "0123456789abcdef0123456789abcdef01234567";

pub fn job_request(idempotency_key: Option<&str>) -> JobRequest {
    JobRequest {
        job_type: "local_echo".to_string(),
        repo_name: "demo".to_string(),
        remote_url: "file:///tmp/demo.git".to_string(),
        sha: TEST_SHA.to_string(),
        idempotency_key: idempotency_key.map(String::from),
    }
}

pub fn submitted_event(id: &str, idempotency_key: Option<&str>) -> Event {
    Event::JobSubmitted {
        id: JobId::from_string(id),
        request: job_request(idempotency_key),
        submitted_at_ms: 1_000_000,
    }
}

pub fn leased_event(id: &str, worker: &str, expires_at_ms: u64) -> Event {
    Event::JobLeased {
        id: JobId::from_string(id),
        worker: WorkerId::from_string(worker),
        started_at_ms: 1_000_000,
        expires_at_ms,
    }
}

pub fn finished_event(id: &str, outcome: JobOutcome) -> Event {
    Event::JobFinished { id: JobId::from_string(id), outcome, finished_at_ms: 2_000_000 }
}
