// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job entity, status machine and error taxonomy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Server-generated identifier for a submitted job.
    ///
    /// The ID is the only caller-visible handle on a job and the only input
    /// used to derive its worktree and artifact paths.
    pub struct JobId("job-");
}

crate::define_id! {
    /// Identifier of a worker slot in the pool, recorded as the lease holder.
    pub struct WorkerId("wkr-");
}

/// Maximum size of the diagnostic text stored on a job.
pub const MAX_DIAGNOSTIC_BYTES: usize = 4096;

/// Lifecycle status: `queued → running → {success, failure, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failure,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure | JobStatus::Error)
    }
}

crate::simple_display! {
    JobStatus {
        Queued => "queued",
        Running => "running",
        Success => "success",
        Failure => "failure",
        Error => "error",
    }
}

/// Classified reason a job did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Rejected input, or an allowlist entry that vanished before the job ran
    Validation,
    MirrorFetchFailed,
    RefNotFound,
    ExecLaunchFailed,
    Timeout,
    /// The clean-tree assertion failed. Security relevant.
    DirtyWorktree,
    /// Worktree or artifact infrastructure failed before the command ran
    ProvisionFailed,
    /// Lease expired more times than the retry budget allows
    WorkerLost,
}

impl ErrorClass {
    /// Terminal status a job carrying this class ends in.
    pub fn terminal_status(self) -> JobStatus {
        match self {
            ErrorClass::MirrorFetchFailed | ErrorClass::RefNotFound | ErrorClass::Timeout => {
                JobStatus::Failure
            }
            ErrorClass::Validation
            | ErrorClass::ExecLaunchFailed
            | ErrorClass::DirtyWorktree
            | ErrorClass::ProvisionFailed
            | ErrorClass::WorkerLost => JobStatus::Error,
        }
    }

    /// Whether resubmitting the same request (with a fresh idempotency key)
    /// can reasonably produce a different result.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorClass::MirrorFetchFailed | ErrorClass::Timeout | ErrorClass::WorkerLost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Validation => "VALIDATION",
            ErrorClass::MirrorFetchFailed => "MIRROR_FETCH_FAILED",
            ErrorClass::RefNotFound => "REF_NOT_FOUND",
            ErrorClass::ExecLaunchFailed => "EXEC_LAUNCH_FAILED",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::DirtyWorktree => "DIRTY_WORKTREE",
            ErrorClass::ProvisionFailed => "PROVISION_FAILED",
            ErrorClass::WorkerLost => "WORKER_LOST",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-bounded claim a worker holds on a running job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: WorkerId,
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// A validated submission. Every field has passed [`crate::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_type: String,
    pub repo_name: String,
    pub remote_url: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl JobRequest {
    /// Key of the `(job_type, repo_name, idempotency_key)` uniqueness index.
    ///
    /// Neither job types nor repo names may contain `/`, so the encoding is
    /// unambiguous even when the idempotency key does.
    pub fn dedup_key(&self) -> Option<String> {
        self.idempotency_key.as_deref().map(|key| dedup_key(&self.job_type, &self.repo_name, key))
    }
}

pub fn dedup_key(job_type: &str, repo_name: &str, idempotency_key: &str) -> String {
    format!("{job_type}/{repo_name}/{idempotency_key}")
}

/// Result of driving one job through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
}

impl JobOutcome {
    /// A command that ran to completion in a tree that stayed clean.
    pub fn completed(exit_code: i32, truncated: bool) -> Self {
        let status = if exit_code == 0 { JobStatus::Success } else { JobStatus::Failure };
        Self {
            status,
            error_class: None,
            error: None,
            exit_code: Some(exit_code),
            truncated,
            artifact_dir: None,
        }
    }

    /// A classified failure. The status follows from the class.
    pub fn failed(class: ErrorClass, diagnostic: impl Into<String>) -> Self {
        Self {
            status: class.terminal_status(),
            error_class: Some(class),
            error: Some(truncate_diagnostic(diagnostic.into())),
            exit_code: None,
            truncated: false,
            artifact_dir: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }
}

/// Truncate diagnostic text to [`MAX_DIAGNOSTIC_BYTES`] on a char boundary.
pub fn truncate_diagnostic(mut text: String) -> String {
    if text.len() > MAX_DIAGNOSTIC_BYTES {
        let mut end = MAX_DIAGNOSTIC_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Captured output stream of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    /// Artifact file holding this stream.
    pub fn file_name(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout.log",
            LogStream::Stderr => "stderr.log",
        }
    }
}

crate::simple_display! {
    LogStream {
        Stdout => "stdout",
        Stderr => "stderr",
    }
}

impl std::str::FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            other => Err(format!("unknown stream {other:?} (expected stdout or stderr)")),
        }
    }
}

/// Lines returned by a log tail when the caller gives no count.
pub const DEFAULT_TAIL_LINES: usize = 100;
/// Upper bound on lines returned by a log tail.
pub const MAX_TAIL_LINES: usize = 10_000;

/// Durable record of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub repo_name: String,
    pub remote_url: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
    pub submitted_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Number of times a worker has claimed this job
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
}

impl Job {
    /// A freshly submitted job in `queued` status.
    pub fn queued(id: JobId, request: JobRequest, submitted_at_ms: u64) -> Self {
        Self {
            id,
            job_type: request.job_type,
            repo_name: request.repo_name,
            remote_url: request.remote_url,
            sha: request.sha,
            idempotency_key: request.idempotency_key,
            status: JobStatus::Queued,
            error_class: None,
            error: None,
            exit_code: None,
            truncated: false,
            submitted_at_ms,
            started_at_ms: None,
            finished_at_ms: None,
            artifact_dir: None,
            attempts: 0,
            lease: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `worker` currently holds the lease on this job.
    pub fn leased_by(&self, worker: &WorkerId) -> bool {
        self.status == JobStatus::Running
            && self.lease.as_ref().is_some_and(|lease| &lease.holder == worker)
    }

    /// Running with a lease whose expiry has passed.
    pub fn lease_expired(&self, now_ms: u64) -> bool {
        self.status == JobStatus::Running
            && match &self.lease {
                Some(lease) => lease.is_expired(now_ms),
                None => true,
            }
    }

    pub fn dedup_key(&self) -> Option<String> {
        self.idempotency_key.as_deref().map(|key| dedup_key(&self.job_type, &self.repo_name, key))
    }

    pub fn request(&self) -> JobRequest {
        JobRequest {
            job_type: self.job_type.clone(),
            repo_name: self.repo_name.clone(),
            remote_url: self.remote_url.clone(),
            sha: self.sha.clone(),
            idempotency_key: self.idempotency_key.clone(),
        }
    }

    /// Wall time between start and finish of the last attempt.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.finished_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            job_type: String = "local_echo",
            repo_name: String = "demo",
            remote_url: String = "file:///tmp/demo.git",
            sha: String = "0123456789abcdef0123456789abcdef01234567",
        }
        set {
            id: JobId = JobId::new(),
            status: JobStatus = JobStatus::Queued,
            truncated: bool = false,
            submitted_at_ms: u64 = 1_000_000,
            attempts: u32 = 0,
        }
        option {
            idempotency_key: String,
            error_class: ErrorClass,
            error: String,
            exit_code: i32,
            started_at_ms: u64,
            finished_at_ms: u64,
            artifact_dir: PathBuf,
            lease: Lease,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
