// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job submission and queries: everything the socket exposes, minus framing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use pinrun_core::{validate, Clock, Job, JobRequest, LogStream, ValidationError};
use pinrun_engine::{AllowlistError, AllowlistRegistry, ArtifactError, ArtifactStore};
use pinrun_wire::ErrorKind;
use thiserror::Error;

use crate::ledger::{JobLedger, LedgerError};
use crate::queue::JobQueue;

/// Jobs returned by `list` when the caller gives no limit.
pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    UnknownJobType(AllowlistError),

    #[error("queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("daemon is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Invalid(_) | SubmitError::UnknownJobType(_) => ErrorKind::Validation,
            SubmitError::QueueFull { .. } => ErrorKind::QueueFull,
            SubmitError::ShuttingDown
            | SubmitError::Ledger(_)
            | SubmitError::Artifact(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogsError {
    #[error("job {0} not found")]
    JobNotFound(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl LogsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LogsError::JobNotFound(_)
            | LogsError::Artifact(ArtifactError::NotFound { .. } | ArtifactError::InvalidJobId(_)) => {
                ErrorKind::NotFound
            }
            LogsError::Artifact(_) => ErrorKind::Internal,
        }
    }
}

/// Accepted submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub job: Job,
    pub artifact_dir: PathBuf,
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub uptime_secs: u64,
    pub queued: usize,
    pub running: usize,
    pub workers: usize,
}

pub struct JobService<C: Clock> {
    ledger: Arc<JobLedger<C>>,
    queue: Arc<JobQueue>,
    allowlist: Arc<AllowlistRegistry>,
    artifacts: ArtifactStore,
    workers: usize,
    started: Instant,
    shutting_down: AtomicBool,
}

impl<C: Clock> JobService<C> {
    pub fn new(
        ledger: Arc<JobLedger<C>>,
        queue: Arc<JobQueue>,
        allowlist: Arc<AllowlistRegistry>,
        artifacts: ArtifactStore,
        workers: usize,
    ) -> Self {
        Self {
            ledger,
            queue,
            allowlist,
            artifacts,
            workers,
            started: Instant::now(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Validate and enqueue a job, or return the existing one for a repeated
    /// idempotency key.
    ///
    /// Nothing is written for an unknown job type or a full queue.
    pub fn submit(&self, request: JobRequest) -> Result<Submission, SubmitError> {
        if self.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }
        validate::job_type(&request.job_type)?;
        self.allowlist.resolve(&request.job_type).map_err(SubmitError::UnknownJobType)?;
        let request = validate::request(request)?;

        // Duplicates are answered even when the queue is full
        if let Some(job) = self.ledger.find_duplicate(&request) {
            return self.submission(job, true);
        }

        let reservation = self
            .queue
            .reserve()
            .ok_or(SubmitError::QueueFull { capacity: self.queue.capacity() })?;
        let inserted = self.ledger.insert(request)?;
        if inserted.deduplicated {
            drop(reservation);
        } else {
            reservation.commit(inserted.job.id.clone());
            tracing::info!(
                job_id = %inserted.job.id,
                job_type = %inserted.job.job_type,
                repo = %inserted.job.repo_name,
                sha = %inserted.job.sha,
                "job submitted"
            );
        }
        self.submission(inserted.job, inserted.deduplicated)
    }

    fn submission(&self, job: Job, deduplicated: bool) -> Result<Submission, SubmitError> {
        let artifact_dir = self.artifacts.dir_for(&job.id)?;
        Ok(Submission { job, artifact_dir, deduplicated })
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.ledger.get(id)
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<Job> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.ledger.list_recent(limit)
    }

    pub async fn logs(
        &self,
        id: &str,
        stream: LogStream,
        tail: Option<usize>,
    ) -> Result<String, LogsError> {
        let job = self.ledger.get(id).ok_or_else(|| LogsError::JobNotFound(id.to_string()))?;
        Ok(self.artifacts.tail(&job.id, stream, tail).await?)
    }

    /// Liveness counters. Never touches the pipeline.
    pub fn health(&self) -> HealthReport {
        let (queued, running) = self.ledger.counts();
        HealthReport {
            uptime_secs: self.started.elapsed().as_secs(),
            queued,
            running,
            workers: self.workers,
        }
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
