// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job ledger: the durable, single-writer record of every job.
//!
//! Every change is an [`Event`] appended and fsynced to the WAL before it is
//! applied to the in-memory [`MaterializedState`]. Status changes go through
//! [`JobLedger::transition`], a compare-and-swap on the job's status (and,
//! for running jobs, its lease), so two workers can never both finish the
//! same job.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use pinrun_core::{
    Clock, ErrorClass, Event, Job, JobId, JobOutcome, JobRequest, JobStatus, WorkerId,
};
use pinrun_storage::{
    load_snapshot, CheckpointError, Checkpointer, MaterializedState, Wal, WalError,
    DEFAULT_CHECKPOINT_EVERY,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict { job_id: JobId, expected: JobStatus, actual: JobStatus },

    #[error("job {job_id} is not leased by {worker}")]
    LeaseNotHeld { job_id: JobId, worker: WorkerId },

    #[error("lease on job {0} has not expired")]
    LeaseActive(JobId),

    #[error("outcome status {0} is not terminal")]
    NotTerminal(JobStatus),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl LedgerError {
    /// Lost a race: the job moved on without us.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::Conflict { .. }
                | LedgerError::LeaseNotHeld { .. }
                | LedgerError::LeaseActive(_)
        )
    }
}

/// Whether a requeue/abandon requires the lease to have expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseCheck {
    /// Reaper: only expired leases
    Expired,
    /// Startup recovery: the holder belonged to a dead process
    Ignore,
}

/// A status change, checked against the job's current status.
#[derive(Debug, Clone)]
pub enum Transition {
    /// queued → running; first claimer wins
    Claim { worker: WorkerId, lease_ttl: Duration },
    /// running → running; extends the caller's lease
    Heartbeat { worker: WorkerId, lease_ttl: Duration },
    /// running → success/failure/error, by the lease holder
    Finish { worker: WorkerId, outcome: JobOutcome },
    /// running → queued
    Requeue { reason: String, check: LeaseCheck },
    /// running → error (`WORKER_LOST`) once attempts are exhausted
    Abandon { reason: String, check: LeaseCheck, artifact_dir: Option<PathBuf> },
}

impl Transition {
    fn from_status(&self) -> JobStatus {
        match self {
            Transition::Claim { .. } => JobStatus::Queued,
            _ => JobStatus::Running,
        }
    }
}

/// Result of [`JobLedger::insert`].
#[derive(Debug, Clone)]
pub struct Inserted {
    pub job: Job,
    /// An existing job matched the idempotency key; nothing was written
    pub deduplicated: bool,
}

struct LedgerInner {
    state: MaterializedState,
    wal: Wal,
    checkpointer: Checkpointer,
}

impl LedgerInner {
    fn append(&mut self, event: Event) -> Result<(), LedgerError> {
        self.wal.append(&event)?;
        self.wal.flush()?;
        self.state.apply_event(&event);
        tracing::debug!(seq = self.wal.write_seq(), "{}", event.log_summary());

        if self.checkpointer.is_due(self.wal.write_seq()) {
            if let Err(e) = self.checkpointer.checkpoint(&mut self.wal, &self.state) {
                tracing::warn!(error = %e, "periodic checkpoint failed");
            }
        }
        Ok(())
    }

    fn job(&self, id: &JobId) -> Result<&Job, LedgerError> {
        self.state.jobs.get(id.as_str()).ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }
}

pub struct JobLedger<C: Clock> {
    inner: Mutex<LedgerInner>,
    clock: C,
}

impl<C: Clock> JobLedger<C> {
    /// Restore from `snapshot_path` plus the WAL tail at `wal_path`.
    pub fn open(wal_path: &Path, snapshot_path: &Path, clock: C) -> Result<Self, LedgerError> {
        Self::open_with_checkpoint_every(wal_path, snapshot_path, DEFAULT_CHECKPOINT_EVERY, clock)
    }

    pub fn open_with_checkpoint_every(
        wal_path: &Path,
        snapshot_path: &Path,
        checkpoint_every: u64,
        clock: C,
    ) -> Result<Self, LedgerError> {
        let (state, snapshot_seq, wal) = load_snapshot(snapshot_path, wal_path)?;
        let checkpointer = Checkpointer::new(snapshot_path, checkpoint_every, snapshot_seq);
        Ok(Self { inner: Mutex::new(LedgerInner { state, wal, checkpointer }), clock })
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record a new job, or return the existing one for a duplicate
    /// `(job_type, repo_name, idempotency_key)`.
    pub fn insert(&self, request: JobRequest) -> Result<Inserted, LedgerError> {
        let mut inner = self.inner.lock();
        if let Some(key) = request.dedup_key() {
            if let Some(job) = inner.state.find_by_dedup_key(&key) {
                return Ok(Inserted { job: job.clone(), deduplicated: true });
            }
        }

        let id = JobId::new();
        let submitted_at_ms = self.clock.epoch_ms();
        inner.append(Event::JobSubmitted { id: id.clone(), request, submitted_at_ms })?;
        let job = inner.job(&id)?.clone();
        Ok(Inserted { job, deduplicated: false })
    }

    /// Compare-and-swap a job's status. On mismatch nothing is written.
    pub fn transition(&self, id: &JobId, transition: Transition) -> Result<Job, LedgerError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        let job = inner.job(id)?;

        let expected = transition.from_status();
        if job.status != expected {
            return Err(LedgerError::Conflict { job_id: id.clone(), expected, actual: job.status });
        }

        let event = match transition {
            Transition::Claim { worker, lease_ttl } => Event::JobLeased {
                id: id.clone(),
                worker,
                started_at_ms: now,
                expires_at_ms: now.saturating_add(ttl_ms(lease_ttl)),
            },
            Transition::Heartbeat { worker, lease_ttl } => {
                require_holder(job, &worker)?;
                Event::JobLeaseRenewed {
                    id: id.clone(),
                    worker,
                    expires_at_ms: now.saturating_add(ttl_ms(lease_ttl)),
                }
            }
            Transition::Finish { worker, outcome } => {
                require_holder(job, &worker)?;
                if !outcome.status.is_terminal() {
                    return Err(LedgerError::NotTerminal(outcome.status));
                }
                Event::JobFinished { id: id.clone(), outcome, finished_at_ms: now }
            }
            Transition::Requeue { reason, check } => {
                require_expired(job, check, now)?;
                Event::JobRequeued { id: id.clone(), reason }
            }
            Transition::Abandon { reason, check, artifact_dir } => {
                require_expired(job, check, now)?;
                let mut outcome = JobOutcome::failed(ErrorClass::WorkerLost, reason);
                if let Some(dir) = artifact_dir {
                    outcome = outcome.with_artifact_dir(dir);
                }
                Event::JobFinished { id: id.clone(), outcome, finished_at_ms: now }
            }
        };

        inner.append(event)?;
        Ok(inner.job(id)?.clone())
    }

    /// Point a terminal job at its artifact set after the fact.
    pub fn backfill_artifacts(&self, id: &JobId, artifact_dir: PathBuf) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        inner.job(id)?;
        inner.append(Event::JobArtifacts { id: id.clone(), artifact_dir })
    }

    /// Append a non-job event (mirror bookkeeping).
    pub fn record(&self, event: Event) -> Result<(), LedgerError> {
        self.inner.lock().append(event)
    }

    /// Job by exact ID or unique prefix.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.lock().state.get_job(id).cloned()
    }

    pub fn find_duplicate(&self, request: &JobRequest) -> Option<Job> {
        let key = request.dedup_key()?;
        self.inner.lock().state.find_by_dedup_key(&key).cloned()
    }

    pub fn list_recent(&self, limit: usize) -> Vec<Job> {
        self.inner.lock().state.list_recent(limit).into_iter().cloned().collect()
    }

    /// Jobs in `status`, oldest submission first.
    pub fn with_status(&self, status: JobStatus) -> Vec<Job> {
        self.inner.lock().state.jobs_with_status(status).into_iter().cloned().collect()
    }

    pub fn expired_leases(&self) -> Vec<Job> {
        let now = self.clock.epoch_ms();
        self.inner.lock().state.expired_leases(now).into_iter().cloned().collect()
    }

    /// Terminal jobs with no recorded artifact directory.
    pub fn missing_artifacts(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        inner
            .state
            .jobs
            .values()
            .filter(|j| j.is_terminal() && j.artifact_dir.is_none())
            .cloned()
            .collect()
    }

    /// `(queued, running)`
    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.state.count_status(JobStatus::Queued), inner.state.count_status(JobStatus::Running))
    }

    /// Snapshot now and truncate the WAL.
    pub fn checkpoint(&self) -> Result<u64, LedgerError> {
        let mut inner = self.inner.lock();
        let LedgerInner { state, wal, checkpointer } = &mut *inner;
        Ok(checkpointer.checkpoint(wal, state)?)
    }

    pub fn state(&self) -> MaterializedState {
        self.inner.lock().state.clone()
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn require_holder(job: &Job, worker: &WorkerId) -> Result<(), LedgerError> {
    if job.leased_by(worker) {
        Ok(())
    } else {
        Err(LedgerError::LeaseNotHeld { job_id: job.id.clone(), worker: worker.clone() })
    }
}

fn require_expired(job: &Job, check: LeaseCheck, now: u64) -> Result<(), LedgerError> {
    match check {
        LeaseCheck::Ignore => Ok(()),
        LeaseCheck::Expired if job.lease_expired(now) => Ok(()),
        LeaseCheck::Expired => Err(LedgerError::LeaseActive(job.id.clone())),
    }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
