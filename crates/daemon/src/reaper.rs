// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease reaper and startup recovery.
//!
//! A job whose worker stopped heartbeating is requeued, or finished as
//! `WORKER_LOST` once it has used its attempts. Abandoned jobs get an
//! artifact set (`meta.json` plus empty logs) written before the ledger
//! records the terminal status.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pinrun_core::{Clock, ErrorClass, Job, JobId, JobOutcome, JobStatus};
use pinrun_engine::artifacts::{META_JSON, STDERR_LOG, STDOUT_LOG};
use pinrun_engine::{ArtifactError, ArtifactMeta, ArtifactStore, WorktreeProvisioner};
use tokio_util::sync::CancellationToken;

use crate::ledger::{JobLedger, LeaseCheck, Transition};
use crate::queue::JobQueue;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub requeued: Vec<JobId>,
    pub abandoned: Vec<JobId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.abandoned.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reclaimed: ReapReport,
    /// Terminal jobs whose artifact pointer was restored from disk
    pub backfilled: usize,
    /// Jobs placed in the queue (previously queued plus requeued)
    pub queued: usize,
    pub worktrees_removed: usize,
}

pub struct Reaper<C: Clock> {
    ledger: Arc<JobLedger<C>>,
    queue: Arc<JobQueue>,
    artifacts: ArtifactStore,
    max_attempts: u32,
}

impl<C: Clock> Reaper<C> {
    pub fn new(
        ledger: Arc<JobLedger<C>>,
        queue: Arc<JobQueue>,
        artifacts: ArtifactStore,
        max_attempts: u32,
    ) -> Self {
        Self { ledger, queue, artifacts, max_attempts: max_attempts.max(1) }
    }

    /// Reclaim every running job whose lease has expired.
    pub async fn sweep(&self) -> ReapReport {
        let expired = self.ledger.expired_leases();
        let report = self.reclaim(expired, LeaseCheck::Expired, "lease expired").await;
        for id in &report.requeued {
            self.queue.push(id.clone());
        }
        report
    }

    /// Bring the ledger, queue and disk back in line after a restart.
    ///
    /// Must run before the worker pool starts: every `running` job belongs
    /// to the previous process.
    pub async fn recover(&self, worktrees: &WorktreeProvisioner) -> RecoveryReport {
        let running = self.ledger.with_status(JobStatus::Running);
        let reclaimed = self.reclaim(running, LeaseCheck::Ignore, "daemon restarted").await;

        let mut backfilled = 0;
        for job in self.ledger.missing_artifacts() {
            let Ok(dir) = self.artifacts.dir_for(&job.id) else { continue };
            if !tokio::fs::try_exists(dir.join(META_JSON)).await.unwrap_or(false) {
                continue;
            }
            match self.ledger.backfill_artifacts(&job.id, dir) {
                Ok(()) => backfilled += 1,
                Err(e) => tracing::warn!(job_id = %job.id, error = %e, "artifact backfill failed"),
            }
        }

        let queued = self.ledger.with_status(JobStatus::Queued);
        for job in &queued {
            self.queue.push(job.id.clone());
        }

        let mirror_paths: Vec<PathBuf> =
            self.ledger.state().mirrors.values().map(|m| m.path.clone()).collect();
        let removed = worktrees.sweep_orphans(&HashSet::new(), &mirror_paths).await;

        let report = RecoveryReport {
            reclaimed,
            backfilled,
            queued: queued.len(),
            worktrees_removed: removed.len(),
        };
        tracing::info!(
            requeued = report.reclaimed.requeued.len(),
            abandoned = report.reclaimed.abandoned.len(),
            backfilled = report.backfilled,
            queued = report.queued,
            worktrees_removed = report.worktrees_removed,
            "recovery complete"
        );
        report
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = self.sweep().await;
            if !report.is_empty() {
                tracing::info!(
                    requeued = report.requeued.len(),
                    abandoned = report.abandoned.len(),
                    "reaped expired leases"
                );
            }
        }
        tracing::debug!("reaper stopped");
    }

    async fn reclaim(&self, jobs: Vec<Job>, check: LeaseCheck, reason: &str) -> ReapReport {
        let mut report = ReapReport::default();
        for job in jobs {
            if job.attempts >= self.max_attempts {
                if self.abandon(&job, check, reason).await {
                    report.abandoned.push(job.id);
                }
                continue;
            }

            let requeue = Transition::Requeue { reason: reason.to_string(), check };
            match self.ledger.transition(&job.id, requeue) {
                Ok(_) => {
                    tracing::info!(job_id = %job.id, attempts = job.attempts, reason, "job requeued");
                    report.requeued.push(job.id);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(job_id = %job.id, error = %e, "requeue raced");
                }
                Err(e) => tracing::error!(job_id = %job.id, error = %e, "requeue failed"),
            }
        }
        report
    }

    async fn abandon(&self, job: &Job, check: LeaseCheck, reason: &str) -> bool {
        let diagnostic = format!("{reason} after {} attempts", job.attempts);
        let artifact_dir = match self.write_lost_artifacts(job, &diagnostic).await {
            Ok(dir) => Some(dir),
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "could not write artifacts for lost job");
                None
            }
        };

        let abandon = Transition::Abandon { reason: diagnostic, check, artifact_dir };
        match self.ledger.transition(&job.id, abandon) {
            Ok(_) => {
                tracing::warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error_class = ErrorClass::WorkerLost.as_str(),
                    "job abandoned"
                );
                true
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "abandon failed");
                false
            }
        }
    }

    async fn write_lost_artifacts(&self, job: &Job, diagnostic: &str) -> Result<PathBuf, ArtifactError> {
        let outcome = JobOutcome::failed(ErrorClass::WorkerLost, diagnostic);
        let meta = ArtifactMeta::new(job, &outcome, None, self.ledger.clock().epoch_ms());

        let handle = self.artifacts.open(&job.id).await?;
        handle.write(STDOUT_LOG, b"").await?;
        handle.write(STDERR_LOG, b"").await?;
        handle.write_json(META_JSON, &meta).await?;
        handle.finalize().await
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
