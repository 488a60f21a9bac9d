// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job pipeline: allowlist → mirror → worktree → lock → execute →
//! clean-tree assertion → teardown → artifacts.
//!
//! Every failure is captured into the returned [`JobOutcome`]; nothing is
//! raised to the worker. A dirty tree overrides any other result.

use crate::allowlist::{AllowlistEntry, AllowlistRegistry};
use crate::artifacts::{
    ArtifactHandle, ArtifactMeta, ArtifactStore, DIRTY_TXT, EXIT_CODE, META_JSON, STDERR_LOG,
    STDOUT_LOG,
};
use crate::executor::{ExecContext, ExecError, ExecResult, Executor};
use crate::guard::{self, CleanOutcome};
use crate::mirror::MirrorStore;
use crate::worktree::{Worktree, WorktreeProvisioner};
use async_trait::async_trait;
use pinrun_core::{Clock, ErrorClass, Event, Job, JobOutcome, JobStatus};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Runs one claimed job to a terminal outcome.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: &Job) -> JobOutcome;
}

/// Components the pipeline drives.
pub struct PipelineDeps {
    pub allowlist: Arc<AllowlistRegistry>,
    pub mirrors: Arc<MirrorStore>,
    pub worktrees: WorktreeProvisioner,
    pub executor: Executor,
    pub artifacts: ArtifactStore,
}

pub struct Pipeline<C: Clock> {
    allowlist: Arc<AllowlistRegistry>,
    mirrors: Arc<MirrorStore>,
    worktrees: WorktreeProvisioner,
    executor: Executor,
    artifacts: ArtifactStore,
    clock: C,
    /// Mirror bookkeeping events for the ledger
    event_tx: mpsc::Sender<Event>,
}

/// What one attempt produced, before artifacts are written.
#[derive(Debug)]
struct RunRecord {
    outcome: JobOutcome,
    exec: Option<ExecResult>,
    dirty: Option<String>,
}

impl RunRecord {
    fn failed(class: ErrorClass, diagnostic: impl Into<String>) -> Self {
        Self { outcome: JobOutcome::failed(class, diagnostic), exec: None, dirty: None }
    }

    /// Force `error`/`DIRTY_WORKTREE`, keeping earlier findings.
    fn mark_dirty(&mut self, finding: String) {
        let summary = match self.dirty.take() {
            Some(earlier) => format!("{earlier}\n{finding}"),
            None => finding,
        };
        self.outcome = JobOutcome::failed(ErrorClass::DirtyWorktree, summary.clone())
            .with_exit_code(self.outcome.exit_code)
            .with_truncated(self.outcome.truncated);
        self.dirty = Some(summary);
    }
}

impl<C: Clock> Pipeline<C> {
    pub fn new(deps: PipelineDeps, clock: C, event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            allowlist: deps.allowlist,
            mirrors: deps.mirrors,
            worktrees: deps.worktrees,
            executor: deps.executor,
            artifacts: deps.artifacts,
            clock,
            event_tx,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    async fn attempt(&self, job: &Job) -> RunRecord {
        let entry = match self.allowlist.resolve(&job.job_type) {
            Ok(entry) => entry,
            Err(e) => return RunRecord::failed(ErrorClass::Validation, e.to_string()),
        };

        let repo_lock = self.mirrors.lock_repo(&job.repo_name).await;
        let mirror = match self.mirrors.ensure(&repo_lock, &job.remote_url).await {
            Ok(mirror) => mirror,
            Err(e) => return RunRecord::failed(e.error_class(), e.to_string()),
        };
        if mirror.created {
            self.emit(Event::MirrorCreated {
                repo_name: mirror.repo_name.clone(),
                remote_url: mirror.remote_url.clone(),
                path: mirror.path.clone(),
                created_at_ms: self.clock.epoch_ms(),
            })
            .await;
        }
        match self.mirrors.fetch(&repo_lock, &mirror).await {
            Ok(report) => {
                tracing::debug!(job_id = %job.id, repo = %job.repo_name, new_refs = report.new_refs.len(), "fetched");
                self.emit(Event::MirrorFetched {
                    repo_name: mirror.repo_name.clone(),
                    fetched_at_ms: self.clock.epoch_ms(),
                })
                .await;
            }
            Err(e) => return RunRecord::failed(e.error_class(), e.to_string()),
        }
        let sha = match self.mirrors.resolve(&repo_lock, &mirror, &job.sha).await {
            Ok(sha) => sha,
            Err(e) => return RunRecord::failed(e.error_class(), e.to_string()),
        };
        let mut worktree = match self.worktrees.provision(&repo_lock, &mirror, &sha, &job.id).await {
            Ok(worktree) => worktree,
            Err(e) => return RunRecord::failed(ErrorClass::ProvisionFailed, e.to_string()),
        };
        drop(repo_lock);

        let mut record = self.execute(job, &worktree, &entry).await;

        let repo_lock = self.mirrors.lock_repo(&job.repo_name).await;
        let destroyed = worktree.destroy().await;
        let mirror_changes = self.mirrors.verify_config(&repo_lock, &mirror).await;
        drop(repo_lock);
        match mirror_changes {
            Ok(changes) if changes.is_empty() => {}
            Ok(changes) => record.mark_dirty(format!(
                "mirror config rewritten during execution:\n{}",
                changes.join("\n")
            )),
            Err(e) => record.mark_dirty(format!("mirror config could not be verified: {e}")),
        }
        if let Err(e) = destroyed {
            tracing::error!(job_id = %job.id, error = %e, "worktree teardown failed");
            if record.dirty.is_none() {
                let exit_code = record.outcome.exit_code;
                record.outcome = JobOutcome::failed(ErrorClass::ProvisionFailed, e.to_string())
                    .with_exit_code(exit_code);
            }
        }
        record
    }

    /// Lock, run, assert clean. The worktree stays locked for the whole run.
    async fn execute(&self, job: &Job, worktree: &Worktree, entry: &AllowlistEntry) -> RunRecord {
        let locked = match guard::lock(worktree).await {
            Ok(locked) => locked,
            Err(e) => return RunRecord::failed(ErrorClass::ProvisionFailed, e.to_string()),
        };
        let mut ctx = ExecContext::for_job(job);
        ctx.sha = worktree.sha().to_string();

        let exec = self.executor.run(&locked, entry, &ctx).await;
        let clean = guard::assert_clean(&locked).await;
        classify(entry, exec, clean)
    }

    /// Write the artifact set; returns the outcome with `artifact_dir` set.
    async fn record(&self, job: &Job, handle: ArtifactHandle, run: RunRecord) -> JobOutcome {
        let RunRecord { outcome, exec, dirty } = run;
        let finished_at_ms = self.clock.epoch_ms();
        let duration_ms = exec.as_ref().map(|r| r.duration.as_millis() as u64);
        let meta = ArtifactMeta::new(job, &outcome, duration_ms, finished_at_ms);

        let written = async {
            let (stdout, stderr) = match &exec {
                Some(r) => (r.stdout.as_slice(), r.stderr.as_slice()),
                None => (&[][..], &[][..]),
            };
            handle.write(STDOUT_LOG, stdout).await?;
            handle.write(STDERR_LOG, stderr).await?;
            if let Some(code) = outcome.exit_code {
                handle.write(EXIT_CODE, format!("{code}\n").as_bytes()).await?;
            }
            if let Some(summary) = &dirty {
                handle.write(DIRTY_TXT, format!("{summary}\n").as_bytes()).await?;
            }
            handle.write_json(META_JSON, &meta).await?;
            handle.finalize().await
        }
        .await;

        match written {
            Ok(dir) => outcome.with_artifact_dir(dir),
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to write artifacts");
                if outcome.error_class == Some(ErrorClass::DirtyWorktree) {
                    outcome
                } else {
                    JobOutcome::failed(ErrorClass::ProvisionFailed, e.to_string())
                        .with_exit_code(outcome.exit_code)
                }
            }
        }
    }

    async fn emit(&self, event: Event) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("event channel closed, dropping mirror event");
        }
    }
}

/// Combine the command's result with the clean-tree assertion.
///
/// A dirty tree always yields `error`/`DIRTY_WORKTREE`, whatever the
/// command did.
fn classify(entry: &AllowlistEntry, exec: Result<ExecResult, ExecError>, clean: CleanOutcome) -> RunRecord {
    let (outcome, exec) = match exec {
        Err(e) => (JobOutcome::failed(ErrorClass::ExecLaunchFailed, e.to_string()), None),
        Ok(result) if result.timed_out => {
            let diagnostic = format!("command exceeded its {}s timeout", entry.timeout.as_secs());
            let outcome =
                JobOutcome::failed(ErrorClass::Timeout, diagnostic).with_truncated(result.truncated());
            (outcome, Some(result))
        }
        Ok(result) => {
            let code = result.exit_code.unwrap_or(-1);
            (JobOutcome::completed(code, result.truncated()), Some(result))
        }
    };

    let mut record = RunRecord { outcome, exec, dirty: None };
    if let CleanOutcome::Dirty { summary } = clean {
        record.mark_dirty(summary);
    }
    record
}

#[async_trait]
impl<C: Clock> JobRunner for Pipeline<C> {
    async fn run(&self, job: &Job) -> JobOutcome {
        let handle = match self.artifacts.open(&job.id).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "cannot open artifact set");
                return JobOutcome::failed(ErrorClass::ProvisionFailed, e.to_string());
            }
        };

        let run = self.attempt(job).await;
        let outcome = self.record(job, handle, run).await;

        match (outcome.status, outcome.error_class) {
            (_, Some(ErrorClass::DirtyWorktree)) => tracing::error!(
                security_event = true,
                job_id = %job.id,
                job_type = %job.job_type,
                repo = %job.repo_name,
                sha = %job.sha,
                diagnostic = outcome.error.as_deref().unwrap_or_default(),
                "worktree mutated during execution"
            ),
            (JobStatus::Success, _) => {
                tracing::info!(job_id = %job.id, job_type = %job.job_type, "job succeeded")
            }
            (status, class) => tracing::warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                %status,
                error_class = ?class,
                exit_code = ?outcome.exit_code,
                "job did not succeed"
            ),
        }
        outcome
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
