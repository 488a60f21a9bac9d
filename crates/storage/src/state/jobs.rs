// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job event handlers.

use pinrun_core::{Event, Job, JobStatus, Lease};

use super::MaterializedState;

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::JobSubmitted { id, request, submitted_at_ms } => {
            if state.jobs.contains_key(id.as_str()) {
                return;
            }
            let job = Job::queued(id.clone(), request.clone(), *submitted_at_ms);
            if let Some(key) = job.dedup_key() {
                state.idempotency.entry(key).or_insert_with(|| id.clone());
            }
            state.jobs.insert(id.to_string(), job);
        }

        Event::JobLeased { id, worker, started_at_ms, expires_at_ms } => {
            if let Some(job) = state.jobs.get_mut(id.as_str()) {
                if job.status != JobStatus::Queued {
                    return;
                }
                job.status = JobStatus::Running;
                job.attempts += 1;
                job.started_at_ms = Some(*started_at_ms);
                job.lease = Some(Lease { holder: worker.clone(), expires_at_ms: *expires_at_ms });
            }
        }

        Event::JobLeaseRenewed { id, worker, expires_at_ms } => {
            if let Some(job) = state.jobs.get_mut(id.as_str()) {
                if !job.leased_by(worker) {
                    return;
                }
                if let Some(lease) = job.lease.as_mut() {
                    lease.expires_at_ms = lease.expires_at_ms.max(*expires_at_ms);
                }
            }
        }

        Event::JobRequeued { id, .. } => {
            if let Some(job) = state.jobs.get_mut(id.as_str()) {
                if job.status != JobStatus::Running {
                    return;
                }
                job.status = JobStatus::Queued;
                job.lease = None;
                job.started_at_ms = None;
            }
        }

        Event::JobFinished { id, outcome, finished_at_ms } => {
            if let Some(job) = state.jobs.get_mut(id.as_str()) {
                if job.is_terminal() {
                    return;
                }
                job.status = outcome.status;
                job.error_class = outcome.error_class;
                job.error = outcome.error.clone();
                job.exit_code = outcome.exit_code;
                job.truncated = outcome.truncated;
                if outcome.artifact_dir.is_some() {
                    job.artifact_dir = outcome.artifact_dir.clone();
                }
                job.finished_at_ms = Some(*finished_at_ms);
                job.lease = None;
            }
        }

        Event::JobArtifacts { id, artifact_dir } => {
            if let Some(job) = state.jobs.get_mut(id.as_str()) {
                job.artifact_dir = Some(artifact_dir.clone());
            }
        }

        _ => {}
    }
}
