// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized ledger state from WAL replay

mod jobs;
mod mirrors;

use pinrun_core::{Event, Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Durable facts about a bare mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub remote_url: String,
    pub path: PathBuf,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetch_at_ms: Option<u64>,
}

/// Materialized state built from WAL operations
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub jobs: HashMap<String, Job>,
    /// Unique index: `(job_type, repo_name, idempotency_key)` → job.
    #[serde(default)]
    pub idempotency: HashMap<String, JobId>,
    /// Mirror registry keyed by repo name
    #[serde(default)]
    pub mirrors: HashMap<String, MirrorRecord>,
}

impl MaterializedState {
    /// Get a job by ID or unique prefix (like git commit hashes)
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        if let Some(job) = self.jobs.get(id) {
            return Some(job);
        }
        let mut matches = self.jobs.iter().filter(|(k, _)| k.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some((_, job)), None) if !id.is_empty() => Some(job),
            _ => None,
        }
    }

    /// Existing job for a dedup key, if any.
    pub fn find_by_dedup_key(&self, key: &str) -> Option<&Job> {
        self.idempotency.get(key).and_then(|id| self.jobs.get(id.as_str()))
    }

    /// Newest first by submission time, at most `limit` jobs.
    pub fn list_recent(&self, limit: usize) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by(|a, b| {
            b.submitted_at_ms.cmp(&a.submitted_at_ms).then_with(|| b.id.cmp(&a.id))
        });
        jobs.truncate(limit);
        jobs
    }

    /// Jobs in `status`, oldest submission first.
    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().filter(|j| j.status == status).collect();
        jobs.sort_by(|a, b| {
            a.submitted_at_ms.cmp(&b.submitted_at_ms).then_with(|| a.id.cmp(&b.id))
        });
        jobs
    }

    /// Running jobs whose lease has expired at `now_ms`.
    pub fn expired_leases(&self, now_ms: u64) -> Vec<&Job> {
        self.jobs_with_status(JobStatus::Running)
            .into_iter()
            .filter(|j| j.lease_expired(now_ms))
            .collect()
    }

    pub fn count_status(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status == status).count()
    }

    /// Recompute derived indexes from `jobs` (after loading a snapshot).
    pub fn rebuild_indexes(&mut self) {
        self.idempotency.clear();
        for job in self.jobs.values() {
            if let Some(key) = job.dedup_key() {
                self.idempotency.entry(key).or_insert_with(|| job.id.clone());
            }
        }
    }

    /// Apply an event to derive state changes.
    ///
    /// **All event handlers MUST be idempotent.** Applying the same event
    /// twice must produce the same state as applying it once:
    /// - guard inserts with existence checks
    /// - guard increments with status checks (only count on a transition)
    /// - terminal jobs only accept the artifact pointer backfill
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::JobSubmitted { .. }
            | Event::JobLeased { .. }
            | Event::JobLeaseRenewed { .. }
            | Event::JobRequeued { .. }
            | Event::JobFinished { .. }
            | Event::JobArtifacts { .. } => jobs::apply(self, event),

            Event::MirrorCreated { .. } | Event::MirrorFetched { .. } => {
                mirrors::apply(self, event)
            }
        }
    }
}

#[cfg(test)]
#[path = "../state_tests/mod.rs"]
mod tests;
