// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ledger events.
//!
//! Every durable state change is one of these, appended to the WAL before
//! it becomes visible. Serializes as `{"type": "scope:name", ...fields}`.

use crate::job::{JobId, JobOutcome, JobRequest, WorkerId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "job:submitted")]
    JobSubmitted { id: JobId, request: JobRequest, submitted_at_ms: u64 },

    /// A worker claimed a queued job
    #[serde(rename = "job:leased")]
    JobLeased { id: JobId, worker: WorkerId, started_at_ms: u64, expires_at_ms: u64 },

    #[serde(rename = "job:lease_renewed")]
    JobLeaseRenewed { id: JobId, worker: WorkerId, expires_at_ms: u64 },

    /// A running job went back to the queue (lease expiry or startup recovery)
    #[serde(rename = "job:requeued")]
    JobRequeued { id: JobId, reason: String },

    #[serde(rename = "job:finished")]
    JobFinished { id: JobId, outcome: JobOutcome, finished_at_ms: u64 },

    /// Artifact pointer backfill, the only change allowed on a terminal job
    #[serde(rename = "job:artifacts")]
    JobArtifacts { id: JobId, artifact_dir: PathBuf },

    #[serde(rename = "mirror:created")]
    MirrorCreated { repo_name: String, remote_url: String, path: PathBuf, created_at_ms: u64 },

    #[serde(rename = "mirror:fetched")]
    MirrorFetched { repo_name: String, fetched_at_ms: u64 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::JobSubmitted { .. } => "job:submitted",
            Event::JobLeased { .. } => "job:leased",
            Event::JobLeaseRenewed { .. } => "job:lease_renewed",
            Event::JobRequeued { .. } => "job:requeued",
            Event::JobFinished { .. } => "job:finished",
            Event::JobArtifacts { .. } => "job:artifacts",
            Event::MirrorCreated { .. } => "mirror:created",
            Event::MirrorFetched { .. } => "mirror:fetched",
        }
    }

    /// The job this event touches, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Event::JobSubmitted { id, .. }
            | Event::JobLeased { id, .. }
            | Event::JobLeaseRenewed { id, .. }
            | Event::JobRequeued { id, .. }
            | Event::JobFinished { id, .. }
            | Event::JobArtifacts { id, .. } => Some(id),
            Event::MirrorCreated { .. } | Event::MirrorFetched { .. } => None,
        }
    }

    /// One-line summary for debug logging.
    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::JobSubmitted { id, request, .. } => {
                format!("{t} id={id} type={} repo={}", request.job_type, request.repo_name)
            }
            Event::JobLeased { id, worker, .. } => format!("{t} id={id} worker={worker}"),
            Event::JobLeaseRenewed { id, expires_at_ms, .. } => {
                format!("{t} id={id} expires_at_ms={expires_at_ms}")
            }
            Event::JobRequeued { id, reason } => format!("{t} id={id} reason={reason}"),
            Event::JobFinished { id, outcome, .. } => match outcome.error_class {
                Some(class) => format!("{t} id={id} status={} class={class}", outcome.status),
                None => format!("{t} id={id} status={}", outcome.status),
            },
            Event::JobArtifacts { id, .. } => format!("{t} id={id}"),
            Event::MirrorCreated { repo_name, .. } | Event::MirrorFetched { repo_name, .. } => {
                format!("{t} repo={repo_name}")
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
