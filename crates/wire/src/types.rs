// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use pinrun_core::{ErrorClass, Job, JobId, JobStatus};
use serde::{Deserialize, Serialize};

/// Row of a job listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub job_type: String,
    pub repo_name: String,
    pub sha: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub submitted_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            repo_name: job.repo_name.clone(),
            sha: job.sha.clone(),
            status: job.status,
            error_class: job.error_class,
            exit_code: job.exit_code,
            submitted_at_ms: job.submitted_at_ms,
            finished_at_ms: job.finished_at_ms,
        }
    }
}

/// Full job record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDetail {
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
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    #[serde(default)]
    pub attempts: u32,
    /// Worker holding the lease while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl From<&Job> for JobDetail {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            repo_name: job.repo_name.clone(),
            remote_url: job.remote_url.clone(),
            sha: job.sha.clone(),
            idempotency_key: job.idempotency_key.clone(),
            status: job.status,
            error_class: job.error_class,
            error: job.error.clone(),
            exit_code: job.exit_code,
            truncated: job.truncated,
            submitted_at_ms: job.submitted_at_ms,
            started_at_ms: job.started_at_ms,
            finished_at_ms: job.finished_at_ms,
            duration_ms: job.duration_ms(),
            artifact_dir: job.artifact_dir.clone(),
            attempts: job.attempts,
            worker: job.lease.as_ref().map(|lease| lease.holder.to_string()),
        }
    }
}

impl JobDetail {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
