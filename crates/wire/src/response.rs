// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use pinrun_core::{JobId, JobStatus};
use serde::{Deserialize, Serialize};

use super::{JobDetail, JobSummary};

/// Category of a request-level failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed field or unknown job type; nothing was created
    Validation,
    NotFound,
    /// Queue at capacity; resubmit later
    QueueFull,
    Internal,
}

pinrun_core::simple_display! {
    ErrorKind {
        Validation => "validation",
        NotFound => "not_found",
        QueueFull => "queue_full",
        Internal => "internal",
    }
}

/// Response from daemon to CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Response {
    Pong,

    /// Version handshake response
    Hello { version: String },

    /// Daemon is shutting down
    ShuttingDown,

    /// Job accepted, or an existing job returned for a duplicate key
    Submitted {
        job_id: JobId,
        artifact_dir: PathBuf,
        status: JobStatus,
        #[serde(default)]
        deduplicated: bool,
    },

    /// Single job details
    Job { job: Option<Box<JobDetail>> },

    /// Recent jobs, newest first
    Jobs { jobs: Vec<JobSummary> },

    /// Log tail
    Logs { content: String },

    Health { ok: bool, uptime_secs: u64, queued: usize, running: usize, workers: usize },

    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into() }
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
