// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use pinrun_core::LogStream;
use serde::{Deserialize, Serialize};

/// Request from CLI to daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Request {
    /// Liveness ping
    Ping,

    /// Version handshake
    Hello { version: String },

    /// Submit a job. The daemon validates every field.
    Submit {
        job_type: String,
        repo_name: String,
        remote_url: String,
        sha: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        idempotency_key: Option<String>,
    },

    /// Full job record by ID or unique ID prefix
    GetJob { id: String },

    /// Most recently submitted jobs, newest first
    ListJobs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Tail of a job's captured output
    JobLogs {
        id: String,
        #[serde(default = "default_stream")]
        stream: LogStream,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tail: Option<usize>,
    },

    /// Queue and worker counts; never touches the pipeline
    Health,

    /// Stop accepting work and drain
    Shutdown,
}

fn default_stream() -> LogStream {
    LogStream::Stdout
}

impl Request {
    /// Requests polled frequently enough to log at debug level.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Request::Ping
                | Request::Hello { .. }
                | Request::GetJob { .. }
                | Request::ListJobs { .. }
                | Request::JobLogs { .. }
                | Request::Health
        )
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
