// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client: one connection per request over the Unix socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pinrun_core::LogStream;
use pinrun_wire::{self as wire, ErrorKind, JobDetail, JobSummary, ProtocolError, Request, Response};
use thiserror::Error;
use tokio::net::UnixStream;

use crate::exit_error::{ExitError, EXIT_FAILURE, EXIT_UNAVAILABLE};

/// Per-request IPC timeout unless `PINRUN_IPC_TIMEOUT_MS` says otherwise
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running (no socket at {})", .0.display())]
    DaemonNotRunning(PathBuf),

    #[error("cannot resolve state directory: {0}")]
    NoStateDir(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("daemon is shutting down")]
    ShuttingDown,

    #[error("unexpected response from daemon: {0}")]
    Unexpected(String),
}

impl ClientError {
    pub fn is_not_running(&self) -> bool {
        matches!(self, ClientError::DaemonNotRunning(_))
    }
}

impl From<ClientError> for ExitError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Rejected { kind, message } => ExitError::from_kind(kind, message),
            ClientError::DaemonNotRunning(_) | ClientError::ShuttingDown => {
                ExitError::new(EXIT_UNAVAILABLE, e.to_string())
            }
            other => ExitError::new(EXIT_FAILURE, other.to_string()),
        }
    }
}

/// Fields of a submission.
#[derive(Debug, Clone)]
pub struct SubmitArgs {
    pub job_type: String,
    pub repo_name: String,
    pub remote_url: String,
    pub sha: String,
    pub idempotency_key: Option<String>,
}

/// Accepted submission as reported by the daemon.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Submitted {
    pub job_id: String,
    pub artifact_dir: PathBuf,
    pub status: pinrun_core::JobStatus,
    pub deduplicated: bool,
}

/// Daemon health as reported by the daemon.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Health {
    pub ok: bool,
    pub uptime_secs: u64,
    pub queued: usize,
    pub running: usize,
    pub workers: usize,
}

pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DaemonClient {
    /// Client for the daemon of the current state directory.
    pub fn connect() -> Result<Self, ClientError> {
        let state_dir =
            pinrun_daemon::env::state_dir().map_err(|e| ClientError::NoStateDir(e.to_string()))?;
        let timeout = pinrun_daemon::env::ipc_timeout().unwrap_or(DEFAULT_TIMEOUT);
        let client = Self::with_socket(state_dir.join("daemon.sock"), timeout);
        if !client.socket_path.exists() {
            return Err(ClientError::DaemonNotRunning(client.socket_path));
        }
        Ok(client)
    }

    pub fn with_socket(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { socket_path: socket_path.into(), timeout }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and read its response.
    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                return Err(ClientError::DaemonNotRunning(self.socket_path.clone()))
            }
            Err(e) => return Err(ProtocolError::Io(e).into()),
        };
        wire::write_request(&mut stream, request, self.timeout).await?;
        Ok(wire::read_response(&mut stream, self.timeout).await?)
    }

    /// Map responses a command did not expect to an error.
    fn reject<T>(response: Response) -> Result<T, ClientError> {
        match response {
            Response::Error { kind, message } => Err(ClientError::Rejected { kind, message }),
            Response::ShuttingDown => Err(ClientError::ShuttingDown),
            other => Err(ClientError::Unexpected(format!("{other:?}"))),
        }
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        match self.send(&Request::Ping).await? {
            Response::Pong => Ok(()),
            other => Self::reject(other),
        }
    }

    /// Daemon version via the Hello handshake
    pub async fn hello(&self) -> Result<String, ClientError> {
        let request = Request::Hello { version: env!("CARGO_PKG_VERSION").to_string() };
        match self.send(&request).await? {
            Response::Hello { version } => Ok(version),
            other => Self::reject(other),
        }
    }

    pub async fn submit(&self, args: SubmitArgs) -> Result<Submitted, ClientError> {
        let request = Request::Submit {
            job_type: args.job_type,
            repo_name: args.repo_name,
            remote_url: args.remote_url,
            sha: args.sha,
            idempotency_key: args.idempotency_key,
        };
        match self.send(&request).await? {
            Response::Submitted { job_id, artifact_dir, status, deduplicated } => {
                Ok(Submitted { job_id: job_id.to_string(), artifact_dir, status, deduplicated })
            }
            other => Self::reject(other),
        }
    }

    /// Job by id or unique prefix
    pub async fn get_job(&self, id: &str) -> Result<Option<JobDetail>, ClientError> {
        match self.send(&Request::GetJob { id: id.to_string() }).await? {
            Response::Job { job } => Ok(job.map(|b| *b)),
            other => Self::reject(other),
        }
    }

    pub async fn list_jobs(&self, limit: Option<usize>) -> Result<Vec<JobSummary>, ClientError> {
        match self.send(&Request::ListJobs { limit }).await? {
            Response::Jobs { jobs } => Ok(jobs),
            other => Self::reject(other),
        }
    }

    pub async fn job_logs(
        &self,
        id: &str,
        stream: LogStream,
        tail: Option<usize>,
    ) -> Result<String, ClientError> {
        match self.send(&Request::JobLogs { id: id.to_string(), stream, tail }).await? {
            Response::Logs { content } => Ok(content),
            other => Self::reject(other),
        }
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        match self.send(&Request::Health).await? {
            Response::Health { ok, uptime_secs, queued, running, workers } => {
                Ok(Health { ok, uptime_secs, queued, running, workers })
            }
            other => Self::reject(other),
        }
    }

    /// Ask the daemon to drain and exit.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(&Request::Shutdown).await? {
            Response::ShuttingDown => Ok(()),
            other => Self::reject(other),
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
