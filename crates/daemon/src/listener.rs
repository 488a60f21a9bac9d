// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for handling socket I/O.
//!
//! Accepts connections on the Unix socket and answers one request per
//! connection, without blocking the worker pool.

use std::sync::Arc;
use std::time::Duration;

use pinrun_core::{Clock, JobRequest};
use pinrun_wire::{self as wire, ErrorKind, JobDetail, JobSummary, Request, Response};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::env::PROTOCOL_VERSION;
use crate::service::JobService;

/// Shared daemon context for all request handlers.
pub struct ListenCtx<C: Clock> {
    pub service: Arc<JobService<C>>,
    pub shutdown: Arc<Notify>,
    pub ipc_timeout: Duration,
}

/// Listener task for accepting socket connections.
pub struct Listener<C: Clock> {
    unix: UnixListener,
    ctx: Arc<ListenCtx<C>>,
}

/// Errors from connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] wire::ProtocolError),
}

impl<C: Clock> Listener<C> {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx<C>>) -> Self {
        Self { unix, ctx }
    }

    /// Accept connections until `cancel` fires, spawning a task for each.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.unix.accept() => match result {
                    Ok((stream, _)) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            if let Err(e) = handle_connection(reader, writer, &ctx).await {
                                log_connection_error(e);
                            }
                        });
                    }
                    Err(e) => error!("Unix accept error: {}", e),
                },
            }
        }
        debug!("listener stopped");
    }
}

fn log_connection_error(e: ConnectionError) {
    match e {
        ConnectionError::Protocol(wire::ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected")
        }
        ConnectionError::Protocol(wire::ProtocolError::Timeout) => {
            warn!("Connection timeout")
        }
        _ => error!("Connection error: {}", e),
    }
}

/// Handle a single client connection.
///
/// Races the request handler against client disconnect detection, so a
/// client that gives up (e.g. CLI timeout) does not leave work behind.
async fn handle_connection<R, W, C>(
    mut reader: R,
    mut writer: W,
    ctx: &ListenCtx<C>,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    C: Clock,
{
    let request = wire::read_request(&mut reader, ctx.ipc_timeout).await?;

    // Queries are polled frequently; keep them out of the info log
    if request.is_query() {
        debug!(request = ?request, "received query");
    } else {
        info!(request = ?request, "received request");
    }

    let response = tokio::select! {
        response = handle_request(request, ctx) => response,
        _ = detect_client_disconnect(&mut reader) => {
            debug!("Client disconnected, dropping handler");
            return Ok(());
        }
    };

    debug!("Sending response: {:?}", response);
    wire::write_response(&mut writer, &response, ctx.ipc_timeout).await?;
    Ok(())
}

/// Resolves when the client closes its end (EOF) after sending its request.
async fn detect_client_disconnect<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 1];
    let _ = reader.read(&mut buf).await;
}

pub(crate) async fn handle_request<C: Clock>(request: Request, ctx: &ListenCtx<C>) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version } => {
            if version != PROTOCOL_VERSION {
                debug!(client = %version, daemon = PROTOCOL_VERSION, "version mismatch");
            }
            Response::Hello { version: PROTOCOL_VERSION.to_string() }
        }

        Request::Submit { job_type, repo_name, remote_url, sha, idempotency_key } => {
            let request = JobRequest { job_type, repo_name, remote_url, sha, idempotency_key };
            match ctx.service.submit(request) {
                Ok(sub) => Response::Submitted {
                    job_id: sub.job.id,
                    artifact_dir: sub.artifact_dir,
                    status: sub.job.status,
                    deduplicated: sub.deduplicated,
                },
                Err(crate::service::SubmitError::ShuttingDown) => Response::ShuttingDown,
                Err(e) => {
                    if e.kind() == ErrorKind::Internal {
                        error!(error = %e, "submission failed");
                    } else {
                        debug!(error = %e, "submission rejected");
                    }
                    Response::error(e.kind(), e.to_string())
                }
            }
        }

        Request::GetJob { id } => {
            let job = ctx.service.get(&id).map(|job| Box::new(JobDetail::from(&job)));
            Response::Job { job }
        }

        Request::ListJobs { limit } => {
            let jobs = ctx.service.list(limit).iter().map(JobSummary::from).collect();
            Response::Jobs { jobs }
        }

        Request::JobLogs { id, stream, tail } => match ctx.service.logs(&id, stream, tail).await {
            Ok(content) => Response::Logs { content },
            Err(e) => Response::error(e.kind(), e.to_string()),
        },

        Request::Health => {
            let health = ctx.service.health();
            Response::Health {
                ok: true,
                uptime_secs: health.uptime_secs,
                queued: health.queued,
                running: health.running,
                workers: health.workers,
            }
        }

        Request::Shutdown => {
            ctx.service.begin_shutdown();
            ctx.shutdown.notify_one();
            Response::ShuttingDown
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
