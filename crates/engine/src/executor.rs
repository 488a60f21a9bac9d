// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor: runs one allowlisted command inside a locked worktree.
//!
//! The command line comes only from the [`AllowlistEntry`]. The child gets a
//! cleared environment, `/dev/null` stdin, its own process group and
//! (optionally) an unprivileged uid/gid. Output is captured up to the entry's
//! cap per stream; the readers keep draining past the cap so the child never
//! blocks on a full pipe.

use crate::allowlist::AllowlistEntry;
use crate::guard::LockedWorktree;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use pinrun_core::{Job, JobId};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// `PATH` seen by every command.
pub const EXEC_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// uid/gid of `nobody` on most distributions.
pub const NOBODY_ID: u32 = 65534;

const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for pipes to close once the process group is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8192;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("executor io error: {0}")]
    Io(#[from] io::Error),
}

/// Identity the command runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecIdentity {
    /// Same uid/gid as the daemon
    Inherit,
    User { uid: u32, gid: u32 },
}

impl ExecIdentity {
    /// `nobody` when the daemon is root, otherwise the daemon's own identity.
    pub fn unprivileged_default() -> Self {
        if nix::unistd::geteuid().is_root() {
            ExecIdentity::User { uid: NOBODY_ID, gid: NOBODY_ID }
        } else {
            ExecIdentity::Inherit
        }
    }

    /// Whether commands would run with the daemon's own uid, and so could
    /// write to mirrors, admin dirs and state the daemon owns.
    pub fn shares_daemon_uid(&self) -> bool {
        match self {
            ExecIdentity::Inherit => true,
            ExecIdentity::User { uid, .. } => *uid == nix::unistd::geteuid().as_raw(),
        }
    }
}

/// Server-validated job fields exported to the command's environment.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub job_id: JobId,
    pub job_type: String,
    pub repo_name: String,
    pub sha: String,
}

impl ExecContext {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            repo_name: job.repo_name.clone(),
            sha: job.sha.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code, or 128 + signal number; `None` when the command timed out
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    identity: ExecIdentity,
    kill_grace: Duration,
}

impl Executor {
    pub fn new(identity: ExecIdentity) -> Self {
        Self { identity, kill_grace: DEFAULT_KILL_GRACE }
    }

    /// Time between `SIGTERM` and `SIGKILL` on timeout.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn identity(&self) -> ExecIdentity {
        self.identity
    }

    pub async fn run(
        &self,
        tree: &LockedWorktree<'_>,
        entry: &AllowlistEntry,
        ctx: &ExecContext,
    ) -> Result<ExecResult, ExecError> {
        let line = entry.command_line();
        let Some((program, args)) = line.split_first() else {
            return Err(launch_error(&entry.job_type, io::ErrorKind::InvalidInput.into()));
        };
        // prlimit would report a missing target as its own exit 1; check both
        let resolved = resolve_program(program)?;
        if entry.limits.is_some() {
            if let Some(target) = entry.argv.first() {
                resolve_program(target)?;
            }
        }

        let mut cmd = Command::new(&resolved);
        cmd.arg0(program)
            .args(args)
            .current_dir(tree.path())
            .env_clear()
            .env("PATH", EXEC_PATH)
            .env("HOME", tree.path())
            .env("LANG", "C.UTF-8")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .envs(&entry.env)
            .env("PINRUN_JOB_ID", ctx.job_id.as_str())
            .env("PINRUN_JOB_TYPE", &ctx.job_type)
            .env("PINRUN_REPO", &ctx.repo_name)
            .env("PINRUN_SHA", &ctx.sha)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let ExecIdentity::User { uid, gid } = self.identity {
            cmd.uid(uid).gid(gid);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| launch_error(program, source))?;
        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
        tracing::debug!(job_id = %ctx.job_id, job_type = %entry.job_type, pid = ?pgid, "command started");

        let cap = usize::try_from(entry.max_output_bytes).unwrap_or(usize::MAX);
        let stdout = Arc::new(Mutex::new(Capture::default()));
        let stderr = Arc::new(Mutex::new(Capture::default()));
        let readers = [
            child.stdout.take().map(|r| tokio::spawn(pump(r, cap, Arc::clone(&stdout)))),
            child.stderr.take().map(|r| tokio::spawn(pump(r, cap, Arc::clone(&stderr)))),
        ];

        let waited = tokio::time::timeout(entry.timeout, child.wait()).await;
        let (status, timed_out) = match waited {
            Ok(status) => (status?, false),
            Err(_) => {
                tracing::info!(
                    job_id = %ctx.job_id,
                    timeout_s = entry.timeout.as_secs(),
                    "command timed out, terminating process group"
                );
                (self.terminate(&mut child, pgid).await?, true)
            }
        };
        // Stragglers that outlived the leader
        if let Some(pgid) = pgid {
            let _ = killpg(pgid, Signal::SIGKILL);
        }
        let duration = started.elapsed();

        for reader in readers.into_iter().flatten() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                tracing::warn!(job_id = %ctx.job_id, "output pipe still open after exit, abandoning reader");
                abort.abort();
            }
        }

        let signal = status.signal();
        let exit_code = if timed_out { None } else { exit_code(status) };
        let stdout = std::mem::take(&mut *stdout.lock());
        let stderr = std::mem::take(&mut *stderr.lock());
        tracing::debug!(
            job_id = %ctx.job_id,
            exit_code = ?exit_code,
            elapsed_ms = duration.as_millis() as u64,
            timed_out,
            "command finished"
        );

        Ok(ExecResult {
            exit_code,
            signal,
            stdout: stdout.bytes,
            stderr: stderr.bytes,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            duration,
            timed_out,
        })
    }

    /// `SIGTERM` the group, then `SIGKILL` after the grace period.
    async fn terminate(&self, child: &mut Child, pgid: Option<Pid>) -> io::Result<ExitStatus> {
        if let Some(pgid) = pgid {
            let _ = killpg(pgid, Signal::SIGTERM);
        }
        if let Ok(status) = tokio::time::timeout(self.kill_grace, child.wait()).await {
            return status;
        }
        if let Some(pgid) = pgid {
            let _ = killpg(pgid, Signal::SIGKILL);
        }
        child.kill().await?;
        child.wait().await
    }
}

fn launch_error(program: &str, source: io::Error) -> ExecError {
    ExecError::Launch { program: program.to_string(), source }
}

fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

/// Locate `program` the way the child would: absolute/relative paths as
/// given, bare names through [`EXEC_PATH`]. Must be an executable file.
pub fn resolve_program(program: &str) -> Result<PathBuf, ExecError> {
    let not_found = || launch_error(program, io::Error::from(io::ErrorKind::NotFound));
    if program.contains('/') {
        let path = Path::new(program);
        return match std::fs::metadata(path) {
            Ok(meta) if is_executable(&meta) => Ok(path.to_path_buf()),
            Ok(_) => Err(launch_error(program, io::Error::from(io::ErrorKind::PermissionDenied))),
            Err(source) => Err(launch_error(program, source)),
        };
    }
    EXEC_PATH
        .split(':')
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| std::fs::metadata(candidate).is_ok_and(|m| is_executable(&m)))
        .ok_or_else(not_found)
}

fn is_executable(meta: &std::fs::Metadata) -> bool {
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Read to EOF, keeping at most `cap` bytes.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, cap: usize, sink: Arc<Mutex<Capture>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let mut capture = sink.lock();
        let room = cap.saturating_sub(capture.bytes.len());
        if n > room {
            capture.truncated = true;
        }
        let keep = n.min(room);
        capture.bytes.extend_from_slice(&buf[..keep]);
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
