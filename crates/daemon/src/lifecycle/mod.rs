// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, recovery, shutdown.

mod startup;
pub use startup::{startup, StartupResult};

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pinrun_core::SystemClock;
use pinrun_engine::{AllowlistError, AllowlistRegistry, ArtifactStore, ExecIdentity, JobRunner};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env;
use crate::ledger::{JobLedger, LedgerError};
use crate::listener::{ListenCtx, Listener};
use crate::pool::{LeaseTable, PoolConfig, WorkerPool};
use crate::queue::JobQueue;
use crate::reaper::Reaper;
use crate::service::JobService;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 256;
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_IPC_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/pinrun)
    pub state_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Path to WAL file
    pub wal_path: PathBuf,
    /// Path to snapshot file
    pub snapshot_path: PathBuf,
    /// Bare mirrors, one per repository
    pub mirrors_path: PathBuf,
    /// Ephemeral per-job checkouts
    pub worktrees_path: PathBuf,
    /// Per-job artifact sets
    pub artifacts_path: PathBuf,
    /// Allowlist definition file (.toml or .hcl)
    pub allowlist_path: PathBuf,

    pub workers: usize,
    pub queue_depth: usize,
    pub lease_ttl: Duration,
    pub reaper_interval: Duration,
    pub max_attempts: u32,
    pub ipc_timeout: Duration,
    pub drain_timeout: Duration,
    pub exec_identity: ExecIdentity,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Uses fixed paths under `~/.local/state/pinrun/` (or
    /// `$XDG_STATE_HOME/pinrun/`, or `$PINRUN_STATE_DIR`).
    pub fn load() -> Result<Self, LifecycleError> {
        let mut config = Self::for_state_dir(env::state_dir()?);
        if let Some(path) = env::allowlist_path() {
            config.allowlist_path = path;
        }
        config.workers = env::workers().unwrap_or(config.workers);
        config.queue_depth = env::queue_depth().unwrap_or(config.queue_depth);
        config.lease_ttl = env::lease_ttl().unwrap_or(config.lease_ttl);
        config.reaper_interval = env::reaper_interval().unwrap_or(config.reaper_interval);
        config.max_attempts = env::max_attempts().unwrap_or(config.max_attempts);
        config.ipc_timeout = env::ipc_timeout().unwrap_or(config.ipc_timeout);
        config.drain_timeout = env::drain_timeout().unwrap_or(config.drain_timeout);
        config.exec_identity = env::exec_identity()?;
        Ok(config)
    }

    /// Default paths and tunables rooted at `state_dir`.
    pub fn for_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            socket_path: state_dir.join("daemon.sock"),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            wal_path: state_dir.join("wal").join("ledger.wal"),
            snapshot_path: state_dir.join("snapshot.json"),
            mirrors_path: state_dir.join("mirrors"),
            worktrees_path: state_dir.join("worktrees"),
            artifacts_path: state_dir.join("artifacts"),
            allowlist_path: state_dir.join("allowlist.toml"),
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            lease_ttl: DEFAULT_LEASE_TTL,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            ipc_timeout: DEFAULT_IPC_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            exec_identity: ExecIdentity::unprivileged_default(),
            state_dir,
        }
    }
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub ledger: Arc<JobLedger<SystemClock>>,
    pub queue: Arc<JobQueue>,
    pub service: Arc<JobService<SystemClock>>,
    pub allowlist: Arc<AllowlistRegistry>,
    pub artifacts: ArtifactStore,
    /// Notified by a `Shutdown` request
    pub shutdown: Arc<Notify>,
    leases: Arc<LeaseTable>,
    pool: Option<WorkerPool>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    /// Mirror-event forwarder; ends once the pipeline is dropped
    forwarder: Option<JoinHandle<()>>,
}

impl DaemonState {
    /// Start the worker pool, lease reaper and socket listener.
    pub fn spawn<R: JobRunner>(&mut self, listener: UnixListener, runner: Arc<R>) {
        let pool = WorkerPool::start(
            PoolConfig { workers: self.config.workers, lease_ttl: self.config.lease_ttl },
            Arc::clone(&self.ledger),
            Arc::clone(&self.queue),
            runner,
            Arc::clone(&self.leases),
        );
        self.pool = Some(pool);

        let reaper = Reaper::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.queue),
            self.artifacts.clone(),
            self.config.max_attempts,
        );
        self.tasks.push(tokio::spawn(reaper.run(self.config.reaper_interval, self.cancel.clone())));

        let ctx = Arc::new(ListenCtx {
            service: Arc::clone(&self.service),
            shutdown: Arc::clone(&self.shutdown),
            ipc_timeout: self.config.ipc_timeout,
        });
        self.tasks.push(tokio::spawn(Listener::new(listener, ctx).run(self.cancel.clone())));
    }

    /// Reload the allowlist from disk. On error the current table stays.
    pub fn reload_allowlist(&self) {
        match self.allowlist.reload() {
            Ok(count) => info!(job_types = count, "allowlist reloaded"),
            Err(e) => warn!(error = %e, "allowlist reload failed, keeping current table"),
        }
    }

    /// Shutdown the daemon gracefully.
    ///
    /// Stops accepting, drains in-flight jobs up to the drain timeout,
    /// writes a final snapshot and removes the socket, PID and version files.
    pub async fn shutdown(mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        // 1. Refuse new submissions and stop accepting connections
        self.service.begin_shutdown();
        self.cancel.cancel();

        // 2. Drain the pool
        if let Some(pool) = self.pool.take() {
            pool.shutdown(self.config.drain_timeout).await;
        }
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(forwarder) = self.forwarder.take() {
            if tokio::time::timeout(Duration::from_secs(1), forwarder).await.is_err() {
                warn!("mirror event forwarder did not finish");
            }
        }

        // 3. Save final snapshot so next startup doesn't need to replay WAL
        match self.ledger.checkpoint() {
            Ok(seq) => info!(seq, "saved final shutdown snapshot"),
            Err(e) => warn!("Failed to save shutdown snapshot: {}", e),
        }

        // 4. Remove socket, PID and version files
        for path in [&self.config.socket_path, &self.config.lock_path, &self.config.version_path] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }

        // 5. Lock file is released when self.lock_file is dropped
        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error(
        "Commands would run as the daemon's own user; set PINRUN_EXEC_UID/PINRUN_EXEC_GID to a \
         separate account (PINRUN_EXEC_SHARED_IDENTITY=1 allows it for development)"
    )]
    SharedExecIdentity,

    #[error("Allowlist error: {0}")]
    Allowlist(#[from] AllowlistError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
