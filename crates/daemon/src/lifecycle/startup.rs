// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use fs2::FileExt;
use pinrun_core::{Event, SystemClock};
use pinrun_engine::{
    AllowlistRegistry, ArtifactStore, ExecIdentity, Executor, MirrorStore, Pipeline, PipelineDeps,
    WorktreeProvisioner,
};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env::PROTOCOL_VERSION;
use crate::ledger::JobLedger;
use crate::pool::LeaseTable;
use crate::queue::JobQueue;
use crate::reaper::{Reaper, RecoveryReport};
use crate::service::JobService;

use super::{Config, DaemonState, LifecycleError};

/// Buffered mirror events between the pipeline and the ledger
const MIRROR_EVENT_BUFFER: usize = 256;

/// Result of daemon startup: the daemon plus the pieces it runs with.
pub struct StartupResult {
    pub daemon: DaemonState,
    /// The bound Unix socket, to hand to [`DaemonState::spawn`]
    pub listener: UnixListener,
    /// The production job runner
    pub pipeline: Pipeline<SystemClock>,
    pub recovery: RecoveryReport,
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // Don't clean up if we failed to acquire the lock;
            // those files belong to the already-running daemon.
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create state directory (needed for socket, lock, etc.)
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST - prevents races.
    // Open without truncating so a running daemon's PID survives a failed attempt.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Create directories
    if let Some(parent) = config.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    for dir in [&config.mirrors_path, &config.worktrees_path, &config.artifacts_path] {
        std::fs::create_dir_all(dir)?;
    }
    if config.exec_identity.shares_daemon_uid() {
        warn!(
            identity = ?config.exec_identity,
            "commands share the daemon's uid; mirror config is checked after each run"
        );
    }
    if let ExecIdentity::User { .. } = config.exec_identity {
        // Commands run as another user must be able to traverse into their tree
        for dir in [&config.mirrors_path, &config.worktrees_path, &config.artifacts_path] {
            open_for_traversal(dir)?;
        }
    }
    std::fs::write(&config.version_path, PROTOCOL_VERSION)?;

    // 4. Allowlist: a bad file fails startup rather than running unconstrained
    let allowlist = Arc::new(AllowlistRegistry::load(&config.allowlist_path)?);
    info!(
        path = %config.allowlist_path.display(),
        job_types = allowlist.current().len(),
        "allowlist loaded"
    );

    // 5. Ledger: snapshot plus WAL replay
    let ledger = Arc::new(JobLedger::open(&config.wal_path, &config.snapshot_path, SystemClock)?);
    let queue = Arc::new(JobQueue::new(config.queue_depth));
    let artifacts = ArtifactStore::new(&config.artifacts_path);
    let worktrees = WorktreeProvisioner::new(&config.worktrees_path);

    // 6. Recover before any worker runs: every `running` job is ours from a dead process
    let recovery = Reaper::new(
        Arc::clone(&ledger),
        Arc::clone(&queue),
        artifacts.clone(),
        config.max_attempts,
    )
    .recover(&worktrees)
    .await;

    // 7. Pipeline, with its mirror events forwarded into the ledger
    let (event_tx, event_rx) = mpsc::channel::<Event>(MIRROR_EVENT_BUFFER);
    let forwarder = spawn_event_forwarder(event_rx, Arc::clone(&ledger));
    let pipeline = Pipeline::new(
        PipelineDeps {
            allowlist: Arc::clone(&allowlist),
            mirrors: Arc::new(MirrorStore::new(&config.mirrors_path)),
            worktrees,
            executor: Executor::new(config.exec_identity),
            artifacts: artifacts.clone(),
        },
        SystemClock,
        event_tx,
    );

    let service = Arc::new(JobService::new(
        Arc::clone(&ledger),
        Arc::clone(&queue),
        Arc::clone(&allowlist),
        artifacts.clone(),
        config.workers,
    ));

    // 8. Remove stale socket and bind (LAST - only after all validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    let (queued, running) = ledger.counts();
    info!(queued, running, "Daemon started");

    Ok(StartupResult {
        daemon: DaemonState {
            config: config.clone(),
            lock_file,
            ledger,
            queue,
            service,
            allowlist,
            artifacts,
            shutdown: Arc::new(Notify::new()),
            leases: Arc::new(LeaseTable::new()),
            pool: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            forwarder: Some(forwarder),
        },
        listener,
        pipeline,
        recovery,
    })
}

fn open_for_traversal(dir: &Path) -> std::io::Result<()> {
    let mut perms = std::fs::metadata(dir)?.permissions();
    perms.set_mode(perms.mode() | 0o055);
    std::fs::set_permissions(dir, perms)
}

/// Spawn task to forward pipeline mirror events into the ledger.
fn spawn_event_forwarder(
    mut rx: mpsc::Receiver<Event>,
    ledger: Arc<JobLedger<SystemClock>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = ledger.record(event) {
                tracing::warn!("Failed to record mirror event: {}", e);
            }
        }
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    // Remove socket if we created it
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }

    // Remove version file
    if config.version_path.exists() {
        let _ = std::fs::remove_file(&config.version_path);
    }

    // Remove PID/lock file
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
