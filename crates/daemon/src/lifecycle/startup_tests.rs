// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use fs2::FileExt;
use pinrun_core::test_support::job_request;
use pinrun_core::{JobStatus, WorkerId};
use pinrun_storage::Snapshot;
use pinrun_wire::{self as wire, Request, Response};
use tempfile::{tempdir, TempDir};
use tokio::net::UnixStream;

use super::*;
use crate::ledger::Transition;
use crate::test_helpers::{wait_for, FakeRunner, TEST_ALLOWLIST};

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::for_state_dir(dir.path());
    config.workers = 1;
    config.drain_timeout = Duration::from_secs(2);
    config.reaper_interval = Duration::from_millis(50);
    config.exec_identity = ExecIdentity::Inherit;
    std::fs::write(&config.allowlist_path, TEST_ALLOWLIST).unwrap();
    config
}

async fn call(config: &Config, request: Request) -> Response {
    let mut stream = UnixStream::connect(&config.socket_path).await.unwrap();
    wire::write_request(&mut stream, &request, config.ipc_timeout).await.unwrap();
    wire::read_response(&mut stream, config.ipc_timeout).await.unwrap()
}

#[tokio::test]
async fn startup_lock_failed_does_not_remove_existing_files() {
    // Simulate a running daemon by holding the lock and creating its files.
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    std::fs::write(&config.socket_path, b"").unwrap();
    std::fs::write(&config.version_path, b"0.1.0").unwrap();
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)
        .unwrap();
    lock_file.lock_exclusive().unwrap();
    std::fs::write(&config.lock_path, b"12345").unwrap();

    match startup(&config).await {
        Err(LifecycleError::LockFailed(_)) => {}
        Err(e) => panic!("expected LockFailed, got: {e}"),
        Ok(_) => panic!("expected LockFailed, but startup succeeded"),
    }

    assert!(config.socket_path.exists(), "socket file must not be deleted on LockFailed");
    assert!(config.version_path.exists(), "version file must not be deleted on LockFailed");
    assert_eq!(std::fs::read_to_string(&config.lock_path).unwrap(), "12345");
}

#[tokio::test]
async fn invalid_allowlist_fails_startup_and_cleans_up() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::write(&config.allowlist_path, "[jobs.broken]\nargv = []\n").unwrap();

    let result = startup(&config).await;
    assert!(matches!(result, Err(LifecycleError::Allowlist(_))));
    assert!(!config.lock_path.exists());
    assert!(!config.version_path.exists());
    assert!(!config.socket_path.exists());
}

#[tokio::test]
async fn missing_allowlist_fails_startup() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    std::fs::remove_file(&config.allowlist_path).unwrap();

    assert!(matches!(startup(&config).await, Err(LifecycleError::Allowlist(_))));
}

#[tokio::test]
async fn startup_writes_pid_and_version() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let started = startup(&config).await.unwrap();

    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());
    assert_eq!(std::fs::read_to_string(&config.version_path).unwrap(), PROTOCOL_VERSION);
    assert!(config.socket_path.exists());

    started.daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn submitted_job_runs_and_shutdown_persists_it() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let StartupResult { mut daemon, listener, .. } = startup(&config).await.unwrap();
    daemon.spawn(listener, Arc::new(FakeRunner::succeeding()));

    let Response::Submitted { job_id, .. } = call(
        &config,
        Request::Submit {
            job_type: "local_echo".into(),
            repo_name: "demo".into(),
            remote_url: "file:///tmp/demo.git".into(),
            sha: pinrun_core::test_support::TEST_SHA.into(),
            idempotency_key: None,
        },
    )
    .await
    else {
        panic!("expected Submitted");
    };

    let ledger = Arc::clone(&daemon.ledger);
    let done = wait_for(Duration::from_secs(5), || {
        ledger.get(job_id.as_str()).is_some_and(|j| j.status == JobStatus::Success)
    })
    .await;
    assert!(done);

    daemon.shutdown().await.unwrap();
    assert!(!config.socket_path.exists());
    assert!(!config.lock_path.exists());
    assert!(!config.version_path.exists());

    let snapshot = Snapshot::load(&config.snapshot_path).unwrap().unwrap();
    assert_eq!(snapshot.state.jobs[job_id.as_str()].status, JobStatus::Success);
}

#[tokio::test]
async fn shutdown_request_notifies_daemon() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);
    let StartupResult { mut daemon, listener, .. } = startup(&config).await.unwrap();
    daemon.spawn(listener, Arc::new(FakeRunner::succeeding()));
    let shutdown = Arc::clone(&daemon.shutdown);
    let notified = shutdown.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();

    assert_eq!(call(&config, Request::Shutdown).await, Response::ShuttingDown);
    tokio::time::timeout(Duration::from_secs(2), notified).await.unwrap();
    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_recovers_jobs_left_running() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    // A previous daemon claimed a job and died without finishing it
    let orphaned = {
        std::fs::create_dir_all(config.wal_path.parent().unwrap()).unwrap();
        let ledger = JobLedger::open(&config.wal_path, &config.snapshot_path, SystemClock).unwrap();
        let job = ledger.insert(job_request(None)).unwrap().job;
        ledger
            .transition(
                &job.id,
                Transition::Claim {
                    worker: WorkerId::new(),
                    lease_ttl: Duration::from_secs(3600),
                },
            )
            .unwrap();
        job.id
    };
    let leftover = config.worktrees_path.join(orphaned.as_str());
    std::fs::create_dir_all(&leftover).unwrap();

    let started = startup(&config).await.unwrap();
    assert_eq!(started.recovery.reclaimed.requeued, vec![orphaned.clone()]);
    assert_eq!(started.recovery.worktrees_removed, 1);
    assert!(!leftover.exists());

    let StartupResult { mut daemon, listener, .. } = started;
    daemon.spawn(listener, Arc::new(FakeRunner::succeeding()));
    let ledger = Arc::clone(&daemon.ledger);
    let done = wait_for(Duration::from_secs(5), || {
        ledger.get(orphaned.as_str()).is_some_and(|j| j.status == JobStatus::Success)
    })
    .await;
    assert!(done);
    assert_eq!(ledger.get(orphaned.as_str()).unwrap().attempts, 2);
    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir);

    let first = startup(&config).await.unwrap();
    let id = first.daemon.service.submit(job_request(Some("k"))).unwrap().job.id;
    first.daemon.shutdown().await.unwrap();

    let second = startup(&config).await.unwrap();
    let again = second.daemon.service.submit(job_request(Some("k"))).unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.job.id, id);
    assert_eq!(second.daemon.queue.len(), 1, "queued job restored to the queue");
    second.daemon.shutdown().await.unwrap();
}
