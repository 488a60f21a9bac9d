// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

const VARS: &[&str] = &[
    "PINRUN_STATE_DIR",
    "PINRUN_ALLOWLIST",
    "PINRUN_WORKERS",
    "PINRUN_QUEUE_DEPTH",
    "PINRUN_LEASE_TTL_MS",
    "PINRUN_REAPER_INTERVAL_MS",
    "PINRUN_MAX_ATTEMPTS",
    "PINRUN_IPC_TIMEOUT_MS",
    "PINRUN_DRAIN_TIMEOUT_MS",
    "PINRUN_EXEC_UID",
    "PINRUN_EXEC_GID",
    "PINRUN_EXEC_SHARED_IDENTITY",
];

/// Clears every variable `Config::load` reads, restoring them on drop.
struct EnvGuard(Vec<(&'static str, Option<String>)>);

impl EnvGuard {
    fn clean() -> Self {
        let saved = VARS.iter().map(|name| (*name, std::env::var(name).ok())).collect();
        for name in VARS {
            std::env::remove_var(name);
        }
        Self(saved)
    }

    fn set(&self, name: &str, value: &str) {
        std::env::set_var(name, value);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, value) in &self.0 {
            match value {
                Some(v) => std::env::set_var(name, v),
                None => std::env::remove_var(name),
            }
        }
    }
}

#[test]
fn paths_derive_from_state_dir() {
    let config = Config::for_state_dir("/var/lib/pinrun");
    assert_eq!(config.socket_path, PathBuf::from("/var/lib/pinrun/daemon.sock"));
    assert_eq!(config.lock_path, PathBuf::from("/var/lib/pinrun/daemon.pid"));
    assert_eq!(config.wal_path, PathBuf::from("/var/lib/pinrun/wal/ledger.wal"));
    assert_eq!(config.snapshot_path, PathBuf::from("/var/lib/pinrun/snapshot.json"));
    assert_eq!(config.mirrors_path, PathBuf::from("/var/lib/pinrun/mirrors"));
    assert_eq!(config.worktrees_path, PathBuf::from("/var/lib/pinrun/worktrees"));
    assert_eq!(config.artifacts_path, PathBuf::from("/var/lib/pinrun/artifacts"));
    assert_eq!(config.allowlist_path, PathBuf::from("/var/lib/pinrun/allowlist.toml"));
}

#[test]
fn defaults() {
    let config = Config::for_state_dir("/s");
    assert_eq!(config.workers, 4);
    assert_eq!(config.queue_depth, 256);
    assert_eq!(config.lease_ttl, Duration::from_secs(60));
    assert_eq!(config.reaper_interval, Duration::from_secs(5));
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.drain_timeout, Duration::from_secs(30));
}

#[test]
#[serial]
fn load_reads_overrides() {
    let env = EnvGuard::clean();
    env.set("PINRUN_STATE_DIR", "/tmp/pinrun-test-state");
    env.set("PINRUN_ALLOWLIST", "/etc/pinrun/jobs.hcl");
    env.set("PINRUN_WORKERS", "8");
    env.set("PINRUN_QUEUE_DEPTH", "10");
    env.set("PINRUN_LEASE_TTL_MS", "9000");
    env.set("PINRUN_MAX_ATTEMPTS", "5");
    env.set("PINRUN_EXEC_UID", "1234");

    let config = Config::load().unwrap();
    assert_eq!(config.state_dir, PathBuf::from("/tmp/pinrun-test-state"));
    assert_eq!(config.allowlist_path, PathBuf::from("/etc/pinrun/jobs.hcl"));
    assert_eq!(config.workers, 8);
    assert_eq!(config.queue_depth, 10);
    assert_eq!(config.lease_ttl, Duration::from_millis(9000));
    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.exec_identity, ExecIdentity::User { uid: 1234, gid: 1234 });
}

#[test]
#[serial]
fn load_ignores_unparseable_tunables() {
    let env = EnvGuard::clean();
    env.set("PINRUN_STATE_DIR", "/tmp/pinrun-test-state");
    env.set("PINRUN_WORKERS", "many");
    env.set("PINRUN_QUEUE_DEPTH", "0");
    env.set("PINRUN_EXEC_SHARED_IDENTITY", "1");

    let config = Config::load().unwrap();
    assert_eq!(config.workers, DEFAULT_WORKERS);
    assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
}

#[test]
#[serial]
fn xdg_state_home_is_used_without_override() {
    let env = EnvGuard::clean();
    let saved = std::env::var("XDG_STATE_HOME").ok();
    env.set("XDG_STATE_HOME", "/tmp/xdg-state");
    env.set("PINRUN_EXEC_SHARED_IDENTITY", "1");

    let config = Config::load().unwrap();
    assert_eq!(config.state_dir, PathBuf::from("/tmp/xdg-state/pinrun"));

    match saved {
        Some(v) => std::env::set_var("XDG_STATE_HOME", v),
        None => std::env::remove_var("XDG_STATE_HOME"),
    }
}

#[test]
#[serial]
fn exec_identity_validation() {
    let env = EnvGuard::clean();
    env.set("PINRUN_STATE_DIR", "/tmp/pinrun-test-state");

    env.set("PINRUN_EXEC_UID", "4242");
    env.set("PINRUN_EXEC_GID", "4243");
    assert_eq!(Config::load().unwrap().exec_identity, ExecIdentity::User { uid: 4242, gid: 4243 });

    env.set("PINRUN_EXEC_UID", "nobody");
    assert!(matches!(Config::load(), Err(LifecycleError::InvalidEnv { .. })));

    std::env::remove_var("PINRUN_EXEC_UID");
    assert!(matches!(Config::load(), Err(LifecycleError::InvalidEnv { .. })));
}

#[test]
#[serial]
fn exec_identity_sharing_the_daemon_uid_needs_opt_in() {
    let env = EnvGuard::clean();
    env.set("PINRUN_STATE_DIR", "/tmp/pinrun-test-state");
    let euid = nix::unistd::geteuid().as_raw();

    env.set("PINRUN_EXEC_UID", &euid.to_string());
    assert!(matches!(Config::load(), Err(LifecycleError::SharedExecIdentity)));

    env.set("PINRUN_EXEC_SHARED_IDENTITY", "1");
    assert_eq!(Config::load().unwrap().exec_identity, ExecIdentity::User { uid: euid, gid: euid });
}

#[test]
#[serial]
fn unprivileged_default_is_refused_without_opt_in() {
    if nix::unistd::geteuid().is_root() {
        return;
    }
    let env = EnvGuard::clean();
    env.set("PINRUN_STATE_DIR", "/tmp/pinrun-test-state");
    assert!(matches!(Config::load(), Err(LifecycleError::SharedExecIdentity)));

    env.set("PINRUN_EXEC_SHARED_IDENTITY", "true");
    assert_eq!(Config::load().unwrap().exec_identity, ExecIdentity::Inherit);
}
