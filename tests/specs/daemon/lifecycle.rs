// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle specs
//!
//! Verify daemon start/stop/health and the files it leaves behind.

use crate::prelude::*;

#[test]
fn daemon_start_reports_success() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes().stdout_has("Daemon started");
    assert!(temp.state_dir().join("daemon.sock").exists());
    assert!(temp.state_dir().join("daemon.pid").exists());
}

#[test]
fn daemon_start_twice_is_a_no_op() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();
    temp.pinrun().args(&["daemon", "start"]).passes().stdout_has("already running");
}

#[test]
fn health_reports_workers() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let run = temp.pinrun().args(&["health", "--json"]).passes();
    let health = run.json();
    assert_eq!(health["ok"], true);
    assert_eq!(health["workers"], 2);
    assert_eq!(health["queued"], 0);
}

#[test]
fn daemon_stop_removes_runtime_files() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();
    temp.pinrun().args(&["daemon", "stop"]).passes().stdout_has("Daemon stopped");

    for file in ["daemon.sock", "daemon.pid", "daemon.version"] {
        assert!(!temp.state_dir().join(file).exists(), "{file} left behind");
    }
    assert!(temp.state_dir().join("snapshot.json").exists(), "final snapshot written");
}

#[test]
fn daemon_stop_when_not_running() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "stop"]).passes().stdout_has("Daemon not running");
}

#[test]
fn invalid_allowlist_prevents_startup() {
    let temp = Project::empty();
    temp.allowlist("[jobs.echo]\nargv = []\ntimeout_s = 5\nmax_output_bytes = 10\n");
    temp.pinrun().args(&["daemon", "start"]).exits_with(5).stderr_has("failed to start");
    assert!(!temp.state_dir().join("daemon.sock").exists());
}

#[test]
fn daemon_version_matches_cli() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();
    temp.pinrun().args(&["daemon", "version"]).passes().stdout_has(env!("CARGO_PKG_VERSION"));
}
