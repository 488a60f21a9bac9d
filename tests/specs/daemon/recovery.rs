// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash recovery specs
//!
//! Jobs survive a SIGKILL of the daemon: finished jobs keep their record,
//! jobs that were running are requeued and run again.

use crate::prelude::*;

#[test]
fn finished_jobs_survive_restart() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();
    let run = temp.submit("echo", &sha).args(&["--wait", "--json"]).passes();
    let id = run.json()["id"].as_str().unwrap().to_string();

    assert!(temp.daemon_kill(), "should be able to kill daemon");
    temp.pinrun().args(&["daemon", "start"]).passes();

    temp.pinrun().args(&["show", &id]).passes().stdout_has("success");
}

#[test]
fn running_job_is_requeued_after_crash() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();
    let run = temp.submit("slow", &sha).args(&["--json"]).passes();
    let id = Project::submitted_id(&run);

    let running = wait_for(SPEC_WAIT_MAX_MS, || {
        temp.pinrun().args(&["show", &id]).passes().stdout().contains("running")
    });
    assert!(running, "job should start running");

    assert!(temp.daemon_kill(), "should be able to kill daemon");
    temp.pinrun().args(&["daemon", "start"]).passes();

    let done = wait_for(SPEC_WAIT_MAX_MS, || {
        temp.pinrun().args(&["show", &id]).passes().stdout().contains("success")
    });
    if !done {
        eprintln!("=== DAEMON LOG ===\n{}\n=== END LOG ===", temp.daemon_log());
    }
    assert!(done, "requeued job should complete after restart");

    let detail = temp.pinrun().args(&["show", &id, "--json"]).passes().json();
    assert_eq!(detail["attempts"], 2);
    temp.pinrun().args(&["logs", &id]).passes().stdout_has("finished");
}

#[test]
fn idempotency_key_survives_restart() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();
    let first = temp.submit("echo", &sha).args(&["--key", "build-1", "--json"]).passes();
    let id = Project::submitted_id(&first);

    temp.pinrun().args(&["daemon", "stop"]).passes();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let again = temp.submit("echo", &sha).args(&["--key", "build-1", "--json"]).passes();
    assert_eq!(Project::submitted_id(&again), id);
    assert_eq!(again.json()["deduplicated"], true);
}
