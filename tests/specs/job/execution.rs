// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution specs: terminal status and error class for each outcome.

use crate::prelude::*;

#[test]
fn clean_run_succeeds_with_captured_output() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let run = temp.submit("echo", &sha).args(&["--wait", "--json"]).passes();
    let job = run.json();
    assert_eq!(job["status"], "success");
    assert_eq!(job["exit_code"], 0);
    let id = job["id"].as_str().unwrap().to_string();

    temp.pinrun().args(&["logs", &id]).passes().stdout_has(&format!("hello from {sha}"));
    temp.pinrun().args(&["logs", &id, "--stream", "stderr"]).passes().stdout_has("to-stderr");

    let artifacts = std::path::PathBuf::from(job["artifact_dir"].as_str().unwrap());
    for file in ["stdout.log", "stderr.log", "exit_code", "meta.json"] {
        assert!(artifacts.join(file).exists(), "missing artifact {file}");
    }
}

#[test]
fn nonzero_exit_is_failure() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let run = temp.submit("fail", &sha).args(&["--wait", "--json"]).exits_with(1);
    let job = run.json();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["exit_code"], 3);
    assert!(job.get("error_class").is_none());
}

#[test]
fn worktree_mutation_is_dirty_worktree_error() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let run = temp.submit("tamper", &sha).args(&["--wait", "--json"]).exits_with(1);
    let job = run.json();
    assert_eq!(job["status"], "error", "a mutated tree must never be success");
    assert_eq!(job["error_class"], "DIRTY_WORKTREE");

    let artifacts = std::path::PathBuf::from(job["artifact_dir"].as_str().unwrap());
    let dirty = std::fs::read_to_string(artifacts.join("dirty.txt")).unwrap();
    assert!(dirty.contains("README.md"));
    assert!(temp.daemon_log().contains("security_event"));
}

#[test]
fn overrunning_command_times_out() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let run = temp.submit("hang", &sha).args(&["--wait", "--json"]).exits_with(1);
    let job = run.json();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["error_class"], "TIMEOUT");
}

#[test]
fn unknown_commit_is_ref_not_found() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let missing = "0".repeat(40);
    let run = temp.submit("echo", &missing).args(&["--wait", "--json"]).exits_with(1);
    let job = run.json();
    assert_eq!(job["status"], "failure");
    assert_eq!(job["error_class"], "REF_NOT_FOUND");
}

#[test]
fn new_upstream_commit_is_fetched() {
    let temp = Project::empty();
    let first = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();
    temp.submit("echo", &first).args(&["--wait"]).passes();

    let second = temp.commit("CHANGELOG.md", "v2\n");
    let run = temp.submit("echo", &second).args(&["--wait", "--json"]).passes();
    assert_eq!(run.json()["sha"], second.as_str());
}

#[test]
fn list_shows_newest_first() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let older = Project::submitted_id(&temp.submit("echo", &sha).args(&["--json"]).passes());
    let newer = Project::submitted_id(&temp.submit("fail", &sha).args(&["--json"]).passes());

    let jobs = temp.pinrun().args(&["list", "--json"]).passes().json();
    let ids: Vec<&str> = jobs.as_array().unwrap().iter().map(|j| j["id"].as_str().unwrap()).collect();
    assert_eq!(ids, [newer.as_str(), older.as_str()]);
}
