// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submission specs: validation happens before a job exists.

use crate::prelude::*;

#[test]
fn unknown_job_type_is_rejected() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    temp.submit("rm_rf", &sha).exits_with(2).stderr_has("rm_rf");
    temp.pinrun().args(&["list"]).passes().stdout_has("No jobs");
}

#[test]
fn malformed_sha_is_rejected() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();

    temp.submit("echo", "HEAD").exits_with(2);
    temp.submit("echo", "abc123").exits_with(2);
    temp.pinrun().args(&["list"]).passes().stdout_has("No jobs");
}

#[test]
fn resubmission_with_key_returns_same_job() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let first = temp.submit("echo", &sha).args(&["--key", "k1", "--json"]).passes();
    let second = temp.submit("echo", &sha).args(&["--key", "k1", "--json"]).passes();
    assert_eq!(Project::submitted_id(&first), Project::submitted_id(&second));
    assert_eq!(second.json()["deduplicated"], true);

    let third = temp.submit("echo", &sha).args(&["--key", "k2", "--json"]).passes();
    assert_ne!(Project::submitted_id(&first), Project::submitted_id(&third));
}

#[test]
fn submit_reports_artifact_dir_keyed_by_job() {
    let temp = Project::empty();
    let sha = temp.head();
    temp.pinrun().args(&["daemon", "start"]).passes();

    let run = temp.submit("echo", &sha).args(&["--json"]).passes();
    let id = Project::submitted_id(&run);
    let dir = run.json()["artifact_dir"].as_str().unwrap().to_string();
    assert!(dir.ends_with(&id), "{dir} should end with {id}");
    assert!(dir.starts_with(temp.state_dir().to_str().unwrap()));
}

#[test]
fn show_unknown_job_is_not_found() {
    let temp = Project::empty();
    temp.pinrun().args(&["daemon", "start"]).passes();
    temp.pinrun().args(&["show", "job-doesnotexist"]).exits_with(3);
    temp.pinrun().args(&["logs", "job-doesnotexist"]).exits_with(3);
}
