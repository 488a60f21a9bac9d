// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pinrun allowlist check` specs

use crate::prelude::*;

#[test]
fn check_lists_job_types() {
    let temp = Project::empty();
    let path = temp.allowlist_path();
    cli()
        .args(&["allowlist", "check", path.to_str().unwrap()])
        .passes()
        .stdout_has("echo")
        .stdout_has("tamper")
        .stdout_has("/bin/sh");
}

#[test]
fn check_json_is_machine_readable() {
    let temp = Project::empty();
    let path = temp.allowlist_path();
    let run = cli().args(&["allowlist", "check", "--json", path.to_str().unwrap()]).passes();
    let entries = run.json();
    let names: Vec<&str> =
        entries.as_array().unwrap().iter().map(|e| e["job_type"].as_str().unwrap()).collect();
    assert!(names.contains(&"hang"));
}

#[test]
fn check_rejects_unknown_keys() {
    let temp = Project::empty();
    temp.allowlist(
        "[jobs.echo]\nargv = [\"/bin/echo\"]\ntimeout_s = 5\nmax_output_bytes = 10\nshell = true\n",
    );
    let path = temp.allowlist_path();
    cli().args(&["allowlist", "check", path.to_str().unwrap()]).exits_with(2);
}
