// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI help output specs

use crate::prelude::*;

#[test]
fn pinrun_no_args_shows_usage() {
    cli().exits_with(2).stderr_has("Usage:");
}

#[test]
fn pinrun_help_lists_commands() {
    cli()
        .args(&["--help"])
        .passes()
        .stdout_has("submit")
        .stdout_has("show")
        .stdout_has("list")
        .stdout_has("logs")
        .stdout_has("health");
}

#[test]
fn submit_help_documents_wait() {
    cli().args(&["submit", "--help"]).passes().stdout_has("--wait").stdout_has("--key");
}

#[test]
fn daemon_help_shows_subcommands() {
    cli().args(&["daemon", "--help"]).passes().stdout_has("start").stdout_has("stop");
}

#[test]
fn pinrun_version_shows_version() {
    cli().args(&["--version"]).passes().stdout_has(env!("CARGO_PKG_VERSION"));
}

#[test]
fn query_without_daemon_is_unavailable() {
    cli().args(&["health"]).exits_with(5).stderr_has("daemon not running");
}
