// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess helpers with bounded run time

use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// Local git plumbing (config, rev-parse, for-each-ref, status).
pub const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Network fetch into a mirror.
pub const GIT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// `git worktree add/remove`; checkouts of large trees can take a while.
pub const GIT_WORKTREE_TIMEOUT: Duration = Duration::from_secs(120);

/// Run a command to completion, killing it if it exceeds `timeout`.
///
/// Errors are human-readable and name the operation via `description`.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, String> {
    cmd.kill_on_drop(true).stdin(std::process::Stdio::null());
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{description} failed to run: {e}")),
        Err(_) => Err(format!("{description} timed out after {}s", timeout.as_secs())),
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
