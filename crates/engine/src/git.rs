// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sanitized git invocations.
//!
//! Every git process the engine starts goes through [`git_command`], which
//! pins the repository with `-C`, strips inherited repository overrides
//! from the environment, and disables hooks, fsmonitor, replace refs and
//! interactive prompts.

use crate::subprocess::run_with_timeout;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Environment variables that would redirect git away from `-C <dir>`.
const SCRUBBED_ENV: &[&str] = &[
    "GIT_DIR",
    "GIT_WORK_TREE",
    "GIT_INDEX_FILE",
    "GIT_COMMON_DIR",
    "GIT_OBJECT_DIRECTORY",
    "GIT_ALTERNATE_OBJECT_DIRECTORIES",
    "GIT_NAMESPACE",
    "GIT_CONFIG",
    "GIT_CONFIG_PARAMETERS",
    "GIT_CONFIG_COUNT",
    "GIT_SSH_COMMAND",
    "GIT_EXTERNAL_DIFF",
];

#[derive(Debug, Error)]
pub enum GitError {
    /// Could not start, or timed out
    #[error("{0}")]
    Run(String),
    #[error("{description} failed (exit {code}): {stderr}")]
    Failed { description: String, code: i32, stderr: String },
}

/// A `git -C <dir>` command with a scrubbed environment.
pub fn git_command(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(dir)
        .args(["-c", "core.hooksPath=/dev/null", "-c", "protocol.ext.allow=never"])
        .args(["-c", "core.fsmonitor=false"])
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_NO_REPLACE_OBJECTS", "1")
        .env("GIT_OPTIONAL_LOCKS", "0")
        .env("GIT_CONFIG_NOSYSTEM", "1");
    for var in SCRUBBED_ENV {
        cmd.env_remove(var);
    }
    cmd
}

/// Run a git command; returns trimmed stdout on exit 0.
pub async fn run_git(cmd: Command, timeout: Duration, description: &str) -> Result<String, GitError> {
    let output = run_with_timeout(cmd, timeout, description).await.map_err(GitError::Run)?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    } else {
        Err(GitError::Failed {
            description: description.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
