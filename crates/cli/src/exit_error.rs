// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Custom error type that carries a process exit code.
//!
//! Commands return `ExitError` instead of calling `std::process::exit()`
//! directly, allowing `main()` to handle process termination.

use std::fmt;

use pinrun_wire::ErrorKind;

/// Generic failure (including a job that finished `failure`/`error`)
pub const EXIT_FAILURE: i32 = 1;
/// Request rejected as invalid, or the allowlist file is invalid
pub const EXIT_INVALID: i32 = 2;
/// Job or artifact not found
pub const EXIT_NOT_FOUND: i32 = 3;
/// Queue full; retry later
pub const EXIT_BUSY: i32 = 4;
/// Daemon not running or unreachable
pub const EXIT_UNAVAILABLE: i32 = 5;
/// `--wait` gave up before the job finished
pub const EXIT_TIMEOUT: i32 = 6;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Exit error for a daemon `Error` response.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let code = match kind {
            ErrorKind::Validation => EXIT_INVALID,
            ErrorKind::NotFound => EXIT_NOT_FOUND,
            ErrorKind::QueueFull => EXIT_BUSY,
            ErrorKind::Internal => EXIT_FAILURE,
        };
        Self::new(code, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}
