// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

use pinrun_engine::ExecIdentity;

use crate::lifecycle::LifecycleError;

/// Protocol version (from Cargo.toml)
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Resolve state directory: PINRUN_STATE_DIR > XDG_STATE_HOME/pinrun > ~/.local/state/pinrun
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("PINRUN_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("pinrun"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/pinrun"))
}

/// Allowlist definition file override
pub fn allowlist_path() -> Option<PathBuf> {
    std::env::var("PINRUN_ALLOWLIST").ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn millis_var(name: &str) -> Option<Duration> {
    parse_var::<u64>(name).filter(|ms| *ms > 0).map(Duration::from_millis)
}

pub fn workers() -> Option<usize> {
    parse_var::<usize>("PINRUN_WORKERS").filter(|n| *n > 0)
}

pub fn queue_depth() -> Option<usize> {
    parse_var::<usize>("PINRUN_QUEUE_DEPTH").filter(|n| *n > 0)
}

pub fn lease_ttl() -> Option<Duration> {
    millis_var("PINRUN_LEASE_TTL_MS")
}

pub fn reaper_interval() -> Option<Duration> {
    millis_var("PINRUN_REAPER_INTERVAL_MS")
}

pub fn max_attempts() -> Option<u32> {
    parse_var::<u32>("PINRUN_MAX_ATTEMPTS").filter(|n| *n > 0)
}

/// Default IPC timeout
pub fn ipc_timeout() -> Option<Duration> {
    millis_var("PINRUN_IPC_TIMEOUT_MS")
}

/// How long shutdown waits for in-flight jobs
pub fn drain_timeout() -> Option<Duration> {
    millis_var("PINRUN_DRAIN_TIMEOUT_MS")
}

/// Identity for executed commands.
///
/// `PINRUN_EXEC_UID`/`PINRUN_EXEC_GID` when set (the gid defaults to the
/// uid), otherwise `nobody` under root. An identity sharing the daemon's
/// uid is refused unless `PINRUN_EXEC_SHARED_IDENTITY` opts in.
pub fn exec_identity() -> Result<ExecIdentity, LifecycleError> {
    let uid = std::env::var("PINRUN_EXEC_UID").ok();
    let gid = std::env::var("PINRUN_EXEC_GID").ok();
    let parse = |name: &str, value: &str| {
        value.trim().parse::<u32>().map_err(|_| LifecycleError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        })
    };
    let identity = match (uid, gid) {
        (None, None) => ExecIdentity::unprivileged_default(),
        (Some(uid), gid) => {
            let uid = parse("PINRUN_EXEC_UID", &uid)?;
            let gid = match gid {
                Some(gid) => parse("PINRUN_EXEC_GID", &gid)?,
                None => uid,
            };
            ExecIdentity::User { uid, gid }
        }
        (None, Some(gid)) => {
            return Err(LifecycleError::InvalidEnv {
                name: "PINRUN_EXEC_GID".to_string(),
                value: format!("{gid} (requires PINRUN_EXEC_UID)"),
            })
        }
    };
    if identity.shares_daemon_uid() && !shared_identity_allowed() {
        return Err(LifecycleError::SharedExecIdentity);
    }
    Ok(identity)
}

/// `PINRUN_EXEC_SHARED_IDENTITY=1`: development and test setups that run
/// commands as the daemon's own user.
fn shared_identity_allowed() -> bool {
    std::env::var("PINRUN_EXEC_SHARED_IDENTITY")
        .is_ok_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}
