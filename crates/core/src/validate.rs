// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validation of caller-supplied submission fields.
//!
//! Everything a caller sends passes through here before it reaches the
//! ledger, a git command line, or a path.

use crate::job::JobRequest;
use thiserror::Error;

pub const MAX_REPO_NAME_LEN: usize = 100;
pub const MAX_JOB_TYPE_LEN: usize = 64;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const MAX_REMOTE_URL_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid job type name: {0:?}")]
    JobType(String),
    #[error("invalid repo name: {0:?}")]
    RepoName(String),
    #[error("invalid remote url: {0}")]
    RemoteUrl(String),
    #[error("malformed sha: {0:?} (expected 40 or 64 hex characters)")]
    Sha(String),
    #[error("invalid idempotency key: {0}")]
    IdempotencyKey(String),
}

/// Job type names: `[a-z0-9][a-z0-9_-]*`, at most 64 characters.
pub fn job_type(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let ok = name.len() <= MAX_JOB_TYPE_LEN
        && chars.next().is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::JobType(name.to_string()))
    }
}

/// Repo names become a mirror directory name: `[A-Za-z0-9][A-Za-z0-9._-]*`,
/// no `..`, no trailing `.git`, at most 100 characters.
pub fn repo_name(name: &str) -> Result<(), ValidationError> {
    let mut chars = name.chars();
    let ok = name.len() <= MAX_REPO_NAME_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !name.contains("..")
        && !name.ends_with(".git")
        && !name.ends_with(".lock");
    if ok {
        Ok(())
    } else {
        Err(ValidationError::RepoName(name.to_string()))
    }
}

/// Full commit object names only (SHA-1 or SHA-256), normalized to lowercase.
pub fn sha(sha: &str) -> Result<String, ValidationError> {
    let ok = (sha.len() == 40 || sha.len() == 64) && sha.chars().all(|c| c.is_ascii_hexdigit());
    if ok {
        Ok(sha.to_ascii_lowercase())
    } else {
        Err(ValidationError::Sha(sha.to_string()))
    }
}

/// Remote URLs are passed to `git fetch`; reject anything git could read as
/// an option or a command-executing transport.
pub fn remote_url(url: &str) -> Result<(), ValidationError> {
    let reason = if url.is_empty() {
        "empty"
    } else if url.len() > MAX_REMOTE_URL_LEN {
        "too long"
    } else if url.starts_with('-') {
        "must not start with '-'"
    } else if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "contains whitespace or control characters"
    } else if url.starts_with("ext::") || url.starts_with("fd::") {
        "transport not allowed"
    } else {
        return Ok(());
    };
    Err(ValidationError::RemoteUrl(format!("{url:?}: {reason}")))
}

pub fn idempotency_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::IdempotencyKey("empty".to_string()));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::IdempotencyKey(format!(
            "longer than {MAX_IDEMPOTENCY_KEY_LEN} bytes"
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(ValidationError::IdempotencyKey("contains control characters".to_string()));
    }
    Ok(())
}

/// Validate every field of a raw submission, returning it with the SHA
/// normalized.
///
/// The job type is checked first; callers that also look it up in the
/// allowlist do so before calling this.
pub fn request(mut request: JobRequest) -> Result<JobRequest, ValidationError> {
    job_type(&request.job_type)?;
    repo_name(&request.repo_name)?;
    remote_url(&request.remote_url)?;
    request.sha = sha(&request.sha)?;
    if let Some(key) = &request.idempotency_key {
        idempotency_key(key)?;
    }
    Ok(request)
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
