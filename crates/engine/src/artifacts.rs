// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact store: one sealed directory per job under the artifacts root.
//!
//! Directory names come only from server-generated job IDs. Every file is
//! written to a temp name, fsynced and renamed; `finalize` fsyncs the
//! directory and seals it read-only, so a finalized set survives a crash
//! before the ledger records the terminal status.

use crate::guard;
use pinrun_core::{
    ErrorClass, Job, JobId, JobOutcome, JobStatus, LogStream, DEFAULT_TAIL_LINES, MAX_TAIL_LINES,
};
use serde::{Deserialize, Serialize};
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";
pub const EXIT_CODE: &str = "exit_code";
pub const META_JSON: &str = "meta.json";
pub const DIRTY_TXT: &str = "dirty.txt";

const SEALED_FILE_MODE: u32 = 0o444;
const SEALED_DIR_MODE: u32 = 0o555;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("refusing to derive an artifact path from malformed job id {0:?}")]
    InvalidJobId(String),
    #[error("invalid artifact name {0:?}")]
    InvalidName(String),
    #[error("no {stream} log for job {job_id}")]
    NotFound { job_id: String, stream: LogStream },
    #[error("artifact io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode artifact: {0}")]
    Json(#[from] serde_json::Error),
}

/// Summary written as `meta.json` next to the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub job_id: JobId,
    pub job_type: String,
    pub repo_name: String,
    pub sha: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub attempt: u32,
    pub finished_at_ms: u64,
}

impl ArtifactMeta {
    pub fn new(job: &Job, outcome: &JobOutcome, duration_ms: Option<u64>, finished_at_ms: u64) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            repo_name: job.repo_name.clone(),
            sha: job.sha.clone(),
            status: outcome.status,
            error_class: outcome.error_class,
            exit_code: outcome.exit_code,
            truncated: outcome.truncated,
            duration_ms,
            attempt: job.attempts,
            finished_at_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<job_id>`
    pub fn dir_for(&self, job_id: &JobId) -> Result<PathBuf, ArtifactError> {
        if !job_id.is_well_formed() {
            return Err(ArtifactError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.root.join(job_id.as_str()))
    }

    /// Start (or restart) a job's artifact set with an empty directory.
    pub async fn open(&self, job_id: &JobId) -> Result<ArtifactHandle, ArtifactError> {
        let dir = self.dir_for(job_id)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ArtifactError::Io { path, source }
        };
        tokio::fs::create_dir_all(&self.root).await.map_err(io_err(&self.root))?;

        if tokio::fs::symlink_metadata(&dir).await.is_ok() {
            tracing::debug!(job_id = %job_id, "clearing artifacts from an earlier attempt");
            let owned = dir.clone();
            let cleared = tokio::task::spawn_blocking(move || {
                guard::restore_write(&owned);
                std::fs::remove_dir_all(&owned)
            })
            .await
            .map_err(|e| io::Error::other(e.to_string()))
            .and_then(|r| r);
            cleared.map_err(io_err(&dir))?;
        }
        tokio::fs::create_dir(&dir).await.map_err(io_err(&dir))?;
        Ok(ArtifactHandle { job_id: job_id.clone(), dir })
    }

    /// Last `lines` lines of a captured stream (default 100, at most 10 000).
    pub async fn tail(
        &self,
        job_id: &JobId,
        stream: LogStream,
        lines: Option<usize>,
    ) -> Result<String, ArtifactError> {
        let path = self.dir_for(job_id)?.join(stream.file_name());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound { job_id: job_id.to_string(), stream });
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        let content = String::from_utf8_lossy(&bytes);
        let n = lines.unwrap_or(DEFAULT_TAIL_LINES).min(MAX_TAIL_LINES);
        Ok(tail_lines(&content, n).to_string())
    }
}

/// Exclusive writer for one job's artifact directory.
#[derive(Debug)]
pub struct ArtifactHandle {
    job_id: JobId,
    dir: PathBuf,
}

impl ArtifactHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Durably write one file. `name` must be a plain file name.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), ArtifactError> {
        validate_name(name)?;
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let io_err = |source| ArtifactError::Io { path: target.clone(), source };

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&tmp, &target).await.map_err(io_err)?;
        Ok(())
    }

    pub async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ArtifactError> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        self.write(name, &bytes).await
    }

    /// Fsync the directory and seal the set read-only.
    pub async fn finalize(self) -> Result<PathBuf, ArtifactError> {
        let dir = self.dir.clone();
        let sealed = tokio::task::spawn_blocking(move || seal(&dir))
            .await
            .map_err(|e| io::Error::other(e.to_string()))
            .and_then(|r| r);
        sealed.map_err(|source| ArtifactError::Io { path: self.dir.clone(), source })?;
        tracing::debug!(job_id = %self.job_id, path = %self.dir.display(), "artifacts finalized");
        Ok(self.dir)
    }
}

fn seal(dir: &Path) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() {
            std::fs::set_permissions(&path, Permissions::from_mode(SEALED_FILE_MODE))?;
        }
    }
    std::fs::File::open(dir)?.sync_all()?;
    std::fs::set_permissions(dir, Permissions::from_mode(SEALED_DIR_MODE))
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().is_some_and(|f| f == name);
    if plain {
        Ok(())
    } else {
        Err(ArtifactError::InvalidName(name.to_string()))
    }
}

/// The suffix of `content` holding its last `n` lines.
pub fn tail_lines(content: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let body = content.strip_suffix('\n').unwrap_or(content);
    match body.rmatch_indices('\n').nth(n - 1) {
        Some((idx, _)) => &content[idx + 1..],
        None => content,
    }
}

#[cfg(test)]
#[path = "artifacts_tests.rs"]
mod tests;
