// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree provisioner: ephemeral detached checkouts keyed by job ID

use crate::git::{git_command, run_git, GitError};
use crate::guard;
use crate::mirror::{Mirror, RepoGuard};
use crate::subprocess::{GIT_TIMEOUT, GIT_WORKTREE_TIMEOUT};
use pinrun_core::JobId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("refusing to derive a worktree path from malformed job id {0:?}")]
    InvalidJobId(String),
    #[error("worktree io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("git worktree add failed: {0}")]
    Add(GitError),
    #[error("worktree {0} still exists after removal")]
    NotRemoved(PathBuf),
}

/// Creates and destroys job worktrees under one root directory.
#[derive(Debug, Clone)]
pub struct WorktreeProvisioner {
    root: PathBuf,
}

impl WorktreeProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<job_id>`. Only server-generated IDs are accepted.
    pub fn path_for(&self, job_id: &JobId) -> Result<PathBuf, WorktreeError> {
        if !job_id.is_well_formed() {
            return Err(WorktreeError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.root.join(job_id.as_str()))
    }

    /// Check out `sha` from `mirror`, detached, at the job's path.
    ///
    /// Leftovers from an earlier attempt of the same job are destroyed
    /// first. On failure, whatever was created is removed again.
    pub async fn provision(
        &self,
        guard: &RepoGuard,
        mirror: &Mirror,
        sha: &str,
        job_id: &JobId,
    ) -> Result<Worktree, WorktreeError> {
        debug_assert_eq!(guard.repo_name(), mirror.repo_name);
        let path = self.path_for(job_id)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorktreeError::Io { path: self.root.clone(), source })?;

        let mut worktree = Worktree {
            job_id: job_id.clone(),
            path,
            sha: sha.to_string(),
            mirror_path: mirror.path.clone(),
            git_dir: PathBuf::new(),
            destroyed: false,
        };
        if tokio::fs::symlink_metadata(&worktree.path).await.is_ok() {
            tracing::info!(job_id = %job_id, path = %worktree.path.display(), "removing stale worktree");
            // An earlier attempt may have left its admin dir locked too
            worktree.git_dir = mirror.path.join("worktrees").join(job_id.as_str());
            worktree.destroy().await?;
            worktree.destroyed = false;
            worktree.git_dir = PathBuf::new();
        }

        let mut cmd = git_command(&mirror.path);
        cmd.args(["worktree", "add", "--detach", "--force", "--quiet"]).arg(&worktree.path).arg(sha);
        if let Err(e) = run_git(cmd, GIT_WORKTREE_TIMEOUT, "git worktree add").await {
            if let Err(cleanup) = worktree.destroy().await {
                tracing::warn!(job_id = %job_id, error = %cleanup, "cleanup after failed provision");
            }
            return Err(WorktreeError::Add(e));
        }

        // Pin the administrative dir now; later checks must not trust the
        // tree's own `.git` file.
        let mut cmd = git_command(&worktree.path);
        cmd.args(["rev-parse", "--absolute-git-dir"]);
        match run_git(cmd, GIT_TIMEOUT, "git rev-parse --absolute-git-dir").await {
            Ok(dir) => worktree.git_dir = PathBuf::from(dir),
            Err(e) => {
                if let Err(cleanup) = worktree.destroy().await {
                    tracing::warn!(job_id = %job_id, error = %cleanup, "cleanup after failed provision");
                }
                return Err(WorktreeError::Add(e));
            }
        }

        tracing::debug!(job_id = %job_id, sha, path = %worktree.path.display(), "worktree provisioned");
        Ok(worktree)
    }

    /// Destroy every directory under the root whose name is not in `live`.
    ///
    /// Used at startup, when no job can be running. Returns removed paths.
    pub async fn sweep_orphans(
        &self,
        live: &HashSet<String>,
        mirror_paths: &[PathBuf],
    ) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return removed;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if live.contains(&name) {
                continue;
            }
            let path = entry.path();
            match remove_tree(&path).await {
                Ok(()) => removed.push(path),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "orphan sweep failed"),
            }
        }
        for mirror in mirror_paths {
            // Admin dirs of orphans may still be locked
            unlock(&mirror.join("worktrees")).await;
            prune(mirror).await;
        }
        removed
    }
}

/// A job's checkout. Exclusively owned by the job's worker.
///
/// Call [`Worktree::destroy`] on every exit path; if the value is dropped
/// without it (panic, cancelled future), `Drop` deletes the tree and its
/// admin dir on the blocking pool as a last resort.
#[derive(Debug)]
pub struct Worktree {
    job_id: JobId,
    path: PathBuf,
    sha: String,
    mirror_path: PathBuf,
    /// `<mirror>/worktrees/<name>`, recorded at provision time
    git_dir: PathBuf,
    destroyed: bool,
}

impl Worktree {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit the tree is pinned to.
    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Remove the checkout and its registration in the mirror. Idempotent,
    /// and safe on a partially created tree.
    pub async fn destroy(&mut self) -> Result<(), WorktreeError> {
        if self.destroyed {
            return Ok(());
        }

        // A locked tree cannot be unlinked by its owner
        unlock(&self.path).await;
        if !self.git_dir.as_os_str().is_empty() {
            unlock(&self.git_dir).await;
        }

        let mut cmd = git_command(&self.mirror_path);
        cmd.args(["worktree", "remove", "--force", "--force"]).arg(&self.path);
        // Not registered (partial create) is fine; the directory is removed below
        if let Err(e) = run_git(cmd, GIT_WORKTREE_TIMEOUT, "git worktree remove").await {
            tracing::debug!(job_id = %self.job_id, error = %e, "git worktree remove failed");
        }
        remove_tree(&self.path).await?;
        prune(&self.mirror_path).await;

        if tokio::fs::symlink_metadata(&self.path).await.is_ok() {
            return Err(WorktreeError::NotRemoved(self.path.clone()));
        }
        self.destroyed = true;
        tracing::debug!(job_id = %self.job_id, "worktree destroyed");
        Ok(())
    }
}

impl Drop for Worktree {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        tracing::warn!(job_id = %self.job_id, path = %self.path.display(), "worktree dropped without destroy, removing");
        let paths = [self.path.clone(), self.git_dir.clone()];
        let cleanup = move || remove_dropped(&paths);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(cleanup)),
            Err(_) => cleanup(),
        }
    }
}

/// Delete a dropped tree and its admin dir directly, without `git`.
///
/// Runs without the repo lock: both paths belong to this job alone, and the
/// mirror's other registrations are left untouched. The next destroy or
/// startup sweep prunes the stale entry.
fn remove_dropped(paths: &[PathBuf]) {
    for path in paths.iter().filter(|p| !p.as_os_str().is_empty()) {
        guard::restore_write(path);
        if let Err(e) = std::fs::remove_dir_all(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!(path = %path.display(), error = %e, "failed to remove dropped worktree");
            }
        }
    }
}

async fn unlock(path: &Path) {
    let owned = path.to_path_buf();
    let _ = tokio::task::spawn_blocking(move || guard::restore_write(&owned)).await;
}

/// Restore write permission, then delete a directory tree.
async fn remove_tree(path: &Path) -> Result<(), WorktreeError> {
    let owned = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        guard::restore_write(&owned);
        let removed = match std::fs::symlink_metadata(&owned) {
            Ok(meta) if !meta.is_dir() => std::fs::remove_file(&owned),
            _ => std::fs::remove_dir_all(&owned),
        };
        match removed {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    })
    .await;
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(WorktreeError::Io { path: path.to_path_buf(), source }),
        Err(join) => Err(WorktreeError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other(join.to_string()),
        }),
    }
}

async fn prune(mirror_path: &Path) {
    let mut cmd = git_command(mirror_path);
    cmd.args(["worktree", "prune"]);
    if let Err(e) = run_git(cmd, GIT_TIMEOUT, "git worktree prune").await {
        tracing::debug!(mirror = %mirror_path.display(), error = %e, "worktree prune failed");
    }
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
