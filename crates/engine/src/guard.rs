// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox guard: read-only lock and post-run clean-tree assertion.
//!
//! The executor only accepts a [`LockedWorktree`], and the only way to get
//! one is [`lock`], so a command can never observe a writable tree.

use crate::git::{git_command, run_git};
use crate::subprocess::GIT_TIMEOUT;
use crate::worktree::Worktree;
use pinrun_core::JobId;
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use walkdir::WalkDir;

const WRITE_BITS: u32 = 0o222;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("failed to lock worktree {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of the clean-tree assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    Clean,
    Dirty { summary: String },
}

impl CleanOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, CleanOutcome::Clean)
    }
}

/// A worktree whose every file and directory has had its write bits removed,
/// along with its administrative dir in the mirror.
#[derive(Debug)]
pub struct LockedWorktree<'a> {
    worktree: &'a Worktree,
    /// Contents of the tree's `.git` file at lock time
    gitfile: String,
}

impl LockedWorktree<'_> {
    pub fn path(&self) -> &Path {
        self.worktree.path()
    }

    pub fn sha(&self) -> &str {
        self.worktree.sha()
    }

    pub fn job_id(&self) -> &JobId {
        self.worktree.job_id()
    }

    /// Scratch index the clean-tree assertion rebuilds from the pinned
    /// commit. Lives beside the tree, outside anything the command owns.
    fn scratch_index(&self) -> PathBuf {
        self.path().with_file_name(format!(".{}.index", self.job_id()))
    }
}

/// Strip `a-w` recursively (execute bits kept, symlinks not followed) from
/// the tree and from its admin dir, so neither the files nor the index the
/// tree is checked out with can be rewritten.
pub async fn lock(worktree: &Worktree) -> Result<LockedWorktree<'_>, GuardError> {
    let path = worktree.path().to_path_buf();
    let git_dir = worktree.git_dir().to_path_buf();
    let lock_err = |source| GuardError::Lock { path: worktree.path().to_path_buf(), source };

    let gitfile = tokio::fs::read_to_string(path.join(".git")).await.map_err(lock_err)?;
    let locked = tokio::task::spawn_blocking(move || {
        let mut count = strip_write(&path)?;
        if !git_dir.as_os_str().is_empty() {
            count += strip_write(&git_dir)?;
        }
        Ok::<_, io::Error>(count)
    })
    .await
    .map_err(|e| lock_err(io::Error::other(e.to_string())))?
    .map_err(lock_err)?;

    tracing::debug!(job_id = %worktree.job_id(), entries = locked, "worktree locked read-only");
    Ok(LockedWorktree { worktree, gitfile })
}

fn strip_write(root: &Path) -> io::Result<u64> {
    let mut count = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let mode = entry.metadata().map_err(io::Error::from)?.permissions().mode();
        if mode & WRITE_BITS != 0 {
            std::fs::set_permissions(entry.path(), Permissions::from_mode(mode & !WRITE_BITS))?;
        }
        count += 1;
    }
    Ok(count)
}

/// Give the owner back write access (and directory traversal) so the tree
/// can be deleted. Best-effort; a missing path is not an error.
pub fn restore_write(root: &Path) {
    for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_symlink() {
            continue;
        }
        let Ok(meta) = std::fs::symlink_metadata(entry.path()) else {
            continue;
        };
        let mode = meta.permissions().mode();
        let wanted = if meta.is_dir() { mode | 0o700 } else { mode | 0o200 };
        if wanted != mode {
            let _ = std::fs::set_permissions(entry.path(), Permissions::from_mode(wanted));
        }
    }
}

/// Verify the tree is exactly the pinned commit.
///
/// Every check must pass; a check that cannot run counts as dirty.
/// - the tree's own index carries no assume-unchanged or skip-worktree
///   entries and matches the pinned commit
/// - `HEAD` is still the pinned SHA
/// - against an index rebuilt from the pinned commit, no tracked file
///   differs and nothing untracked or ignored exists
/// - the `.git` link file still points at the same admin dir
///
/// The rebuilt index carries no state the command could have written, so
/// flags or stat data planted in the tree's own index cannot hide a change.
pub async fn assert_clean(tree: &LockedWorktree<'_>) -> CleanOutcome {
    let sha = tree.sha();
    let mut findings = Vec::new();

    match tree_git(tree, &["ls-files", "-v"], None).await {
        Ok(out) => {
            let flagged: Vec<&str> = out.lines().filter(|line| !line.starts_with("H ")).collect();
            if !flagged.is_empty() {
                findings.push(format!("index entries hide changes:\n{}", flagged.join("\n")));
            }
        }
        Err(e) => findings.push(format!("index flag check failed: {e}")),
    }

    match tree_git(tree, &["diff-index", "--cached", "--name-status", sha], None).await {
        Ok(out) if out.is_empty() => {}
        Ok(out) => findings.push(format!("index diverged from {sha}:\n{out}")),
        Err(e) => findings.push(format!("index check failed: {e}")),
    }

    match tree_git(tree, &["rev-parse", "HEAD"], None).await {
        Ok(head) if head == sha => {}
        Ok(head) => findings.push(format!("HEAD moved: pinned {sha}, found {head}")),
        Err(e) => findings.push(format!("HEAD check failed: {e}")),
    }

    let scratch = tree.scratch_index();
    match against_pinned_commit(tree, &scratch).await {
        Ok(mut changes) => findings.append(&mut changes),
        Err(e) => findings.push(format!("pinned-commit check failed: {e}")),
    }
    remove_scratch(&scratch).await;

    match tokio::fs::read_to_string(tree.path().join(".git")).await {
        Ok(gitfile) if gitfile == tree.gitfile => {}
        Ok(_) => findings.push(".git link file was rewritten".to_string()),
        Err(e) => findings.push(format!(".git link file unreadable: {e}")),
    }

    if findings.is_empty() {
        CleanOutcome::Clean
    } else {
        CleanOutcome::Dirty { summary: findings.join("\n") }
    }
}

/// Compare the working tree with a fresh index read from the pinned commit.
async fn against_pinned_commit(tree: &LockedWorktree<'_>, scratch: &Path) -> Result<Vec<String>, String> {
    let sha = tree.sha();
    let index = Some(scratch);
    remove_scratch(scratch).await;

    tree_git(tree, &["read-tree", sha], index).await?;
    // Records stat data for unchanged files; changed ones stay stale and show below
    tree_git(tree, &["update-index", "-q", "--refresh"], index).await?;

    let mut findings = Vec::new();
    let changed = tree_git(tree, &["diff-files", "--name-status"], index).await?;
    if !changed.is_empty() {
        findings.push(format!("diverged from {sha}:\n{changed}"));
    }
    let status =
        tree_git(tree, &["status", "--porcelain", "--untracked-files=all", "--ignored"], index).await?;
    if !status.is_empty() {
        findings.push(format!("working tree changes:\n{status}"));
    }
    Ok(findings)
}

async fn remove_scratch(scratch: &Path) {
    let lock = scratch.with_extension("index.lock");
    for path in [scratch, lock.as_path()] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch index");
            }
        }
    }
}

/// Git against the recorded admin dir, not whatever `.git` now says.
async fn tree_git(tree: &LockedWorktree<'_>, args: &[&str], index: Option<&Path>) -> Result<String, String> {
    let mut cmd: Command = git_command(tree.path());
    cmd.arg(format!("--git-dir={}", tree.worktree.git_dir().display()))
        .arg(format!("--work-tree={}", tree.path().display()))
        .args(args);
    if let Some(index) = index {
        cmd.env("GIT_INDEX_FILE", index);
    }
    let description = format!("git {}", args.first().copied().unwrap_or_default());
    run_git(cmd, GIT_TIMEOUT, &description).await.map_err(|e| e.to_string())
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
