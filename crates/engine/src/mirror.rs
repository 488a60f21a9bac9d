// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mirror store: one bare, push-disabled mirror per repository.
//!
//! Mutating operations on a mirror require a [`RepoGuard`], the per-repo
//! lock, so fetches and worktree provisioning against the same bare
//! repository are serialized while different repositories proceed in
//! parallel.

use crate::git::{git_command, run_git, GitError};
use crate::subprocess::{GIT_FETCH_TIMEOUT, GIT_TIMEOUT};
use parking_lot::Mutex;
use pinrun_core::ErrorClass;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// Push URL of every mirror. The `.invalid` TLD never resolves and the
/// scheme has no transport, so any push fails before touching a network.
pub const PUSH_DISABLED_URL: &str = "disabled://push-disabled.invalid";

const FETCH_REFSPECS: [&str; 2] = ["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"];

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid mirror request: {0}")]
    Invalid(String),
    #[error("repo {repo} is already mirrored from {existing}, not {requested}")]
    UrlMismatch { repo: String, existing: String, requested: String },
    #[error("failed to create mirror for {repo}: {reason}")]
    Create { repo: String, reason: String },
    #[error("fetch failed for {repo}: {reason}")]
    Fetch { repo: String, reason: String },
    #[error("{reference:?} does not resolve to a commit in {repo}")]
    RefNotFound { repo: String, reference: String },
    #[error(transparent)]
    Git(#[from] GitError),
}

impl MirrorError {
    pub fn error_class(&self) -> ErrorClass {
        match self {
            MirrorError::Invalid(_) | MirrorError::UrlMismatch { .. } => ErrorClass::Validation,
            MirrorError::RefNotFound { .. } => ErrorClass::RefNotFound,
            MirrorError::Create { .. } | MirrorError::Fetch { .. } | MirrorError::Git(_) => {
                ErrorClass::MirrorFetchFailed
            }
        }
    }
}

/// A bare mirror on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub repo_name: String,
    pub remote_url: String,
    pub path: PathBuf,
    /// True when this `ensure` call created it
    pub created: bool,
}

/// Refs that changed during a fetch, as `refname → new object id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub new_refs: BTreeMap<String, String>,
}

/// Exclusive hold on one repository's mirror.
pub struct RepoGuard {
    repo_name: String,
    _lock: OwnedMutexGuard<()>,
}

impl RepoGuard {
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }
}

pub struct MirrorStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MirrorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Mutex::new(HashMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<repo_name>.git`
    pub fn mirror_path(&self, repo_name: &str) -> PathBuf {
        self.root.join(format!("{repo_name}.git"))
    }

    /// Wait for exclusive access to `repo_name`'s mirror.
    pub async fn lock_repo(&self, repo_name: &str) -> RepoGuard {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(repo_name.to_string()).or_default())
        };
        RepoGuard { repo_name: repo_name.to_string(), _lock: lock.lock_owned().await }
    }

    /// Create the mirror if missing, else return the existing one.
    ///
    /// A new mirror is initialized bare with its push URL set to
    /// [`PUSH_DISABLED_URL`] and hooks disabled, all before any fetch, and
    /// only then moved into place. A repo name stays bound to the remote URL
    /// it was first created with.
    pub async fn ensure(&self, guard: &RepoGuard, remote_url: &str) -> Result<Mirror, MirrorError> {
        let repo = guard.repo_name();
        pinrun_core::validate::repo_name(repo).map_err(|e| MirrorError::Invalid(e.to_string()))?;
        pinrun_core::validate::remote_url(remote_url)
            .map_err(|e| MirrorError::Invalid(e.to_string()))?;

        let path = self.mirror_path(repo);
        if path.exists() {
            let existing = config_get(&path, "remote.origin.url").await?;
            if existing != remote_url {
                return Err(MirrorError::UrlMismatch {
                    repo: repo.to_string(),
                    existing,
                    requested: remote_url.to_string(),
                });
            }
            return Ok(Mirror {
                repo_name: repo.to_string(),
                remote_url: existing,
                path,
                created: false,
            });
        }

        let create_err = |reason: String| MirrorError::Create { repo: repo.to_string(), reason };
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| create_err(e.to_string()))?;

        // Partial directory from an interrupted create; we hold the repo lock
        let staging = self.root.join(format!(".{repo}.git.partial"));
        if staging.exists() {
            tokio::fs::remove_dir_all(&staging).await.map_err(|e| create_err(e.to_string()))?;
        }

        let mut init = git_command(&self.root);
        init.args(["init", "--bare", "--quiet"]).arg(&staging);
        run_git(init, GIT_TIMEOUT, "git init --bare").await.map_err(|e| create_err(e.to_string()))?;

        let settings: [(&str, &str); 4] = [
            ("remote.origin.url", remote_url),
            ("remote.origin.pushurl", PUSH_DISABLED_URL),
            ("core.hooksPath", "/dev/null"),
            ("gc.auto", "0"),
        ];
        for (key, value) in settings {
            config_set(&staging, key, value, false).await.map_err(|e| create_err(e.to_string()))?;
        }
        for refspec in FETCH_REFSPECS {
            config_set(&staging, "remote.origin.fetch", refspec, true)
                .await
                .map_err(|e| create_err(e.to_string()))?;
        }

        tokio::fs::rename(&staging, &path).await.map_err(|e| create_err(e.to_string()))?;
        tracing::info!(repo, remote_url, path = %path.display(), "mirror created");
        Ok(Mirror { repo_name: repo.to_string(), remote_url: remote_url.to_string(), path, created: true })
    }

    /// Fetch all branches and tags from the mirror's remote.
    ///
    /// The remote settings are verified (and restored) first, so a fetch
    /// never runs against a rewritten config.
    pub async fn fetch(&self, guard: &RepoGuard, mirror: &Mirror) -> Result<FetchReport, MirrorError> {
        self.verify_config(guard, mirror).await?;
        let before = list_refs(&mirror.path).await?;

        let mut cmd = git_command(&mirror.path);
        cmd.args(["fetch", "--quiet", "--no-auto-gc", "origin"]);
        run_git(cmd, GIT_FETCH_TIMEOUT, "git fetch").await.map_err(|e| MirrorError::Fetch {
            repo: mirror.repo_name.clone(),
            reason: e.to_string(),
        })?;

        let after = list_refs(&mirror.path).await?;
        let new_refs: BTreeMap<String, String> =
            after.into_iter().filter(|(name, oid)| before.get(name) != Some(oid)).collect();
        tracing::debug!(repo = %mirror.repo_name, new_refs = new_refs.len(), "mirror fetched");
        Ok(FetchReport { new_refs })
    }

    /// Resolve a full SHA, branch, or tag to a commit object name.
    pub async fn resolve(
        &self,
        guard: &RepoGuard,
        mirror: &Mirror,
        ref_or_sha: &str,
    ) -> Result<String, MirrorError> {
        debug_assert_eq!(guard.repo_name(), mirror.repo_name);
        let not_found = || MirrorError::RefNotFound {
            repo: mirror.repo_name.clone(),
            reference: ref_or_sha.to_string(),
        };

        let well_formed = !ref_or_sha.is_empty()
            && !ref_or_sha.starts_with('-')
            && !ref_or_sha.contains("..")
            && !ref_or_sha.chars().any(|c| c.is_whitespace() || c.is_control());
        if !well_formed {
            return Err(not_found());
        }

        if let Ok(sha) = pinrun_core::validate::sha(ref_or_sha) {
            let mut cmd = git_command(&mirror.path);
            cmd.args(["cat-file", "-e"]).arg(format!("{sha}^{{commit}}"));
            return match run_git(cmd, GIT_TIMEOUT, "git cat-file").await {
                Ok(_) => Ok(sha),
                Err(GitError::Failed { .. }) => Err(not_found()),
                Err(e) => Err(e.into()),
            };
        }

        let mut cmd = git_command(&mirror.path);
        cmd.args(["rev-parse", "--verify", "--quiet"]).arg(format!("{ref_or_sha}^{{commit}}"));
        match run_git(cmd, GIT_TIMEOUT, "git rev-parse").await {
            Ok(sha) if !sha.is_empty() => Ok(sha),
            Ok(_) | Err(GitError::Failed { .. }) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare the mirror's remote settings with what [`ensure`] wrote and
    /// put back anything that changed. Returns one line per change.
    ///
    /// [`ensure`]: MirrorStore::ensure
    pub async fn verify_config(&self, guard: &RepoGuard, mirror: &Mirror) -> Result<Vec<String>, MirrorError> {
        debug_assert_eq!(guard.repo_name(), mirror.repo_name);
        let path = &mirror.path;
        let mut changes = Vec::new();

        let push_urls = config_get_all(path, "remote.origin.pushurl").await?;
        if push_urls != [PUSH_DISABLED_URL] {
            changes.push(format!("remote.origin.pushurl was {push_urls:?}"));
            config_replace(path, "remote.origin.pushurl", PUSH_DISABLED_URL).await?;
        }
        let urls = config_get_all(path, "remote.origin.url").await?;
        if urls != [mirror.remote_url.as_str()] {
            changes.push(format!("remote.origin.url was {urls:?}"));
            config_replace(path, "remote.origin.url", &mirror.remote_url).await?;
        }
        // insteadOf/pushInsteadOf rewrites would redirect either URL
        for key in config_names_matching(path, r"^url\.").await? {
            changes.push(format!("{key} was set"));
            config_unset_all(path, &key).await?;
        }

        if !changes.is_empty() {
            tracing::error!(
                security_event = true,
                repo = %mirror.repo_name,
                changes = %changes.join("; "),
                "mirror remote config was rewritten, restored"
            );
        }
        Ok(changes)
    }

    /// Configured push URL of a mirror (always [`PUSH_DISABLED_URL`]).
    pub async fn push_url(&self, mirror: &Mirror) -> Result<String, MirrorError> {
        config_get(&mirror.path, "remote.origin.pushurl").await
    }
}

async fn config_get(repo: &Path, key: &str) -> Result<String, MirrorError> {
    let mut cmd = git_command(repo);
    cmd.args(["config", "--get", key]);
    Ok(run_git(cmd, GIT_TIMEOUT, "git config --get").await?)
}

/// Every value of `key` in the repo's own config; empty when unset.
async fn config_get_all(repo: &Path, key: &str) -> Result<Vec<String>, GitError> {
    let mut cmd = git_command(repo);
    cmd.args(["config", "--local", "--get-all", key]);
    match run_git(cmd, GIT_TIMEOUT, "git config --get-all").await {
        Ok(out) => Ok(out.lines().map(str::to_string).collect()),
        Err(GitError::Failed { code: 1, .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

async fn config_names_matching(repo: &Path, pattern: &str) -> Result<Vec<String>, GitError> {
    let mut cmd = git_command(repo);
    cmd.args(["config", "--local", "--name-only", "--get-regexp", pattern]);
    match run_git(cmd, GIT_TIMEOUT, "git config --get-regexp").await {
        Ok(out) => Ok(out.lines().map(str::to_string).collect()),
        Err(GitError::Failed { code: 1, .. }) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

async fn config_replace(repo: &Path, key: &str, value: &str) -> Result<(), GitError> {
    let mut cmd = git_command(repo);
    cmd.args(["config", "--local", "--replace-all", key, value]);
    run_git(cmd, GIT_TIMEOUT, "git config --replace-all").await.map(|_| ())
}

async fn config_unset_all(repo: &Path, key: &str) -> Result<(), GitError> {
    let mut cmd = git_command(repo);
    cmd.args(["config", "--local", "--unset-all", key]);
    run_git(cmd, GIT_TIMEOUT, "git config --unset-all").await.map(|_| ())
}

async fn config_set(repo: &Path, key: &str, value: &str, add: bool) -> Result<(), GitError> {
    let mut cmd = git_command(repo);
    cmd.arg("config");
    if add {
        cmd.arg("--add");
    }
    cmd.args([key, value]);
    run_git(cmd, GIT_TIMEOUT, "git config").await.map(|_| ())
}

async fn list_refs(repo: &Path) -> Result<HashMap<String, String>, MirrorError> {
    let mut cmd = git_command(repo);
    cmd.args(["for-each-ref", "--format=%(refname) %(objectname)"]);
    let out = run_git(cmd, GIT_TIMEOUT, "git for-each-ref").await?;
    Ok(out
        .lines()
        .filter_map(|line| line.split_once(' '))
        .map(|(name, oid)| (name.to_string(), oid.to_string()))
        .collect())
}

#[cfg(test)]
#[path = "mirror_tests.rs"]
mod tests;
