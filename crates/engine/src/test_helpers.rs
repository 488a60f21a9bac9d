// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixtures for git-backed tests: a real upstream repository in a temp dir.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Run git synchronously with a fixed identity; panics on failure.
pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=pinrun-test", "-c", "user.email=test@pinrun.invalid"])
        .args(["-c", "commit.gpgsign=false", "-c", "core.hooksPath=/dev/null"])
        .args(args)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub(crate) fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// A non-bare upstream repository with one commit on `main`.
pub(crate) struct Upstream {
    _dir: TempDir,
    pub path: PathBuf,
}

impl Upstream {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upstream");
        std::fs::create_dir_all(&path).unwrap();
        git(&path, &["init", "--quiet"]);
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        let upstream = Self { _dir: dir, path };
        upstream.commit("README.md", "# demo\n");
        upstream
    }

    /// `file://` URL of the upstream.
    pub fn url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    /// Commit one file; returns the new HEAD sha.
    pub fn commit(&self, name: &str, content: &str) -> String {
        let file = self.path.join(name);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file, content).unwrap();
        git(&self.path, &["add", name]);
        git(&self.path, &["commit", "--quiet", "-m", &format!("add {name}")]);
        self.head()
    }

    pub fn head(&self) -> String {
        git(&self.path, &["rev-parse", "HEAD"])
    }
}

/// A provisioned worktree of a fresh upstream, plus the stores behind it.
pub(crate) struct TreeFixture {
    pub _dir: TempDir,
    pub upstream: Upstream,
    pub store: crate::mirror::MirrorStore,
    pub worktree: crate::worktree::Worktree,
}

impl TreeFixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Upstream::new();
        let store = crate::mirror::MirrorStore::new(dir.path().join("mirrors"));
        let provisioner = crate::worktree::WorktreeProvisioner::new(dir.path().join("worktrees"));
        let guard = store.lock_repo("demo").await;
        let mirror = store.ensure(&guard, &upstream.url()).await.unwrap();
        store.fetch(&guard, &mirror).await.unwrap();
        let job_id = pinrun_core::JobId::new();
        let worktree = provisioner.provision(&guard, &mirror, &upstream.head(), &job_id).await.unwrap();
        drop(guard);
        Self { _dir: dir, upstream, store, worktree }
    }

    pub async fn destroy(mut self) {
        self.worktree.destroy().await.unwrap();
    }
}

/// Allowlist entry running `sh -c <script>`.
pub(crate) fn shell_entry(job_type: &str, script: &str, timeout: std::time::Duration) -> crate::allowlist::AllowlistEntry {
    crate::allowlist::AllowlistEntry {
        job_type: job_type.to_string(),
        argv: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
        cwd: crate::allowlist::CwdPolicy::default(),
        timeout,
        max_output_bytes: 64 * 1024,
        limits: None,
        env: Default::default(),
    }
}
