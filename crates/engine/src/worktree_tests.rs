// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::mirror::MirrorStore;
use crate::test_helpers::{git, Upstream};
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    upstream: Upstream,
    store: MirrorStore,
    provisioner: WorktreeProvisioner,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let store = MirrorStore::new(dir.path().join("mirrors"));
        let provisioner = WorktreeProvisioner::new(dir.path().join("worktrees"));
        Self { _dir: dir, upstream: Upstream::new(), store, provisioner }
    }

    async fn provision(&self, job_id: &JobId, sha: &str) -> Result<Worktree, WorktreeError> {
        let guard = self.store.lock_repo("demo").await;
        let mirror = self.store.ensure(&guard, &self.upstream.url()).await.unwrap();
        self.store.fetch(&guard, &mirror).await.unwrap();
        self.provisioner.provision(&guard, &mirror, sha, job_id).await
    }
}

#[test]
fn path_for_rejects_malformed_ids() {
    let provisioner = WorktreeProvisioner::new("/tmp/wt");
    assert!(provisioner.path_for(&JobId::from_string("../../etc")).is_err());
    assert!(provisioner.path_for(&JobId::from_string("job-short")).is_err());

    let id = JobId::new();
    assert_eq!(provisioner.path_for(&id).unwrap(), Path::new("/tmp/wt").join(id.as_str()));
}

#[tokio::test]
async fn provision_checks_out_detached_head() {
    let fx = Fixture::new();
    let sha = fx.upstream.head();
    let id = JobId::new();

    let mut worktree = fx.provision(&id, &sha).await.unwrap();

    assert!(worktree.path().join("README.md").exists());
    assert_eq!(git(worktree.path(), &["rev-parse", "HEAD"]), sha);
    // detached: symbolic-ref fails, so ask for the short form instead
    assert_eq!(git(worktree.path(), &["rev-parse", "--abbrev-ref", "HEAD"]), "HEAD");
    assert!(worktree.git_dir().starts_with(fx.store.mirror_path("demo")));

    worktree.destroy().await.unwrap();
}

#[tokio::test]
async fn destroy_removes_tree_and_registration() {
    let fx = Fixture::new();
    let id = JobId::new();
    let mut worktree = fx.provision(&id, &fx.upstream.head()).await.unwrap();
    let path = worktree.path().to_path_buf();

    worktree.destroy().await.unwrap();
    worktree.destroy().await.unwrap();

    assert!(worktree.is_destroyed());
    assert!(!path.exists());
    let listed = git(&fx.store.mirror_path("demo"), &["worktree", "list", "--porcelain"]);
    assert!(!listed.contains(id.as_str()));
}

#[tokio::test]
async fn destroy_removes_a_locked_tree() {
    let fx = Fixture::new();
    let mut worktree = fx.provision(&JobId::new(), &fx.upstream.head()).await.unwrap();
    let path = worktree.path().to_path_buf();

    let locked = guard::lock(&worktree).await.unwrap();
    drop(locked);
    worktree.destroy().await.unwrap();

    assert!(!path.exists());
}

#[tokio::test]
async fn provision_unknown_sha_fails_and_leaves_nothing() {
    let fx = Fixture::new();
    let id = JobId::new();

    let err = fx.provision(&id, &"d".repeat(40)).await.unwrap_err();

    assert!(matches!(err, WorktreeError::Add(_)));
    assert!(!fx.provisioner.path_for(&id).unwrap().exists());
}

#[tokio::test]
async fn provision_replaces_stale_tree_for_same_job() {
    let fx = Fixture::new();
    let id = JobId::new();
    let stale = fx.provisioner.path_for(&id).unwrap();
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("leftover.txt"), "x").unwrap();

    let mut worktree = fx.provision(&id, &fx.upstream.head()).await.unwrap();

    assert!(!worktree.path().join("leftover.txt").exists());
    assert!(worktree.path().join("README.md").exists());
    worktree.destroy().await.unwrap();
}

#[tokio::test]
async fn dropped_worktree_is_removed() {
    let fx = Fixture::new();
    let worktree = fx.provision(&JobId::new(), &fx.upstream.head()).await.unwrap();
    let path = worktree.path().to_path_buf();
    let git_dir = worktree.git_dir().to_path_buf();
    assert!(git_dir.exists());

    drop(worktree);

    for _ in 0..100 {
        if !path.exists() && !git_dir.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(!path.exists());
    assert!(!git_dir.exists());
}

#[test]
fn dropped_worktree_outside_a_runtime_is_removed_inline() {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let fx = Fixture::new();
    let worktree = runtime.block_on(fx.provision(&JobId::new(), &fx.upstream.head())).unwrap();
    let path = worktree.path().to_path_buf();

    drop(runtime);
    drop(worktree);

    assert!(!path.exists());
}

#[tokio::test]
async fn sweep_orphans_keeps_live_jobs() {
    let fx = Fixture::new();
    let live_id = JobId::new();
    let mut live = fx.provision(&live_id, &fx.upstream.head()).await.unwrap();
    let orphan = fx.provisioner.root().join(JobId::new().as_str());
    std::fs::create_dir_all(orphan.join("nested")).unwrap();

    let keep: HashSet<String> = [live_id.to_string()].into_iter().collect();
    let removed = fx.provisioner.sweep_orphans(&keep, &[fx.store.mirror_path("demo")]).await;

    assert_eq!(removed, vec![orphan.clone()]);
    assert!(!orphan.exists());
    assert!(live.path().exists());
    live.destroy().await.unwrap();
}

#[tokio::test]
async fn sweep_orphans_removes_leftover_scratch_index() {
    let fx = Fixture::new();
    let scratch = fx.provisioner.root().join(format!(".{}.index", JobId::new()));
    std::fs::create_dir_all(fx.provisioner.root()).unwrap();
    std::fs::write(&scratch, "DIRC").unwrap();

    let removed = fx.provisioner.sweep_orphans(&HashSet::new(), &[]).await;

    assert_eq!(removed, vec![scratch.clone()]);
    assert!(!scratch.exists());
}

#[tokio::test]
async fn sweep_orphans_unlocks_orphan_admin_dirs() {
    let fx = Fixture::new();
    let orphan = fx.provision(&JobId::new(), &fx.upstream.head()).await.unwrap();
    let locked = crate::guard::lock(&orphan).await.unwrap();
    drop(locked);
    let git_dir = orphan.git_dir().to_path_buf();

    let removed = fx.provisioner.sweep_orphans(&HashSet::new(), &[fx.store.mirror_path("demo")]).await;

    assert_eq!(removed, vec![orphan.path().to_path_buf()]);
    assert!(!git_dir.exists());
    drop(orphan);
}

#[tokio::test]
async fn concurrent_provisions_on_one_repo_do_not_collide() {
    let fx = std::sync::Arc::new(Fixture::new());
    let sha = fx.upstream.head();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let fx = std::sync::Arc::clone(&fx);
        let sha = sha.clone();
        handles.push(tokio::spawn(async move { fx.provision(&JobId::new(), &sha).await }));
    }
    let mut trees = Vec::new();
    for handle in handles {
        trees.push(handle.await.unwrap().unwrap());
    }
    for tree in &mut trees {
        assert_eq!(git(tree.path(), &["rev-parse", "HEAD"]), sha);
        tree.destroy().await.unwrap();
    }
}
