// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pinrun-engine: the per-job sandbox pipeline
//!
//! Allowlist registry, mirror store, worktree provisioner, sandbox guard,
//! executor and artifact store, composed by [`Pipeline`].

pub mod allowlist;
pub mod artifacts;
pub mod executor;
pub mod git;
pub mod guard;
pub mod mirror;
pub mod pipeline;
pub mod subprocess;
pub mod worktree;

#[cfg(test)]
mod test_helpers;

pub use allowlist::{Allowlist, AllowlistEntry, AllowlistError, AllowlistRegistry, ResourceLimits};
pub use artifacts::{ArtifactError, ArtifactHandle, ArtifactMeta, ArtifactStore};
pub use executor::{ExecContext, ExecError, ExecIdentity, ExecResult, Executor};
pub use guard::{CleanOutcome, GuardError, LockedWorktree};
pub use mirror::{Mirror, MirrorError, MirrorStore, RepoGuard, PUSH_DISABLED_URL};
pub use pipeline::{JobRunner, Pipeline, PipelineDeps};
pub use worktree::{Worktree, WorktreeError, WorktreeProvisioner};
