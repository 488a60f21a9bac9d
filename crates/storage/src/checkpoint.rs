// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpointing: snapshot the state, then drop the WAL prefix it covers

use crate::snapshot::{Snapshot, SnapshotError};
use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Appended events between automatic checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: u64 = 1000;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Wal(#[from] WalError),
}

pub struct Checkpointer {
    snapshot_path: PathBuf,
    every: u64,
    last_seq: u64,
}

impl Checkpointer {
    /// `last_seq` is the sequence of the snapshot loaded at startup (0 if none).
    pub fn new(snapshot_path: impl Into<PathBuf>, every: u64, last_seq: u64) -> Self {
        Self { snapshot_path: snapshot_path.into(), every: every.max(1), last_seq }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Whether enough events have been written since the last checkpoint.
    pub fn is_due(&self, write_seq: u64) -> bool {
        write_seq.saturating_sub(self.last_seq) >= self.every
    }

    /// Write a snapshot at the WAL's current sequence and truncate the WAL
    /// up to it. The WAL must be flushed so `state` reflects `write_seq`.
    pub fn checkpoint(
        &mut self,
        wal: &mut Wal,
        state: &MaterializedState,
    ) -> Result<u64, CheckpointError> {
        wal.flush()?;
        let seq = wal.write_seq();
        Snapshot::new(seq, state.clone()).save(&self.snapshot_path)?;
        wal.truncate_before(seq + 1)?;
        self.last_seq = seq;
        tracing::info!(seq, path = %self.snapshot_path.display(), "checkpoint written");
        Ok(seq)
    }
}

/// Rebuild state from the snapshot (if any) plus the WAL tail.
///
/// Returns the state and the snapshot sequence to reopen the WAL with.
pub fn load_snapshot(
    snapshot_path: &Path,
    wal_path: &Path,
) -> Result<(MaterializedState, u64, Wal), CheckpointError> {
    let (mut state, snapshot_seq) = match Snapshot::load(snapshot_path)? {
        Some(snapshot) => (snapshot.state, snapshot.seq),
        None => (MaterializedState::default(), 0),
    };

    let wal = Wal::open(wal_path, snapshot_seq)?;
    let entries = wal.entries_after(snapshot_seq)?;
    let replayed = entries.len();
    for entry in &entries {
        state.apply_event(&entry.event);
    }
    tracing::info!(snapshot_seq, replayed, write_seq = wal.write_seq(), "ledger state restored");
    Ok((state, snapshot_seq, wal))
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
