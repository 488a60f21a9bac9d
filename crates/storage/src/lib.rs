// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pinrun-storage: durable backing store for the job ledger
//!
//! Events go to a JSON-lines WAL; state is materialized by replaying them,
//! with periodic zstd snapshots bounding replay time.

mod checkpoint;
mod snapshot;
mod state;
mod wal;

pub use checkpoint::{load_snapshot, CheckpointError, Checkpointer, DEFAULT_CHECKPOINT_EVERY};
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::{MaterializedState, MirrorRecord};
pub use wal::{Wal, WalEntry, WalError};
