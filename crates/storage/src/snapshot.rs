// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned, zstd-compressed state snapshots

use crate::state::MaterializedState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Snapshot format version written by this build.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {found} is newer than supported version {supported}")]
    TooNew { found: u32, supported: u32 },
}

/// Full materialized state as of WAL sequence `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub v: u32,
    pub seq: u64,
    pub state: MaterializedState,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(seq: u64, state: MaterializedState) -> Self {
        Self { v: CURRENT_SNAPSHOT_VERSION, seq, state, created_at: Utc::now() }
    }

    /// Compress and write atomically (temp file, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let io_err = |source| SnapshotError::Io { path: path.to_path_buf(), source };
        let json = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL).map_err(io_err)?;

        let tmp = path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&compressed).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Load a snapshot; `Ok(None)` when no file exists.
    ///
    /// Plain JSON is accepted as well as zstd frames.
    pub fn load(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let io_err = |source| SnapshotError::Io { path: path.to_path_buf(), source };
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        let json = if bytes.starts_with(&ZSTD_MAGIC) {
            zstd::decode_all(bytes.as_slice()).map_err(io_err)?
        } else {
            bytes
        };

        let value: serde_json::Value = serde_json::from_slice(&json)?;
        let found = value.get("v").and_then(serde_json::Value::as_u64).unwrap_or(0) as u32;
        if found > CURRENT_SNAPSHOT_VERSION {
            return Err(SnapshotError::TooNew { found, supported: CURRENT_SNAPSHOT_VERSION });
        }

        let mut snapshot: Snapshot = serde_json::from_value(value)?;
        snapshot.state.rebuild_indexes();
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
