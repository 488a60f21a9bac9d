// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSON-lines write-ahead log
//!
//! Each line is `{"seq":N,"event":{...}}`. Sequence numbers are strictly
//! increasing and never reused, including across truncation.

use pinrun_core::Event;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of `.bak` files kept when a corrupt WAL is rotated away.
const MAX_BAK_FILES: u32 = 3;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode wal entry: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One decoded WAL line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

#[derive(Serialize)]
struct WalEntryRef<'a> {
    seq: u64,
    event: &'a Event,
}

pub struct Wal {
    path: PathBuf,
    file: File,
    write_seq: u64,
    buffer: Vec<u8>,
}

impl Wal {
    /// Open (or create) the WAL at `path`.
    ///
    /// `processed_seq` is the sequence already covered by a snapshot; new
    /// appends never reuse a number at or below it. A corrupt tail is cut
    /// off: the original file is rotated to `.bak` and the valid prefix is
    /// kept.
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        let io_err = |source| WalError::Io { path: path.to_path_buf(), source };

        let mut last_seq = 0;
        if path.exists() {
            let bytes = std::fs::read(path).map_err(io_err)?;
            let scan = scan_entries(&bytes);
            last_seq = scan.entries.last().map(|e| e.seq).unwrap_or(0);
            if scan.corrupt {
                tracing::warn!(
                    path = %path.display(),
                    valid_entries = scan.entries.len(),
                    "corrupt wal tail, rotating to .bak"
                );
                rotate_bak_files(path).map_err(io_err)?;
                std::fs::rename(path, rotate_bak_path(path, 1)).map_err(io_err)?;
                write_atomic(path, &bytes[..scan.valid_len]).map_err(io_err)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path).map_err(io_err)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            write_seq: last_seq.max(processed_seq),
            buffer: Vec::new(),
        })
    }

    /// Buffer an event; returns its sequence number. Not durable until
    /// [`Self::flush`].
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        let seq = self.write_seq + 1;
        serde_json::to_writer(&mut self.buffer, &WalEntryRef { seq, event })?;
        self.buffer.push(b'\n');
        self.write_seq = seq;
        Ok(seq)
    }

    /// Write buffered entries and fsync.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let io_err = |source| WalError::Io { path: self.path.clone(), source };
        self.file.write_all(&self.buffer).map_err(io_err)?;
        self.file.sync_data().map_err(io_err)?;
        self.buffer.clear();
        Ok(())
    }

    pub fn needs_flush(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Highest sequence number handed out so far.
    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushed entries with `seq > after`, in order. Stops at the first
    /// undecodable line.
    pub fn entries_after(&self, after: u64) -> Result<Vec<WalEntry>, WalError> {
        let bytes = std::fs::read(&self.path)
            .map_err(|source| WalError::Io { path: self.path.clone(), source })?;
        Ok(scan_entries(&bytes).entries.into_iter().filter(|e| e.seq > after).collect())
    }

    /// Drop every entry with `seq < keep_from`. Pending buffered entries are
    /// flushed first.
    pub fn truncate_before(&mut self, keep_from: u64) -> Result<(), WalError> {
        self.flush()?;
        let io_err = |source| WalError::Io { path: self.path.clone(), source };

        let bytes = std::fs::read(&self.path).map_err(io_err)?;
        let mut kept = Vec::new();
        for entry in scan_entries(&bytes).entries.into_iter().filter(|e| e.seq >= keep_from) {
            serde_json::to_writer(&mut kept, &entry)?;
            kept.push(b'\n');
        }
        write_atomic(&self.path, &kept).map_err(io_err)?;
        self.file = OpenOptions::new().append(true).open(&self.path).map_err(io_err)?;
        Ok(())
    }
}

struct Scan {
    entries: Vec<WalEntry>,
    /// Byte length of the decodable prefix
    valid_len: usize,
    corrupt: bool,
}

fn scan_entries(bytes: &[u8]) -> Scan {
    let mut entries = Vec::new();
    let mut offset = 0;
    for line in bytes.split_inclusive(|b| *b == b'\n') {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim_end(),
            Err(_) => return Scan { entries, valid_len: offset, corrupt: true },
        };
        if !text.is_empty() {
            match serde_json::from_str::<WalEntry>(text) {
                Ok(entry) => entries.push(entry),
                Err(_) => return Scan { entries, valid_len: offset, corrupt: true },
            }
        }
        offset += line.len();
    }
    Scan { entries, valid_len: offset, corrupt: false }
}

/// `ledger.wal` → `ledger.bak`, `ledger.bak.2`, `ledger.bak.3`.
fn rotate_bak_path(path: &Path, n: u32) -> PathBuf {
    if n <= 1 {
        path.with_extension("bak")
    } else {
        path.with_extension(format!("bak.{n}"))
    }
}

fn rotate_bak_files(path: &Path) -> io::Result<()> {
    let oldest = rotate_bak_path(path, MAX_BAK_FILES);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let from = rotate_bak_path(path, n);
        if from.exists() {
            std::fs::rename(&from, rotate_bak_path(path, n + 1))?;
        }
    }
    Ok(())
}

/// Write via a temp file, fsync, and rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
