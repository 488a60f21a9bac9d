// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pinrun allowlist` - Offline allowlist validation

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use pinrun_engine::{Allowlist, AllowlistEntry};
use serde::Serialize;

use crate::color;
use crate::exit_error::{ExitError, EXIT_INVALID};
use crate::output::{handle_list, write_table, OutputFormat};

#[derive(Args)]
pub struct AllowlistArgs {
    #[command(subcommand)]
    pub command: AllowlistCommand,
}

#[derive(Subcommand)]
pub enum AllowlistCommand {
    /// Validate an allowlist file (.toml or .hcl) without a daemon
    Check {
        /// Path to the allowlist file
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct EntryView {
    job_type: String,
    command: Vec<String>,
    timeout_s: u64,
    max_output_bytes: u64,
    limited: bool,
}

impl From<&AllowlistEntry> for EntryView {
    fn from(entry: &AllowlistEntry) -> Self {
        Self {
            job_type: entry.job_type.clone(),
            command: entry.command_line(),
            timeout_s: entry.timeout.as_secs(),
            max_output_bytes: entry.max_output_bytes,
            limited: entry.limits.is_some(),
        }
    }
}

pub fn handle(args: AllowlistArgs, format: OutputFormat) -> Result<()> {
    match args.command {
        AllowlistCommand::Check { file } => check(&file, format),
    }
}

fn check(file: &std::path::Path, format: OutputFormat) -> Result<()> {
    let entries = load_entries(file)?;
    handle_list(format, &entries, "Allowlist is valid but defines no job types", |items, out| {
        let rows: Vec<Vec<String>> = items
            .iter()
            .map(|e| {
                vec![
                    e.job_type.clone(),
                    format!("{}s", e.timeout_s),
                    e.max_output_bytes.to_string(),
                    if e.limited { "yes".into() } else { color::muted("no") },
                    e.command.join(" "),
                ]
            })
            .collect();
        write_table(out, &["JOB TYPE", "TIMEOUT", "MAX OUTPUT", "LIMITS", "COMMAND"], &rows);
    })
}

pub(crate) fn load_entries(file: &std::path::Path) -> Result<Vec<EntryView>> {
    let allowlist = Allowlist::load(file)
        .map_err(|e| ExitError::new(EXIT_INVALID, format!("{}: {}", file.display(), e)))?;
    let mut entries = Vec::with_capacity(allowlist.len());
    for job_type in allowlist.job_types() {
        let entry = allowlist
            .resolve(job_type)
            .map_err(|e| ExitError::new(EXIT_INVALID, e.to_string()))?;
        entries.push(EntryView::from(entry.as_ref()));
    }
    Ok(entries)
}

#[cfg(test)]
#[path = "allowlist_tests.rs"]
mod tests;
