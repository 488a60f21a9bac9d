// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health command handler

use anyhow::Result;

use crate::client::DaemonClient;
use crate::color;
use crate::exit_error::ExitError;
use crate::output::{format_elapsed, format_or_json, OutputFormat};

pub async fn handle(format: OutputFormat) -> Result<()> {
    let client = DaemonClient::connect().map_err(ExitError::from)?;
    let health = client.health().await.map_err(ExitError::from)?;

    format_or_json(format, &health, || {
        let state = if health.ok { "ok" } else { "degraded" };
        println!("{} {}", color::header("Daemon:"), state);
        println!("  {} {}", color::context("Uptime:"), format_elapsed(health.uptime_secs));
        println!("  {} {}", color::context("Workers:"), health.workers);
        println!("  {} {}", color::context("Queued:"), health.queued);
        println!("  {} {}", color::context("Running:"), health.running);
    })
}
