// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pinrun daemon` - Daemon management commands

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::client::DaemonClient;
use crate::exit_error::{ExitError, EXIT_FAILURE, EXIT_UNAVAILABLE};
use crate::output::{format_or_json, OutputFormat};

/// How long `stop` waits for the socket to disappear
const STOP_WAIT: Duration = Duration::from_secs(60);

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    pub command: DaemonCommand,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon in the background
    Start {
        /// Run in the foreground, logging to stderr
        #[arg(long)]
        foreground: bool,
    },
    /// Drain in-flight jobs and stop the daemon
    Stop,
    /// Print the running daemon's version
    Version,
}

pub async fn daemon(args: DaemonArgs, format: OutputFormat) -> Result<()> {
    match args.command {
        DaemonCommand::Start { foreground } => start(foreground).await,
        DaemonCommand::Stop => stop().await,
        DaemonCommand::Version => version(format).await,
    }
}

async fn version(format: OutputFormat) -> Result<()> {
    let client = DaemonClient::connect().map_err(ExitError::from)?;
    let version = client.hello().await.map_err(ExitError::from)?;
    let obj = serde_json::json!({ "version": version });
    format_or_json(format, &obj, || println!("pinrund {}", version))
}

async fn start(foreground: bool) -> Result<()> {
    let pinrund = find_pinrund_binary()?;
    if foreground {
        let status = Command::new(&pinrund).arg("--foreground").status()?;
        if !status.success() {
            return Err(anyhow!("Daemon exited with status: {}", status));
        }
        return Ok(());
    }

    if let Ok(client) = DaemonClient::connect() {
        if client.ping().await.is_ok() {
            println!("Daemon already running");
            return Ok(());
        }
    }

    let mut child = Command::new(&pinrund)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("failed to launch {}: {}", pinrund.display(), e))?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("daemon stdout unavailable"))?;
    let ready = tokio::task::spawn_blocking(move || wait_for_ready(BufReader::new(stdout))).await?;
    if ready {
        println!("Daemon started (pid {})", child.id());
        return Ok(());
    }

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = std::io::Read::read_to_string(&mut pipe, &mut stderr);
    }
    let _ = child.wait();
    let detail = stderr.lines().last().unwrap_or("exited before becoming ready");
    Err(ExitError::new(EXIT_UNAVAILABLE, format!("daemon failed to start: {detail}")).into())
}

/// True once the daemon prints `READY`; false if its stdout closes first.
pub(crate) fn wait_for_ready(reader: impl BufRead) -> bool {
    reader.lines().map_while(Result::ok).any(|line| line.trim() == "READY")
}

async fn stop() -> Result<()> {
    let client = match DaemonClient::connect() {
        Ok(client) => client,
        Err(e) if e.is_not_running() => {
            println!("Daemon not running");
            return Ok(());
        }
        Err(e) => return Err(ExitError::from(e).into()),
    };
    match client.shutdown().await {
        Ok(()) => {}
        Err(e) if e.is_not_running() => {
            println!("Daemon not running");
            return Ok(());
        }
        Err(e) => return Err(ExitError::from(e).into()),
    }

    if wait_for_removal(client.socket_path(), STOP_WAIT).await {
        println!("Daemon stopped");
        Ok(())
    } else {
        Err(ExitError::new(EXIT_FAILURE, "daemon is still draining; check daemon.log").into())
    }
}

async fn wait_for_removal(path: &Path, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    !path.exists()
}

/// `pinrund` next to the running executable, else from `PATH`.
fn find_pinrund_binary() -> Result<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(sibling) = exe.parent().map(|dir| dir.join("pinrund")) {
            if sibling.exists() {
                return Ok(sibling);
            }
        }
    }
    Ok(PathBuf::from("pinrund"))
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
