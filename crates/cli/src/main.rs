// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pinrun: submit and inspect jobs on a pinrund daemon

mod client;
mod color;
mod commands;
mod exit_error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::DaemonClient;
use crate::commands::{allowlist, daemon, health, job};
use crate::exit_error::ExitError;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "pinrun", version, styles = color::styles())]
#[command(about = "Run allowlisted commands against pinned commits")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value = "text")]
    output: OutputFormat,

    /// Shorthand for `--output json`
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.output
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job
    Submit(job::SubmitCommand),
    /// Show details of a job
    Show(job::ShowCommand),
    /// List recent jobs, newest first
    List(job::ListCommand),
    /// Print a job's captured output
    Logs(job::LogsCommand),
    /// Daemon health summary
    Health,
    /// Allowlist tools
    Allowlist(allowlist::AllowlistArgs),
    /// Daemon management
    Daemon(daemon::DaemonArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(exit) = e.downcast_ref::<ExitError>() {
            if !exit.message.is_empty() {
                eprintln!("Error: {}", exit.message);
            }
            std::process::exit(exit.code);
        }
        eprintln!("Error: {e:#}");
        std::process::exit(exit_error::EXIT_FAILURE);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format();

    let client = || DaemonClient::connect().map_err(ExitError::from);

    match cli.command {
        Commands::Submit(cmd) => job::submit(cmd, &client()?, format).await,
        Commands::Show(cmd) => job::show(cmd, &client()?, format).await,
        Commands::List(cmd) => job::list(cmd, &client()?, format).await,
        Commands::Logs(cmd) => job::logs(cmd, &client()?, format).await,
        Commands::Health => health::handle(format).await,
        Commands::Allowlist(args) => allowlist::handle(args, format),
        Commands::Daemon(args) => daemon::daemon(args, format).await,
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
