// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pinrund: the pinrun job daemon

use std::sync::Arc;

use pinrun_daemon::lifecycle::{self, Config, LifecycleError, StartupResult};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const USAGE: &str = "usage: pinrund [--foreground]";

fn main() -> std::process::ExitCode {
    let mut foreground = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--foreground" | "-f" => foreground = true,
            "--version" | "-V" => {
                println!("pinrund {}", pinrun_daemon::env::PROTOCOL_VERSION);
                return std::process::ExitCode::SUCCESS;
            }
            _ => {
                eprintln!("{USAGE}");
                return std::process::ExitCode::from(2);
            }
        }
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pinrund: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(&config, foreground) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("pinrund: cannot open log at {}: {e}", config.log_path.display());
            return std::process::ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon exited with error");
            eprintln!("pinrund: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), LifecycleError> {
    let StartupResult { mut daemon, listener, pipeline, recovery } =
        lifecycle::startup(&config).await?;
    info!(
        requeued = recovery.reclaimed.requeued.len(),
        abandoned = recovery.reclaimed.abandoned.len(),
        backfilled = recovery.backfilled,
        queued = recovery.queued,
        worktrees_removed = recovery.worktrees_removed,
        "recovery complete"
    );

    daemon.spawn(listener, Arc::new(pipeline));

    // Parent processes wait for this line before connecting
    println!("READY");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let shutdown = Arc::clone(&daemon.shutdown);

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT");
                break;
            }
            _ = shutdown.notified() => {
                info!("shutdown requested over the socket");
                break;
            }
            _ = sighup.recv() => daemon.reload_allowlist(),
        }
    }

    daemon.shutdown().await
}

fn init_logging(config: &Config, foreground: bool) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.state_dir)?;
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&config.log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false).with_filter(filter());
    let stderr_layer =
        foreground.then(|| fmt::layer().with_writer(std::io::stderr).with_filter(filter()));

    tracing_subscriber::registry().with(file_layer).with(stderr_layer).init();
    Ok(guard)
}
