// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pinrun submit | show | list | logs` - Job commands

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use pinrun_core::{JobStatus, LogStream};
use pinrun_wire::{JobDetail, JobSummary};

use crate::client::{DaemonClient, SubmitArgs};
use crate::color;
use crate::exit_error::{ExitError, EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_TIMEOUT};
use crate::output::{
    format_duration_ms, format_or_json, format_time_ago, handle_list, write_table, OutputFormat,
};

/// Interval between `--wait` polls
const WAIT_POLL: Duration = Duration::from_millis(500);

#[derive(Args)]
pub struct SubmitCommand {
    /// Allowlisted job type
    pub job_type: String,
    /// Repository name (the mirror key)
    #[arg(long)]
    pub repo: String,
    /// Remote URL the mirror is cloned from
    #[arg(long)]
    pub remote: String,
    /// Full 40-hex commit SHA to run against
    #[arg(long)]
    pub sha: String,
    /// Resubmitting with the same key returns the existing job
    #[arg(long = "key")]
    pub idempotency_key: Option<String>,
    /// Block until the job reaches a terminal state
    #[arg(long)]
    pub wait: bool,
    /// Give up waiting after this long (e.g. "90s", "5m")
    #[arg(long, requires = "wait", value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

#[derive(Args)]
pub struct ShowCommand {
    /// Job ID (or unique prefix)
    pub id: String,
}

#[derive(Args)]
pub struct ListCommand {
    /// Maximum number of jobs to show (default: 20)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StreamArg {
    Stdout,
    Stderr,
}

impl From<StreamArg> for LogStream {
    fn from(arg: StreamArg) -> Self {
        match arg {
            StreamArg::Stdout => LogStream::Stdout,
            StreamArg::Stderr => LogStream::Stderr,
        }
    }
}

#[derive(Args)]
pub struct LogsCommand {
    /// Job ID (or unique prefix)
    pub id: String,
    #[arg(long, value_enum, default_value = "stdout")]
    pub stream: StreamArg,
    /// Number of trailing lines (default: 100)
    #[arg(short = 'n', long)]
    pub tail: Option<usize>,
}

/// Parse a human-readable duration string (e.g. "5m", "30s", "1h30m")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let mut total_secs: u64 = 0;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
        } else {
            let n: u64 =
                current_num.parse().map_err(|_| anyhow::anyhow!("invalid duration: {}", s))?;
            current_num.clear();
            match c {
                'h' => total_secs += n * 3600,
                'm' => total_secs += n * 60,
                's' => total_secs += n,
                _ => anyhow::bail!("unknown duration unit '{}' in: {}", c, s),
            }
        }
    }
    // Bare number → seconds
    if !current_num.is_empty() {
        let n: u64 = current_num.parse().map_err(|_| anyhow::anyhow!("invalid duration: {}", s))?;
        total_secs += n;
    }
    if total_secs == 0 {
        anyhow::bail!("duration must be > 0: {}", s);
    }
    Ok(Duration::from_secs(total_secs))
}

/// Exit status for a finished job: 0 only for `success`.
pub(crate) fn outcome_exit(job: &JobDetail) -> Result<()> {
    match job.status {
        JobStatus::Success => Ok(()),
        status => {
            let class = job.error_class.map(|c| format!(" ({})", c.as_str())).unwrap_or_default();
            Err(ExitError::new(EXIT_FAILURE, format!("job {} finished {status}{class}", job.id))
                .into())
        }
    }
}

pub async fn submit(cmd: SubmitCommand, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let wait = cmd.wait;
    let timeout = cmd.timeout;
    let submitted = client
        .submit(SubmitArgs {
            job_type: cmd.job_type,
            repo_name: cmd.repo,
            remote_url: cmd.remote,
            sha: cmd.sha,
            idempotency_key: cmd.idempotency_key,
        })
        .await
        .map_err(ExitError::from)?;

    if !wait {
        return format_or_json(format, &submitted, || {
            let note = if submitted.deduplicated { " (existing job)" } else { "" };
            println!("{} {}{}", color::header("Job:"), submitted.job_id, note);
            println!("  {} {}", color::context("Status:"), color::status(submitted.status));
            println!("  {} {}", color::context("Artifacts:"), submitted.artifact_dir.display());
        });
    }

    if format == OutputFormat::Text {
        eprintln!("submitted {}, waiting...", submitted.job_id);
    }
    let job = wait_for_terminal(client, &submitted.job_id, timeout).await?;
    format_or_json(format, &job, || print_job(&job))?;
    outcome_exit(&job)
}

/// Poll until the job is terminal.
async fn wait_for_terminal(
    client: &DaemonClient,
    id: &str,
    timeout: Option<Duration>,
) -> Result<JobDetail> {
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    loop {
        let job = client
            .get_job(id)
            .await
            .map_err(ExitError::from)?
            .ok_or_else(|| ExitError::new(EXIT_NOT_FOUND, format!("job not found: {id}")))?;
        if job.is_terminal() {
            return Ok(job);
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            return Err(ExitError::new(
                EXIT_TIMEOUT,
                format!("timed out waiting for job {id} (status {})", job.status),
            )
            .into());
        }
        tokio::time::sleep(WAIT_POLL).await;
    }
}

pub async fn show(cmd: ShowCommand, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let Some(job) = client.get_job(&cmd.id).await.map_err(ExitError::from)? else {
        return Err(ExitError::new(EXIT_NOT_FOUND, format!("job not found: {}", cmd.id)).into());
    };
    format_or_json(format, &job, || print_job(&job))
}

pub async fn list(cmd: ListCommand, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let jobs = client.list_jobs(cmd.limit).await.map_err(ExitError::from)?;
    handle_list(format, &jobs, "No jobs", |items, out| format_job_list(out, items))
}

pub async fn logs(cmd: LogsCommand, client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let stream = LogStream::from(cmd.stream);
    let content =
        client.job_logs(&cmd.id, stream, cmd.tail).await.map_err(ExitError::from)?;
    let obj = serde_json::json!({
        "id": cmd.id,
        "stream": stream.to_string(),
        "lines": content.lines().collect::<Vec<_>>(),
    });
    format_or_json(format, &obj, || {
        print!("{content}");
        if !content.is_empty() && !content.ends_with('\n') {
            println!();
        }
    })
}

pub(crate) fn format_job_list(out: &mut (impl Write + ?Sized), jobs: &[JobSummary]) {
    let rows: Vec<Vec<String>> = jobs
        .iter()
        .map(|j| {
            vec![
                j.id.short(8).to_string(),
                j.job_type.clone(),
                j.repo_name.clone(),
                pinrun_core::short(&j.sha, 12).to_string(),
                format_time_ago(j.submitted_at_ms),
                match j.error_class {
                    Some(class) => format!("{} {}", color::status(j.status), color::muted(class.as_str())),
                    None => color::status(j.status),
                },
            ]
        })
        .collect();
    write_table(out, &["ID", "TYPE", "REPO", "SHA", "SUBMITTED", "STATUS"], &rows);
}

fn print_job(job: &JobDetail) {
    println!("{} {}", color::header("Job:"), job.id);
    println!("  {} {}", color::context("Type:"), job.job_type);
    println!("  {} {} ({})", color::context("Repo:"), job.repo_name, job.remote_url);
    println!("  {} {}", color::context("SHA:"), job.sha);
    if let Some(key) = &job.idempotency_key {
        println!("  {} {}", color::context("Key:"), key);
    }
    println!("  {} {}", color::context("Status:"), color::status(job.status));
    if let Some(class) = job.error_class {
        println!("  {} {}", color::context("Class:"), class.as_str());
    }
    if let Some(code) = job.exit_code {
        println!("  {} {}", color::context("Exit code:"), code);
    }
    if job.attempts > 1 {
        println!("  {} {}", color::context("Attempts:"), job.attempts);
    }
    println!("  {} {} ago", color::context("Submitted:"), format_time_ago(job.submitted_at_ms));
    if let Some(ms) = job.duration_ms {
        println!("  {} {}", color::context("Duration:"), format_duration_ms(ms));
    }
    if let Some(worker) = &job.worker {
        println!("  {} {}", color::context("Worker:"), worker);
    }
    if let Some(dir) = &job.artifact_dir {
        println!("  {} {}", color::context("Artifacts:"), dir.display());
    }
    if job.truncated {
        println!("  {}", color::muted("output truncated at the configured cap"));
    }
    if let Some(error) = &job.error {
        println!();
        println!("  {} {}", color::context("Error:"), error);
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
