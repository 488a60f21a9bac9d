// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness: an isolated state directory, an upstream git repository,
//! and builders for running the binaries against them.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Upper bound for any single wait in a spec
pub const SPEC_WAIT_MAX_MS: u64 = 15_000;

/// Allowlist shared by the job specs.
pub const SPEC_ALLOWLIST: &str = r#"
[jobs.echo]
argv = ["/bin/sh", "-c", "echo hello from $PINRUN_SHA; echo to-stderr >&2"]
timeout_s = 30
max_output_bytes = 65536

[jobs.fail]
argv = ["/bin/sh", "-c", "echo failing; exit 3"]
timeout_s = 30
max_output_bytes = 65536

[jobs.tamper]
argv = ["/bin/sh", "-c", "chmod u+w README.md && echo tampered >> README.md"]
timeout_s = 30
max_output_bytes = 65536

[jobs.hang]
argv = ["/bin/sh", "-c", "sleep 30"]
timeout_s = 1
max_output_bytes = 65536

[jobs.slow]
argv = ["/bin/sh", "-c", "sleep 4; echo finished"]
timeout_s = 30
max_output_bytes = 65536
"#;

/// Poll `check` every 50ms until it holds or `max_ms` passes.
pub fn wait_for(max_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(max_ms);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

/// `pinrun` with no daemon state behind it.
pub fn cli() -> CliBuilder {
    CliBuilder::new(None)
}

pub struct CliBuilder {
    cmd: std::process::Command,
}

impl CliBuilder {
    fn new(project: Option<&Project>) -> Self {
        let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("pinrun"));
        cmd.env("NO_COLOR", "1").env_remove("COLOR").env_remove("RUST_LOG");
        for var in [
            "PINRUN_STATE_DIR",
            "PINRUN_ALLOWLIST",
            "PINRUN_EXEC_UID",
            "PINRUN_EXEC_GID",
            "PINRUN_EXEC_SHARED_IDENTITY",
        ] {
            cmd.env_remove(var);
        }
        match project {
            Some(project) => {
                cmd.env("PINRUN_STATE_DIR", project.state_dir())
                    .env("PINRUN_ALLOWLIST", project.allowlist_path())
                    .env("PINRUN_EXEC_UID", nix::unistd::geteuid().as_raw().to_string())
                    .env("PINRUN_EXEC_GID", nix::unistd::getegid().as_raw().to_string())
                    .env("PINRUN_EXEC_SHARED_IDENTITY", "1")
                    .env("PINRUN_WORKERS", "2")
                    .env("PINRUN_LEASE_TTL_MS", "3000")
                    .env("PINRUN_REAPER_INTERVAL_MS", "200")
                    .env("PINRUN_DRAIN_TIMEOUT_MS", "10000");
            }
            None => {
                cmd.env("PINRUN_STATE_DIR", "/nonexistent/pinrun-spec-state");
            }
        }
        Self { cmd }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.cmd.args(args);
        self
    }

    fn run(mut self) -> RunAssert {
        let output = self.cmd.output().unwrap();
        RunAssert { output }
    }

    /// Run and require exit status 0.
    pub fn passes(self) -> RunAssert {
        let run = self.run();
        assert!(
            run.output.status.success(),
            "expected success, got {:?}\nstdout:\n{}\nstderr:\n{}",
            run.output.status.code(),
            run.stdout(),
            run.stderr()
        );
        run
    }

    /// Run and require a specific non-zero exit code.
    pub fn exits_with(self, code: i32) -> RunAssert {
        let run = self.run();
        assert_eq!(
            run.output.status.code(),
            Some(code),
            "unexpected exit\nstdout:\n{}\nstderr:\n{}",
            run.stdout(),
            run.stderr()
        );
        run
    }
}

pub struct RunAssert {
    output: Output,
}

impl RunAssert {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).to_string()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).to_string()
    }

    pub fn stdout_has(self, needle: &str) -> Self {
        let stdout = self.stdout();
        assert!(stdout.contains(needle), "stdout missing {needle:?}:\n{stdout}");
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        let stderr = self.stderr();
        assert!(stderr.contains(needle), "stderr missing {needle:?}:\n{stderr}");
        self
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.output.stdout).unwrap()
    }
}

/// An isolated daemon environment: state dir, allowlist and upstream repo.
pub struct Project {
    dir: TempDir,
}

impl Project {
    /// Fresh project with [`SPEC_ALLOWLIST`] and a one-commit upstream.
    pub fn empty() -> Self {
        let project = Self { dir: tempfile::tempdir().unwrap() };
        project.allowlist(SPEC_ALLOWLIST);
        std::fs::create_dir_all(project.upstream_path()).unwrap();
        project.git(&["init", "--quiet"]);
        project.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        project.commit("README.md", "# spec repo\n");
        project
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path().join("state")
    }

    pub fn allowlist_path(&self) -> PathBuf {
        self.path().join("allowlist.toml")
    }

    pub fn allowlist(&self, content: &str) {
        std::fs::write(self.allowlist_path(), content).unwrap();
    }

    fn upstream_path(&self) -> PathBuf {
        self.path().join("upstream")
    }

    pub fn remote_url(&self) -> String {
        format!("file://{}", self.upstream_path().display())
    }

    fn git(&self, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(self.upstream_path())
            .args(["-c", "user.name=pinrun-spec", "-c", "user.email=spec@pinrun.invalid"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .output()
            .unwrap();
        assert!(output.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// Commit one file upstream; returns the new HEAD sha.
    pub fn commit(&self, name: &str, content: &str) -> String {
        std::fs::write(self.upstream_path().join(name), content).unwrap();
        self.git(&["add", name]);
        self.git(&["commit", "--quiet", "-m", &format!("add {name}")]);
        self.head()
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn pinrun(&self) -> CliBuilder {
        CliBuilder::new(Some(self))
    }

    /// `pinrun submit <job_type>` against the upstream at `sha`.
    pub fn submit(&self, job_type: &str, sha: &str) -> CliBuilder {
        let remote = self.remote_url();
        self.pinrun().args(&["submit", job_type, "--repo", "spec", "--remote", &remote, "--sha", sha])
    }

    pub fn daemon_log(&self) -> String {
        std::fs::read_to_string(self.state_dir().join("daemon.log")).unwrap_or_default()
    }

    fn daemon_pid(&self) -> Option<i32> {
        std::fs::read_to_string(self.state_dir().join("daemon.pid")).ok()?.trim().parse().ok()
    }

    /// SIGKILL the daemon, skipping graceful shutdown.
    pub fn daemon_kill(&self) -> bool {
        let Some(pid) = self.daemon_pid() else {
            return false;
        };
        let pid = nix::unistd::Pid::from_raw(pid);
        if nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).is_err() {
            return false;
        }
        wait_for(SPEC_WAIT_MAX_MS, || nix::sys::signal::kill(pid, None).is_err())
    }

    /// Job id printed by a JSON `submit`.
    pub fn submitted_id(run: &RunAssert) -> String {
        run.json()["job_id"].as_str().unwrap().to_string()
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        if self.state_dir().join("daemon.sock").exists() {
            let _ = self.pinrun().args(&["daemon", "stop"]).cmd.output();
        }
        if let Some(pid) = self.daemon_pid() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
        // Worktrees and artifacts are sealed read-only; restore write so TempDir can clean up
        let _ = std::process::Command::new("chmod").args(["-R", "u+w"]).arg(self.path()).status();
    }
}
