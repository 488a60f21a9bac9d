// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fakes shared by the daemon's unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pinrun_core::{FakeClock, Job, JobId, JobOutcome};
use pinrun_engine::{Allowlist, AllowlistRegistry, JobRunner};

use crate::ledger::JobLedger;

/// [`JobRunner`] with a scripted result.
pub struct FakeRunner {
    outcome: JobOutcome,
    delay: Duration,
    panics: bool,
    calls: Mutex<Vec<JobId>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeRunner {
    pub fn succeeding() -> Self {
        Self::returning(JobOutcome::completed(0, false))
    }

    pub fn returning(outcome: JobOutcome) -> Self {
        Self {
            outcome,
            delay: Duration::ZERO,
            panics: false,
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn panicking() -> Self {
        Self { panics: true, ..Self::succeeding() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<JobId> {
        self.calls.lock().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(&self, job: &Job) -> JobOutcome {
        self.calls.lock().push(job.id.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.panics {
            panic!("scripted runner panic");
        }
        self.outcome.clone()
    }
}

pub fn open_ledger(dir: &Path, clock: &FakeClock) -> Arc<JobLedger<FakeClock>> {
    Arc::new(
        JobLedger::open(&dir.join("ledger.wal"), &dir.join("snapshot.json"), clock.clone())
            .unwrap(),
    )
}

pub const TEST_ALLOWLIST: &str = r#"
[jobs.local_echo]
argv = ["/bin/echo", "hello"]
timeout_s = 5
max_output_bytes = 4096
"#;

pub fn test_allowlist() -> Arc<AllowlistRegistry> {
    Arc::new(AllowlistRegistry::from_allowlist(Allowlist::from_toml_str(TEST_ALLOWLIST).unwrap()))
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
