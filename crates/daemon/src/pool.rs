// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: N tasks popping job IDs, claiming them in the ledger and
//! driving each through a [`JobRunner`] end to end.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use pinrun_core::{Clock, JobId, WorkerId};
use pinrun_engine::JobRunner;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ledger::{JobLedger, LedgerError, Transition};
use crate::queue::JobQueue;

/// Which worker holds which job. Created at startup, drained at shutdown.
#[derive(Debug, Default)]
pub struct LeaseTable {
    held: Mutex<HashMap<WorkerId, JobId>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn hold(&self, worker: &WorkerId, job_id: &JobId) {
        self.held.lock().insert(worker.clone(), job_id.clone());
    }

    fn release(&self, worker: &WorkerId) -> Option<JobId> {
        self.held.lock().remove(worker)
    }

    pub fn holder_of(&self, job_id: &JobId) -> Option<WorkerId> {
        self.held.lock().iter().find(|(_, j)| *j == job_id).map(|(w, _)| w.clone())
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the table, returning what was still held.
    pub fn drain(&self) -> Vec<(WorkerId, JobId)> {
        self.held.lock().drain().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub lease_ttl: Duration,
}

impl PoolConfig {
    fn heartbeat_interval(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(10))
    }
}

struct WorkerCtx<C: Clock, R: JobRunner> {
    ledger: Arc<JobLedger<C>>,
    queue: Arc<JobQueue>,
    runner: Arc<R>,
    leases: Arc<LeaseTable>,
    config: PoolConfig,
    cancel: CancellationToken,
}

impl<C: Clock, R: JobRunner> Clone for WorkerCtx<C, R> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            queue: Arc::clone(&self.queue),
            runner: Arc::clone(&self.runner),
            leases: Arc::clone(&self.leases),
            config: self.config,
            cancel: self.cancel.clone(),
        }
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    leases: Arc<LeaseTable>,
}

impl WorkerPool {
    pub fn start<C: Clock, R: JobRunner>(
        config: PoolConfig,
        ledger: Arc<JobLedger<C>>,
        queue: Arc<JobQueue>,
        runner: Arc<R>,
        leases: Arc<LeaseTable>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ctx = WorkerCtx {
            ledger,
            queue,
            runner,
            leases: Arc::clone(&leases),
            config,
            cancel: cancel.clone(),
        };
        let handles = (0..config.workers.max(1))
            .map(|_| {
                let ctx = ctx.clone();
                let worker = WorkerId::new();
                tokio::spawn(async move { worker_loop(ctx, worker).await })
            })
            .collect();
        tracing::info!(workers = config.workers, "worker pool started");
        Self { handles, cancel, leases }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    pub fn leases(&self) -> &Arc<LeaseTable> {
        &self.leases
    }

    /// Stop dequeuing, then wait up to `drain_timeout` for in-flight jobs.
    ///
    /// Workers still running after the timeout are aborted; their jobs stay
    /// `running` in the ledger and are recovered on the next start.
    pub async fn shutdown(self, drain_timeout: Duration) {
        self.cancel.cancel();
        let in_flight = self.leases.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "waiting for in-flight jobs");
        }

        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        let joined = tokio::time::timeout(drain_timeout, futures_util::future::join_all(self.handles)).await;
        if joined.is_err() {
            tracing::warn!(timeout_ms = drain_timeout.as_millis() as u64, "drain timed out, aborting workers");
            for abort in aborts {
                abort.abort();
            }
        }

        for (worker, job_id) in self.leases.drain() {
            tracing::warn!(%worker, %job_id, "job left running at shutdown");
        }
    }
}

async fn worker_loop<C: Clock, R: JobRunner>(ctx: WorkerCtx<C, R>, worker: WorkerId) {
    tracing::debug!(%worker, "worker started");
    while let Some(job_id) = ctx.queue.pop(&ctx.cancel).await {
        process(&ctx, &worker, job_id).await;
    }
    tracing::debug!(%worker, "worker stopped");
}

async fn process<C: Clock, R: JobRunner>(ctx: &WorkerCtx<C, R>, worker: &WorkerId, job_id: JobId) {
    let claim = Transition::Claim { worker: worker.clone(), lease_ttl: ctx.config.lease_ttl };
    let job = match ctx.ledger.transition(&job_id, claim) {
        Ok(job) => job,
        Err(e @ (LedgerError::Conflict { .. } | LedgerError::NotFound(_))) => {
            tracing::debug!(%worker, %job_id, error = %e, "skipping job");
            return;
        }
        Err(e) => {
            tracing::error!(%worker, %job_id, error = %e, "claim failed");
            ctx.queue.push(job_id);
            return;
        }
    };
    ctx.leases.hold(worker, &job.id);
    tracing::info!(%worker, job_id = %job.id, attempt = job.attempts, job_type = %job.job_type, "job started");

    // Not tied to the pool token: in-flight jobs keep their lease while draining
    let stop_heartbeat = CancellationToken::new();
    let _stop_on_abort = stop_heartbeat.clone().drop_guard();
    let heartbeat = tokio::spawn(heartbeat_loop(
        Arc::clone(&ctx.ledger),
        worker.clone(),
        job.id.clone(),
        ctx.config,
        stop_heartbeat.clone(),
    ));

    let ran = AssertUnwindSafe(ctx.runner.run(&job)).catch_unwind().await;

    stop_heartbeat.cancel();
    let _ = heartbeat.await;
    ctx.leases.release(worker);

    let outcome = match ran {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::error!(%worker, job_id = %job.id, "pipeline panicked, leaving lease to expire");
            return;
        }
    };

    let finish = Transition::Finish { worker: worker.clone(), outcome };
    match ctx.ledger.transition(&job.id, finish) {
        Ok(done) => tracing::info!(
            %worker,
            job_id = %done.id,
            status = %done.status,
            elapsed_ms = done.duration_ms().unwrap_or(0),
            "job finished"
        ),
        Err(e) if e.is_conflict() => {
            tracing::warn!(%worker, job_id = %job.id, error = %e, "lost lease before finishing, result discarded")
        }
        Err(e) => tracing::error!(%worker, job_id = %job.id, error = %e, "failed to record outcome"),
    }
}

async fn heartbeat_loop<C: Clock>(
    ledger: Arc<JobLedger<C>>,
    worker: WorkerId,
    job_id: JobId,
    config: PoolConfig,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval());
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let beat = Transition::Heartbeat { worker: worker.clone(), lease_ttl: config.lease_ttl };
        match ledger.transition(&job_id, beat) {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                tracing::warn!(%worker, %job_id, error = %e, "lease lost");
                return;
            }
            Err(e) => tracing::warn!(%worker, %job_id, error = %e, "heartbeat failed"),
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
