// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pinrun daemon library
//!
//! The job ledger, bounded queue, worker pool, reaper, and the socket
//! listener that fronts them. The `pinrund` binary wires these together.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;
pub mod ledger;
pub mod lifecycle;
pub mod listener;
pub mod pool;
pub mod queue;
pub mod reaper;
pub mod service;

#[cfg(test)]
mod test_helpers;

pub use ledger::{JobLedger, LedgerError, Transition};
pub use lifecycle::{startup, Config, DaemonState, LifecycleError, StartupResult};
pub use pool::{LeaseTable, PoolConfig, WorkerPool};
pub use queue::JobQueue;
pub use reaper::{ReapReport, Reaper, RecoveryReport};
pub use service::{JobService, SubmitError};
