// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pinrun-core: shared types for the pinrun job sandbox

pub mod macros;

pub mod clock;
pub mod event;
pub mod id;
pub mod job;
pub mod validate;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use event::Event;
pub use id::short;
#[cfg(any(test, feature = "test-support"))]
pub use job::JobBuilder;
pub use job::{
    ErrorClass, Job, JobId, JobOutcome, JobRequest, JobStatus, Lease, LogStream, WorkerId,
    DEFAULT_TAIL_LINES, MAX_DIAGNOSTIC_BYTES, MAX_TAIL_LINES,
};
pub use validate::ValidationError;
