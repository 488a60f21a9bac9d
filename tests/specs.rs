// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end specs driving the `pinrun` and `pinrund` binaries.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/cli/mod.rs"]
mod cli;
#[path = "specs/daemon/mod.rs"]
mod daemon;
#[path = "specs/job/mod.rs"]
mod job;
