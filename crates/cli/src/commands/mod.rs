// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod allowlist;
pub mod daemon;
pub mod health;
pub mod job;
