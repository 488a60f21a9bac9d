// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use pinrun_core::Event;

use super::{MaterializedState, MirrorRecord};

pub(crate) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        // The remote URL binding of a repo name is fixed at creation
        Event::MirrorCreated { repo_name, remote_url, path, created_at_ms } => {
            state.mirrors.entry(repo_name.clone()).or_insert_with(|| MirrorRecord {
                remote_url: remote_url.clone(),
                path: path.clone(),
                created_at_ms: *created_at_ms,
                last_fetch_at_ms: None,
            });
        }

        Event::MirrorFetched { repo_name, fetched_at_ms } => {
            if let Some(mirror) = state.mirrors.get_mut(repo_name) {
                mirror.last_fetch_at_ms =
                    Some(mirror.last_fetch_at_ms.unwrap_or(0).max(*fetched_at_ms));
            }
        }

        _ => {}
    }
}
