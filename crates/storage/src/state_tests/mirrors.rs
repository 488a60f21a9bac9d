// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn created(url: &str) -> Event {
    Event::MirrorCreated {
        repo_name: "demo".into(),
        remote_url: url.into(),
        path: "/m/demo.git".into(),
        created_at_ms: 100,
    }
}

#[test]
fn created_registers_mirror_once() {
    let mut state = MaterializedState::default();
    state.apply_event(&created("file:///first"));
    state.apply_event(&created("file:///second"));

    let mirror = &state.mirrors["demo"];
    assert_eq!(mirror.remote_url, "file:///first");
    assert_eq!(mirror.last_fetch_at_ms, None);
}

#[test]
fn fetched_keeps_latest_timestamp() {
    let mut state = MaterializedState::default();
    state.apply_event(&created("file:///first"));
    state.apply_event(&Event::MirrorFetched { repo_name: "demo".into(), fetched_at_ms: 500 });
    state.apply_event(&Event::MirrorFetched { repo_name: "demo".into(), fetched_at_ms: 300 });

    assert_eq!(state.mirrors["demo"].last_fetch_at_ms, Some(500));
}

#[test]
fn fetch_for_unknown_mirror_is_ignored() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::MirrorFetched { repo_name: "ghost".into(), fetched_at_ms: 1 });
    assert!(state.mirrors.is_empty());
}
