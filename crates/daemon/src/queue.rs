// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded in-memory index of queued job IDs.
//!
//! The ledger is the durable store; this queue only orders work for the pool
//! and is rebuilt from the ledger's `queued` rows at startup.

use std::collections::VecDeque;

use parking_lot::Mutex;
use pinrun_core::JobId;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct QueueState {
    ids: VecDeque<JobId>,
    /// Slots held by in-progress submissions
    reserved: usize,
}

#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    notify: Notify,
}

/// A held queue slot. Dropping it without [`Reservation::commit`] frees the slot.
#[must_use = "a reservation holds a queue slot until committed or dropped"]
pub struct Reservation<'a> {
    queue: &'a JobQueue,
    held: bool,
}

impl Reservation<'_> {
    /// Enqueue `id` in the reserved slot.
    pub fn commit(mut self, id: JobId) {
        self.held = false;
        {
            let mut state = self.queue.state.lock();
            state.reserved = state.reserved.saturating_sub(1);
            state.ids.push_back(id);
        }
        self.queue.notify.notify_one();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut state = self.queue.state.lock();
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self { state: Mutex::new(QueueState::default()), capacity: capacity.max(1), notify: Notify::new() }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take a slot for a submission, or `None` when the queue is full.
    pub fn reserve(&self) -> Option<Reservation<'_>> {
        let mut state = self.state.lock();
        if state.ids.len() + state.reserved >= self.capacity {
            return None;
        }
        state.reserved += 1;
        Some(Reservation { queue: self, held: true })
    }

    /// Enqueue without a reservation. Requeues and startup recovery use this:
    /// those jobs were already admitted once and must not be dropped.
    pub fn push(&self, id: JobId) {
        {
            let mut state = self.state.lock();
            if state.ids.contains(&id) {
                return;
            }
            state.ids.push_back(id);
        }
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<JobId> {
        self.state.lock().ids.pop_front()
    }

    /// Wait for the next job ID. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<JobId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return None;
            }
            if let Some(id) = self.try_pop() {
                // Pass the wakeup on if more work is waiting
                if !self.is_empty() {
                    self.notify.notify_one();
                }
                return Some(id);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
