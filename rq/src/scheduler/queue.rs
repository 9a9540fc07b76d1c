//! Queue types for the scheduler

use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

use super::request::Dispatchable;

/// How a request was admitted at submit time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ScheduleResult {
    /// A slot was free; the request is running
    Dispatched,

    /// Queued behind earlier requests, 1-based position at submit time
    Queued { position: usize },
}

/// Pending requests: FIFO for first attempts, retries jump the line
#[derive(Default)]
pub(crate) struct PendingQueue {
    entries: VecDeque<Box<dyn Dispatchable>>,
}

impl PendingQueue {
    /// Append a first attempt; returns its 1-based position
    pub(crate) fn push_back(&mut self, entry: Box<dyn Dispatchable>) -> usize {
        self.entries.push_back(entry);
        self.entries.len()
    }

    /// Reinsert a retried entry ahead of everything else
    pub(crate) fn push_front(&mut self, entry: Box<dyn Dispatchable>) {
        self.entries.push_front(entry);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Box<dyn Dispatchable>> {
        self.entries.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the queue, front first
    pub(crate) fn details(&self) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .map(|entry| QueueEntry {
                request_id: entry.request_id(),
                target_id: entry.target_id().to_string(),
                attempts: entry.attempts(),
            })
            .collect()
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_attempts: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub total_rate_limited: u64,
    pub peak_queue_depth: usize,
    pub peak_concurrent: usize,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    pub in_flight: usize,
    pub queued: usize,
    pub awaiting_backoff: usize,
    pub tracked_targets: usize,
    pub rate_limited: bool,
    pub stats: SchedulerStats,
}

/// A queued request as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub request_id: Uuid,
    pub target_id: String,
    pub attempts: u32,
}
