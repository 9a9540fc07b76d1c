//! Per-target retry state and exponential backoff
//!
//! Attempt counters are keyed by target id and shared by every request
//! for that target: two requests failing against the same target advance
//! the same counter. An exhausted target stays exhausted until one of its
//! requests succeeds. A counter that returns to zero is dropped from the
//! map, so the map only holds targets that have failed since their last
//! success.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

/// What to do with a request whose attempt just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue at the front after `delay`; `attempt` is the target's new count
    Retry { attempt: u32, delay: Duration },

    /// No retries left for this target
    Exhausted { attempts: u32 },
}

/// Backoff for the given 1-based retry attempt: `base * 2^attempt`, capped
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map(|delay| delay.min(cap))
        .unwrap_or(cap)
}

/// Attempt counters per target id
#[derive(Debug)]
pub struct RetryTracker {
    counts: HashMap<String, u32>,
    max_retries: u32,
    base_delay: Duration,
    max_backoff: Duration,
}

impl RetryTracker {
    pub fn new(max_retries: u32, base_delay: Duration, max_backoff: Duration) -> Self {
        debug!(max_retries, ?base_delay, ?max_backoff, "RetryTracker::new: called");
        Self {
            counts: HashMap::new(),
            max_retries,
            base_delay,
            max_backoff,
        }
    }

    /// Record a failed attempt against `target_id`
    pub fn record_failure(&mut self, target_id: &str) -> RetryDecision {
        let current = self.attempts(target_id);

        if current < self.max_retries {
            let attempt = current + 1;
            self.counts.insert(target_id.to_string(), attempt);
            let delay = backoff_delay(self.base_delay, attempt, self.max_backoff);
            debug!(%target_id, attempt, ?delay, "RetryTracker::record_failure: retrying");
            RetryDecision::Retry { attempt, delay }
        } else {
            debug!(%target_id, attempts = current, "RetryTracker::record_failure: exhausted");
            RetryDecision::Exhausted { attempts: current }
        }
    }

    /// Record a successful attempt, resetting the target to idle
    ///
    /// Returns the count the target had before the reset.
    pub fn record_success(&mut self, target_id: &str) -> u32 {
        let previous = self.counts.remove(target_id).unwrap_or(0);
        if previous > 0 {
            debug!(%target_id, previous, "RetryTracker::record_success: reset counter");
        }
        previous
    }

    /// Current attempt count for a target (0 when idle)
    pub fn attempts(&self, target_id: &str) -> u32 {
        self.counts.get(target_id).copied().unwrap_or(0)
    }

    /// Number of targets with a non-zero counter
    pub fn tracked_targets(&self) -> usize {
        self.counts.len()
    }
}
