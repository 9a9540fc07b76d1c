//! Admission control: concurrency ceiling and sliding rate window

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Concurrency ceiling for in-flight requests
///
/// Not synchronized on its own; the scheduler keeps it behind its state lock.
#[derive(Debug)]
pub struct AdmissionGate {
    ceiling: usize,
    in_flight: usize,
    peak: usize,
}

impl AdmissionGate {
    pub fn new(ceiling: usize) -> Self {
        debug!(ceiling, "AdmissionGate::new: called");
        Self {
            ceiling,
            in_flight: 0,
            peak: 0,
        }
    }

    /// Take a slot if one is free; never waits
    pub fn try_acquire(&mut self) -> bool {
        if self.in_flight >= self.ceiling {
            debug!(in_flight = self.in_flight, ceiling = self.ceiling, "AdmissionGate::try_acquire: full");
            return false;
        }
        self.in_flight += 1;
        self.peak = self.peak.max(self.in_flight);
        true
    }

    /// Return a slot taken by `try_acquire`
    pub fn release(&mut self) {
        if self.in_flight == 0 {
            warn!("AdmissionGate::release: called with nothing in flight");
            return;
        }
        self.in_flight -= 1;
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight < self.ceiling
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn peak(&self) -> usize {
        self.peak
    }
}

/// Sliding window limiting how many attempts start per period
#[derive(Debug)]
pub struct RateWindow {
    max_requests: usize,
    window: Duration,
    started: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        debug!(max_requests, ?window, "RateWindow::new: called");
        Self {
            max_requests: max_requests as usize,
            window,
            started: VecDeque::new(),
        }
    }

    /// Time until a slot opens, or None if one is free now
    pub fn check(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.started.len() < self.max_requests {
            return None;
        }
        let oldest = self.started.front().copied()?;
        Some(self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    /// Record an attempt starting at `now`
    pub fn record(&mut self, now: Instant) {
        self.started.push_back(now);
    }

    /// Whether the window is currently full
    pub fn is_full(&self, now: Instant) -> bool {
        let live = self
            .started
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count();
        live >= self.max_requests
    }

    fn prune(&mut self, now: Instant) {
        while self
            .started
            .front()
            .map(|t| now.saturating_duration_since(*t) >= self.window)
            .unwrap_or(false)
        {
            self.started.pop_front();
        }
    }
}
