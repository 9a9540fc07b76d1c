//! Clocks and delayed task scheduling
//!
//! Jitter and backoff waits go through a [`Clock`] so tests can drive time
//! by hand with [`ManualClock`]. [`TokioClock`] also honors tokio's paused
//! test clock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Source of time for the scheduler
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current instant
    fn now(&self) -> Instant;

    /// Wait for `duration` to elapse on this clock
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::time::sleep(duration).await;
    }
}

struct ManualState {
    now: Instant,
    sleepers: Vec<(Instant, oneshot::Sender<()>)>,
}

/// Clock that only moves when [`ManualClock::advance`] is called
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Instant::now(),
                sleepers: Vec::new(),
            }),
        }
    }

    /// Move time forward, waking every sleeper whose deadline has passed
    pub fn advance(&self, by: Duration) {
        let due = {
            let mut state = self.lock();
            state.now += by;
            let now = state.now;
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.sleepers)
                .into_iter()
                .partition(|(deadline, _)| *deadline <= now);
            state.sleepers = pending;
            due
        };

        debug!(?by, woken = due.len(), "ManualClock::advance: called");
        for (_, tx) in due {
            let _ = tx.send(());
        }
    }

    /// Number of sleeps waiting for time to advance
    pub fn pending_sleepers(&self) -> usize {
        self.lock().sleepers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let rx = {
            let mut state = self.lock();
            let deadline = state.now + duration;
            let (tx, rx) = oneshot::channel();
            state.sleepers.push((deadline, tx));
            rx
        };
        let _ = rx.await;
    }
}

/// Runs closures after a delay measured on a [`Clock`]
#[derive(Clone)]
pub struct DelayScheduler {
    clock: Arc<dyn Clock>,
    runtime: Handle,
}

impl DelayScheduler {
    pub fn new(clock: Arc<dyn Clock>, runtime: Handle) -> Self {
        Self { clock, runtime }
    }

    /// Run `task` once `delay` has elapsed; returns immediately
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        debug!(?delay, "DelayScheduler::schedule: called");
        let clock = Arc::clone(&self.clock);
        self.runtime.spawn(async move {
            clock.sleep(delay).await;
            task();
        });
    }
}
