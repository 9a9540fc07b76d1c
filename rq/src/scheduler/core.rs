//! Scheduler implementation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::SchedulerConfig;
use super::error::{BoxError, SchedulerError};
use super::gate::{AdmissionGate, RateWindow};
use super::queue::{PendingQueue, QueueEntry, QueueState, ScheduleResult, SchedulerStats};
use super::request::{AttemptOutcome, Dispatchable, PendingEntry, RequestDescriptor, ResponseHandle};
use super::retry::{RetryDecision, RetryTracker};
use super::timer::{Clock, DelayScheduler, TokioClock};

/// Internal state protected by mutex
struct SchedulerInner {
    /// Concurrency ceiling
    gate: AdmissionGate,

    /// Optional attempts-per-window limit
    rate: Option<RateWindow>,

    /// Requests waiting for a slot
    queue: PendingQueue,

    /// Attempt counters per target
    retries: RetryTracker,

    /// Entries sleeping out their backoff
    awaiting_backoff: usize,

    /// A drain is already scheduled for when the rate window reopens
    wake_scheduled: bool,

    /// Statistics
    stats: SchedulerStats,
}

/// Result of asking the gate (and rate window) for a slot
enum Admit {
    Granted,
    Full,
    RateLimited(Duration),
}

struct Shared {
    config: SchedulerConfig,
    inner: Mutex<SchedulerInner>,
    clock: Arc<dyn Clock>,
    timers: DelayScheduler,
    runtime: Handle,
}

/// Capacity held by one in-flight attempt; dropping it frees the slot and drains
struct Permit {
    shared: Arc<Shared>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// The Scheduler admits requests under a concurrency ceiling, dispatches
/// them with jitter and retries failures with exponential backoff.
///
/// Cloning is cheap; clones share one queue and one set of retry counters.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a new scheduler driven by the tokio clock
    ///
    /// Must be called from within a tokio runtime; the runtime is captured
    /// so `submit` can be used from synchronous code afterwards.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Create a new scheduler with an explicit clock
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        debug!(?config, "Scheduler::with_clock: called");
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let inner = SchedulerInner {
            gate: AdmissionGate::new(config.max_concurrent),
            rate: config
                .max_requests_per_window
                .map(|max| RateWindow::new(max, config.rate_window())),
            queue: PendingQueue::default(),
            retries: RetryTracker::new(config.max_retries, config.base_delay(), config.max_backoff()),
            awaiting_backoff: 0,
            wake_scheduled: false,
            stats: SchedulerStats::default(),
        };

        info!(
            max_concurrent = config.max_concurrent,
            max_retries = config.max_retries,
            "Scheduler created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                timers: DelayScheduler::new(Arc::clone(&clock), runtime.clone()),
                config,
                inner: Mutex::new(inner),
                clock,
                runtime,
            }),
        })
    }

    /// Submit a request; returns immediately with a handle to await
    ///
    /// Dispatches at once when nothing is queued and a slot is free,
    /// otherwise appends to the back of the queue. Malformed descriptors
    /// are rejected here and never enqueued.
    pub fn submit<T: Send + 'static>(
        &self,
        descriptor: RequestDescriptor<T>,
    ) -> Result<ResponseHandle<T>, SchedulerError> {
        debug!(target_id = %descriptor.target_id(), request_id = %descriptor.request_id(), "Scheduler::submit: called");
        descriptor.validate()?;

        let target_id = descriptor.target_id().to_string();
        let request_id = descriptor.request_id();
        let (entry, rx) = PendingEntry::new(descriptor);
        let entry: Box<dyn Dispatchable> = Box::new(entry);

        let shared = &self.shared;
        let mut inner = shared.lock();
        inner.stats.total_submitted += 1;

        let admit = if inner.queue.is_empty() {
            shared.admit(&mut inner)
        } else {
            Admit::Full
        };

        let admission = match admit {
            Admit::Granted => {
                drop(inner);
                debug!(%target_id, "Scheduler::submit: slot free, dispatching immediately");
                shared.spawn_dispatch(entry);
                ScheduleResult::Dispatched
            }
            Admit::Full => Self::enqueue(&mut inner, entry),
            Admit::RateLimited(retry_after) => {
                shared.schedule_wake(&mut inner, retry_after);
                Self::enqueue(&mut inner, entry)
            }
        };

        Ok(ResponseHandle::new(rx, target_id, request_id, admission))
    }

    /// Current attempt count for a target (0 when idle)
    pub fn retry_attempts(&self, target_id: &str) -> u32 {
        self.shared.lock().retries.attempts(target_id)
    }

    /// Get current queue state
    pub fn queue_state(&self) -> QueueState {
        debug!("Scheduler::queue_state: called");
        let now = self.shared.clock.now();
        let inner = self.shared.lock();

        QueueState {
            in_flight: inner.gate.in_flight(),
            queued: inner.queue.len(),
            awaiting_backoff: inner.awaiting_backoff,
            tracked_targets: inner.retries.tracked_targets(),
            rate_limited: inner.rate.as_ref().is_some_and(|rate| rate.is_full(now)),
            stats: Self::stats_of(&inner),
        }
    }

    /// Get queued requests, front first
    pub fn queue_details(&self) -> Vec<QueueEntry> {
        debug!("Scheduler::queue_details: called");
        self.shared.lock().queue.details()
    }

    /// Get the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        Self::stats_of(&self.shared.lock())
    }

    /// Get the configuration this scheduler was built with
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    fn enqueue(inner: &mut SchedulerInner, entry: Box<dyn Dispatchable>) -> ScheduleResult {
        let target_id = entry.target_id().to_string();
        let position = inner.queue.push_back(entry);
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());
        debug!(%target_id, position, "Scheduler::submit: queued");
        ScheduleResult::Queued { position }
    }

    fn stats_of(inner: &SchedulerInner) -> SchedulerStats {
        let mut stats = inner.stats.clone();
        stats.peak_concurrent = inner.gate.peak();
        stats
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a slot from the gate, honoring the rate window
    fn admit(&self, inner: &mut SchedulerInner) -> Admit {
        if !inner.gate.has_capacity() {
            return Admit::Full;
        }

        let now = self.clock.now();
        if let Some(rate) = inner.rate.as_mut() {
            if let Some(retry_after) = rate.check(now) {
                return Admit::RateLimited(retry_after);
            }
            rate.record(now);
        }

        if inner.gate.try_acquire() {
            Admit::Granted
        } else {
            Admit::Full
        }
    }

    /// Dispatch queued entries while slots are free
    ///
    /// Entries are popped under the lock, so concurrent drains never hand
    /// out the same entry twice.
    fn drain(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut inner = self.lock();
            while !inner.queue.is_empty() {
                match self.admit(&mut inner) {
                    Admit::Granted => {
                        if let Some(entry) = inner.queue.pop_front() {
                            ready.push(entry);
                        }
                    }
                    Admit::Full => break,
                    Admit::RateLimited(retry_after) => {
                        self.schedule_wake(&mut inner, retry_after);
                        break;
                    }
                }
            }
        }

        if !ready.is_empty() {
            debug!(count = ready.len(), "Shared::drain: dispatching from queue");
        }
        for entry in ready {
            self.spawn_dispatch(entry);
        }
    }

    /// Free a slot and pull the next entries
    fn release(self: &Arc<Self>) {
        self.lock().gate.release();
        self.drain();
    }

    /// Arrange one drain for when the rate window reopens
    fn schedule_wake(self: &Arc<Self>, inner: &mut SchedulerInner, retry_after: Duration) {
        if inner.wake_scheduled {
            return;
        }
        inner.wake_scheduled = true;
        inner.stats.total_rate_limited += 1;
        warn!(?retry_after, queued = inner.queue.len(), "Rate window full, stalling queue");

        let shared = Arc::clone(self);
        self.timers.schedule(retry_after, move || {
            shared.lock().wake_scheduled = false;
            shared.drain();
        });
    }

    /// Spawn the task for an entry whose slot was already acquired
    fn spawn_dispatch(self: &Arc<Self>, entry: Box<dyn Dispatchable>) {
        let permit = Permit {
            shared: Arc::clone(self),
        };
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            shared.dispatch(entry, permit).await;
        });
    }

    async fn dispatch(self: Arc<Self>, entry: Box<dyn Dispatchable>, permit: Permit) {
        let jitter = self.config.sample_jitter();
        debug!(target_id = %entry.target_id(), request_id = %entry.request_id(), ?jitter, "Shared::dispatch: waiting out jitter");
        self.clock.sleep(jitter).await;

        let target_id = entry.target_id().to_string();
        let started = self.clock.now();
        self.record_attempt();

        match entry.attempt().await {
            AttemptOutcome::Succeeded => self.record_success(&target_id, started),
            AttemptOutcome::Failed { entry, error } => self.handle_failure(entry, error),
        }

        drop(permit);
    }

    fn record_attempt(&self) {
        self.lock().stats.total_attempts += 1;
    }

    fn record_success(&self, target_id: &str, started: Instant) {
        let mut inner = self.lock();
        let previous = inner.retries.record_success(target_id);
        inner.stats.total_succeeded += 1;
        debug!(
            %target_id,
            previous_attempts = previous,
            elapsed = ?self.clock.now().saturating_duration_since(started),
            "Request succeeded"
        );
    }

    /// Route a failed attempt through the retry state machine
    fn handle_failure(self: &Arc<Self>, entry: Box<dyn Dispatchable>, error: BoxError) {
        let target_id = entry.target_id().to_string();
        let decision = {
            let mut inner = self.lock();
            let decision = inner.retries.record_failure(&target_id);
            match decision {
                RetryDecision::Retry { .. } => {
                    inner.stats.total_retries += 1;
                    inner.awaiting_backoff += 1;
                }
                RetryDecision::Exhausted { .. } => inner.stats.total_failed += 1,
            }
            decision
        };

        match decision {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    %target_id,
                    request_id = %entry.request_id(),
                    attempt,
                    max_retries = self.config.max_retries,
                    ?delay,
                    %error,
                    "Request failed, retrying"
                );
                let shared = Arc::clone(self);
                self.timers.schedule(delay, move || shared.requeue_front(entry));
            }
            RetryDecision::Exhausted { attempts: target_attempts } => {
                let attempts = entry.attempts();
                error!(%target_id, attempts, target_attempts, %error, "Retries exhausted");
                entry.reject(SchedulerError::RetriesExhausted {
                    target_id,
                    attempts,
                    source: error,
                });
            }
        }
    }

    /// Put a retried entry at the head of the queue and drain
    fn requeue_front(self: &Arc<Self>, entry: Box<dyn Dispatchable>) {
        debug!(target_id = %entry.target_id(), attempts = entry.attempts(), "Shared::requeue_front: called");
        {
            let mut inner = self.lock();
            inner.awaiting_backoff = inner.awaiting_backoff.saturating_sub(1);
            inner.queue.push_front(entry);
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());
        }
        self.drain();
    }
}
