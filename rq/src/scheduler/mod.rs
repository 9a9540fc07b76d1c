//! Request scheduler
//!
//! Admits outbound requests under a concurrency ceiling, dispatches them
//! after a random jitter, and retries failures with exponential backoff
//! keyed by target id.

mod config;
mod core;
mod error;
mod gate;
mod queue;
mod request;
mod retry;
mod timer;

pub use config::SchedulerConfig;
pub use self::core::Scheduler;
pub use error::{BoxError, SchedulerError};
pub use gate::{AdmissionGate, RateWindow};
pub use queue::{QueueEntry, QueueState, ScheduleResult, SchedulerStats};
pub use request::{RequestDescriptor, ResponseHandle};
pub use retry::{RetryDecision, RetryTracker, backoff_delay};
pub use timer::{Clock, DelayScheduler, ManualClock, TokioClock};
