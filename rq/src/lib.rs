//! reqsched - Request admission and retry scheduler
//!
//! reqsched accepts an unbounded stream of outbound requests and runs them
//! against a remote service under a hard concurrency ceiling. Each dispatch
//! waits a short random jitter first, and failures are retried with
//! exponential backoff keyed by target id.
//!
//! # Core Concepts
//!
//! - **Bounded Concurrency**: At most `max-concurrent` actions run at once
//! - **Fair Ordering**: First attempts run in submission order; retries jump the line
//! - **Shared Retry Budget**: Requests for the same target share one attempt counter
//! - **Exactly Once**: Every accepted request resolves once, with a value or a terminal error
//!
//! # Modules
//!
//! - [`scheduler`] - Admission gate, queue, retry state machine and dispatch
//! - [`fetch`] - HTTP GETs expressed as scheduler requests
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod fetch;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, HttpConfig};
pub use fetch::{FetchError, FetchResponse, HttpFetcher};
pub use scheduler::{
    BoxError, Clock, ManualClock, QueueState, RequestDescriptor, ResponseHandle, ScheduleResult, Scheduler,
    SchedulerConfig, SchedulerError, SchedulerStats, TokioClock,
};
