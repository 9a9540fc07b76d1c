//! Scheduler configuration

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::SchedulerError;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max concurrently executing requests
    #[serde(default = "default_max_concurrent", rename = "max-concurrent")]
    pub max_concurrent: usize,

    /// Retries allowed per target before a failure becomes terminal
    #[serde(default = "default_max_retries", rename = "max-retries")]
    pub max_retries: u32,

    /// Backoff base; retry n waits base * 2^n
    #[serde(default = "default_base_delay_ms", rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "default_max_backoff_ms", rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Lower bound (inclusive) of the pre-dispatch jitter
    #[serde(default = "default_jitter_min_ms", rename = "jitter-min-ms")]
    pub jitter_min_ms: u64,

    /// Upper bound (exclusive) of the pre-dispatch jitter
    #[serde(default = "default_jitter_max_ms", rename = "jitter-max-ms")]
    pub jitter_max_ms: u64,

    /// Max attempts per rate window; unset disables rate limiting
    #[serde(default, rename = "max-requests-per-window")]
    pub max_requests_per_window: Option<u32>,

    /// Rate limit window duration in seconds
    #[serde(default = "default_rate_window_secs", rename = "rate-window-secs")]
    pub rate_window_secs: u64,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_jitter_min_ms() -> u64 {
    100
}

fn default_jitter_max_ms() -> u64 {
    500
}

fn default_rate_window_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
            max_requests_per_window: None,
            rate_window_secs: default_rate_window_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations the scheduler cannot honor
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_concurrent == 0 {
            return Err(SchedulerError::InvalidConfig("max-concurrent must be at least 1".to_string()));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "jitter-min-ms ({}) exceeds jitter-max-ms ({})",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        if let Some(max) = self.max_requests_per_window {
            if max == 0 {
                return Err(SchedulerError::InvalidConfig(
                    "max-requests-per-window must be at least 1 when set".to_string(),
                ));
            }
            if self.rate_window_secs == 0 {
                return Err(SchedulerError::InvalidConfig(
                    "rate-window-secs must be at least 1 when rate limiting is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Get the backoff base as a Duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Get the backoff cap as a Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Get the rate window as a Duration
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    /// Draw a dispatch jitter uniformly from [jitter_min, jitter_max)
    pub fn sample_jitter(&self) -> Duration {
        if self.jitter_max_ms <= self.jitter_min_ms {
            return Duration::from_millis(self.jitter_min_ms);
        }
        let ms = rand::rng().random_range(self.jitter_min_ms..self.jitter_max_ms);
        Duration::from_millis(ms)
    }
}
