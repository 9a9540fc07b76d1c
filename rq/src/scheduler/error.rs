//! Scheduler error types

use thiserror::Error;

/// Boxed error returned by request actions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid request descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("Scheduler must be created inside a tokio runtime")]
    NoRuntime,

    #[error("Retries exhausted for {target_id} after {attempts} attempts: {source}")]
    RetriesExhausted {
        target_id: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    #[error("Request for {target_id} was abandoned before it resolved")]
    Abandoned { target_id: String },
}

impl SchedulerError {
    /// Check if this is a terminal failure of the request action
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, SchedulerError::RetriesExhausted { .. })
    }

    /// Check if this is a caller or configuration mistake
    pub fn is_contract_error(&self) -> bool {
        match self {
            SchedulerError::InvalidDescriptor(_) => true,
            SchedulerError::InvalidConfig(_) => true,
            SchedulerError::NoRuntime => true,
            SchedulerError::RetriesExhausted { .. } => false,
            SchedulerError::Abandoned { .. } => false,
        }
    }

    /// Number of attempts made before the terminal failure
    pub fn attempts(&self) -> Option<u32> {
        match self {
            SchedulerError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
