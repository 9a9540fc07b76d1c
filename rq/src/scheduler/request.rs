//! Request descriptors, pending entries and response handles

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use super::error::{BoxError, SchedulerError};
use super::queue::ScheduleResult;

type Action<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// A unit of work: a target id plus an action that can be re-run on retry
pub struct RequestDescriptor<T> {
    target_id: String,
    request_id: Uuid,
    action: Action<T>,
}

impl<T: Send + 'static> RequestDescriptor<T> {
    /// Create a descriptor; `action` is invoked once per attempt
    pub fn new<F, Fut, E>(target_id: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let action: Action<T> = Arc::new(move || -> BoxFuture<'static, Result<T, BoxError>> {
            let attempt = action();
            Box::pin(async move { attempt.await.map_err(Into::into) })
        });

        Self {
            target_id: target_id.into(),
            request_id: Uuid::now_v7(),
            action,
        }
    }
}

impl<T> RequestDescriptor<T> {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Fail fast on descriptors the scheduler must not accept
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.target_id.trim().is_empty() {
            return Err(SchedulerError::InvalidDescriptor("target id is empty".to_string()));
        }
        Ok(())
    }
}

impl<T> fmt::Debug for RequestDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("target_id", &self.target_id)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Outcome of running one attempt of a pending entry
pub(crate) enum AttemptOutcome {
    /// The caller has been handed the value
    Succeeded,

    /// The action failed; the entry comes back for a retry decision
    Failed {
        entry: Box<dyn Dispatchable>,
        error: BoxError,
    },
}

/// A queued request with its result type erased
pub(crate) trait Dispatchable: Send + 'static {
    fn target_id(&self) -> &str;

    fn request_id(&self) -> Uuid;

    /// Attempts this request has made so far
    fn attempts(&self) -> u32;

    /// Run the action once
    fn attempt(self: Box<Self>) -> BoxFuture<'static, AttemptOutcome>;

    /// Resolve the caller with a terminal error
    fn reject(self: Box<Self>, error: SchedulerError);
}

/// A descriptor plus the channel its caller is waiting on
pub(crate) struct PendingEntry<T> {
    descriptor: RequestDescriptor<T>,
    reply: oneshot::Sender<Result<T, SchedulerError>>,
    attempts: u32,
}

impl<T: Send + 'static> PendingEntry<T> {
    pub(crate) fn new(descriptor: RequestDescriptor<T>) -> (Self, oneshot::Receiver<Result<T, SchedulerError>>) {
        let (reply, rx) = oneshot::channel();
        let entry = Self {
            descriptor,
            reply,
            attempts: 0,
        };
        (entry, rx)
    }
}

impl<T: Send + 'static> Dispatchable for PendingEntry<T> {
    fn target_id(&self) -> &str {
        &self.descriptor.target_id
    }

    fn request_id(&self) -> Uuid {
        self.descriptor.request_id
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn attempt(mut self: Box<Self>) -> BoxFuture<'static, AttemptOutcome> {
        self.attempts += 1;
        let running = (self.descriptor.action)();

        Box::pin(async move {
            match running.await {
                Ok(value) => {
                    let entry = *self;
                    if entry.reply.send(Ok(value)).is_err() {
                        debug!(target_id = %entry.descriptor.target_id, "PendingEntry::attempt: caller dropped handle");
                    }
                    AttemptOutcome::Succeeded
                }
                Err(error) => AttemptOutcome::Failed { entry: self, error },
            }
        })
    }

    fn reject(self: Box<Self>, error: SchedulerError) {
        let entry = *self;
        if entry.reply.send(Err(error)).is_err() {
            debug!(target_id = %entry.descriptor.target_id, "PendingEntry::reject: caller dropped handle");
        }
    }
}

/// Future resolving to the outcome of a submitted request
///
/// Resolves exactly once. If the scheduler loses the request (the runtime
/// shut down or the action panicked) it resolves to
/// [`SchedulerError::Abandoned`].
#[must_use = "a response handle does nothing unless awaited"]
pub struct ResponseHandle<T> {
    rx: oneshot::Receiver<Result<T, SchedulerError>>,
    target_id: String,
    request_id: Uuid,
    admission: ScheduleResult,
}

impl<T> ResponseHandle<T> {
    pub(crate) fn new(
        rx: oneshot::Receiver<Result<T, SchedulerError>>,
        target_id: String,
        request_id: Uuid,
        admission: ScheduleResult,
    ) -> Self {
        Self {
            rx,
            target_id,
            request_id,
            admission,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// How the request was admitted at submit time
    pub fn admission(&self) -> &ScheduleResult {
        &self.admission
    }
}

impl<T> Future for ResponseHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SchedulerError::Abandoned {
                target_id: this.target_id.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for ResponseHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("target_id", &self.target_id)
            .field("request_id", &self.request_id)
            .field("admission", &self.admission)
            .finish()
    }
}
