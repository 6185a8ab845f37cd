use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::trace::TraceContext;

/// Ambient signal threaded through one logical operation and every attempt
/// it makes: a cancellation token, an optional deadline and the parent trace.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    trace_parent: Option<TraceContext>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_trace_parent(mut self, trace_parent: TraceContext) -> Self {
        self.trace_parent = Some(trace_parent);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn trace_parent(&self) -> Option<&TraceContext> {
        self.trace_parent.as_ref()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns the cancellation error if this context can no longer run work.
    pub fn check(&self) -> Result<(), Error> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Whether sleeping for `delay` would run past the deadline.
    pub(crate) fn would_exceed_deadline(&self, delay: Duration) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() + delay >= deadline)
    }

    /// Drives `work` until it completes, the token is cancelled, or the
    /// deadline passes, whichever comes first.
    pub(crate) async fn run<F, T>(&self, work: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let deadline = self.deadline;
        let deadline_reached = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            _ = deadline_reached => Err(Error::DeadlineExceeded),
            result = work => result,
        }
    }

    pub(crate) async fn sleep(&self, delay: Duration) -> Result<(), Error> {
        self.run(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}
