use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::context::CallContext;
use crate::error::{Error, TransportErrorKind};

/// A failure shape that a [`RetryPolicy`] can allow or deny retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RetryCondition {
    /// Any transport failure other than a per-attempt timeout.
    Network,
    /// The transport gave up waiting for a response.
    Timeout,
    Status(u16),
}

impl RetryCondition {
    fn of(error: &Error) -> Option<Self> {
        match error {
            Error::Network {
                kind: TransportErrorKind::Timeout,
                ..
            } => Some(Self::Timeout),
            Error::Network { .. } => Some(Self::Network),
            _ => error.status().map(Self::Status),
        }
    }
}

/// Immutable retry configuration. Overrides produce a new value through
/// [`RetryPolicy::to_builder`].
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
    retry_only_on: Option<BTreeSet<RetryCondition>>,
    never_retry_on: BTreeSet<RetryCondition>,
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.2,
            retry_only_on: None,
            never_retry_on: BTreeSet::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::standard(),
        }
    }

    pub fn to_builder(&self) -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: self.clone(),
        }
    }

    /// Retries allowed after the first attempt; a logical operation makes at
    /// most `max_retries + 1` attempts.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Whether `error` may be retried under this policy. Conditions only
    /// narrow what the classifier reports as transient.
    pub fn should_retry(&self, error: &Error) -> bool {
        if !error.is_retryable() {
            return false;
        }
        let Some(condition) = RetryCondition::of(error) else {
            return false;
        };
        if self.never_retry_on.contains(&condition) {
            return false;
        }
        match &self.retry_only_on {
            Some(allowed) => allowed.contains(&condition),
            None => true,
        }
    }

    /// Upper bound of the delay before the retry that follows `retry_index`
    /// earlier retries: `min(initial * multiplier^retry_index, max)`.
    pub fn base_backoff_for_retry(&self, retry_index: usize) -> Duration {
        if retry_index == 0 {
            return self.initial_backoff.min(self.max_backoff);
        }
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let scaled_nanos = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !scaled_nanos.is_finite() || scaled_nanos >= self.max_backoff.as_nanos() as f64 {
            return self.max_backoff;
        }
        Duration::from_nanos(scaled_nanos.max(0.0) as u64)
    }

    /// Jittered delay, sampled uniformly from
    /// `[base * (1 - jitter), base]`; never negative and never above the base.
    pub fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let base = self.base_backoff_for_retry(retry_index);
        if self.jitter <= f64::EPSILON || base.is_zero() {
            return base;
        }
        let low = base.mul_f64(1.0 - self.jitter);
        if low >= base {
            return base;
        }
        let mut rng = rand::rng();
        let sampled = rng.random_range(low.as_nanos()..=base.as_nanos());
        Duration::from_nanos(u64::try_from(sampled).unwrap_or(u64::MAX)).min(base)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.policy.initial_backoff = initial_backoff;
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.policy.max_backoff = max_backoff;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn retry_only_on(mut self, conditions: impl IntoIterator<Item = RetryCondition>) -> Self {
        self.policy.retry_only_on = Some(conditions.into_iter().collect());
        self
    }

    pub fn never_retry_on(mut self, conditions: impl IntoIterator<Item = RetryCondition>) -> Self {
        self.policy.never_retry_on.extend(conditions);
        self
    }

    /// Validates the accumulated settings. Invalid values are rejected here
    /// rather than clamped or ignored.
    pub fn build(self) -> Result<RetryPolicy, Error> {
        let policy = self.policy;
        if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
            return Err(invalid(format!(
                "retry multiplier must be a finite value >= 1.0, got {}",
                policy.multiplier
            )));
        }
        if !policy.jitter.is_finite() || !(0.0..=1.0).contains(&policy.jitter) {
            return Err(invalid(format!(
                "retry jitter must be within [0.0, 1.0], got {}",
                policy.jitter
            )));
        }
        if policy.initial_backoff > policy.max_backoff {
            return Err(invalid(format!(
                "initial backoff {:?} exceeds max backoff {:?}",
                policy.initial_backoff, policy.max_backoff
            )));
        }
        if let Some(allowed) = &policy.retry_only_on
            && let Some(RetryCondition::Status(status)) =
                allowed.iter().find(|condition| match condition {
                    RetryCondition::Status(status) => !is_transient_status(*status),
                    _ => false,
                })
        {
            return Err(invalid(format!(
                "status {status} is terminal and cannot be listed as retryable"
            )));
        }
        Ok(policy)
    }
}

fn is_transient_status(status: u16) -> bool {
    (500..=599).contains(&status) || crate::error::is_transient_client_status(status)
}

fn invalid(message: String) -> Error {
    Error::InvalidConfig { message }
}

/// Runs `attempt` under `policy`, sleeping between retryable failures.
///
/// Attempts are strictly sequential. `attempt` receives the zero-based
/// attempt index. Cancellation or deadline expiry, during an attempt or
/// during backoff, ends the loop with [`Error::Cancelled`] or
/// [`Error::DeadlineExceeded`]. When retries run out the last real failure is
/// returned unchanged.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    context: &CallContext,
    mut attempt: F,
) -> Result<T, Error>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut retries = 0_usize;
    loop {
        context.check()?;
        let error = match context.run(attempt(retries)).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if error.is_cancellation()
            || retries >= policy.max_retries
            || !policy.should_retry(&error)
        {
            return Err(error);
        }

        let delay = policy.backoff_for_retry(retries);
        if context.would_exceed_deadline(delay) {
            return Err(Error::DeadlineExceeded);
        }
        warn!(
            retry = retries + 1,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying request"
        );
        context.sleep(delay).await?;
        retries += 1;
    }
}
