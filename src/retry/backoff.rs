//! Retry with backoff.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::core::constants::MAX_BACKOFF;

/// Errors that can report whether they are a cancellation.
pub trait Retryable {
    /// Check if this error is a cancellation.
    fn is_cancellation(&self) -> bool;
}

/// Delay inserted before each retry.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before retry number `attempt` (zero-based).
    fn delay(&self, attempt: u32) -> Duration;
}

/// `min(2^n / 4, max)` seconds before retry `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Upper bound of every delay.
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { max: MAX_BACKOFF }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // 2^n / 4 seconds is 250ms * 2^n.
        let quarter = Duration::from_millis(250);
        match 1u32.checked_shl(attempt).and_then(|f| quarter.checked_mul(f)) {
            Some(delay) => delay.min(self.max),
            None => self.max,
        }
    }
}

/// The same delay before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff(pub Duration);

impl BackoffPolicy for ConstantBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision<E> {
    /// Retry if attempts remain, else surface this error.
    Retry(E),
    /// Surface this error immediately.
    Abort(E),
}

/// Decides how a failed attempt is handled.
pub trait FailureClassifier<E>: Send + Sync {
    /// Classify one failure.
    fn classify(&self, error: E) -> RetryDecision<E>;
}

/// Aborts on cancellation, retries everything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbortOnCancel;

impl<E: Retryable> FailureClassifier<E> for AbortOnCancel {
    fn classify(&self, error: E) -> RetryDecision<E> {
        if error.is_cancellation() {
            RetryDecision::Abort(error)
        } else {
            RetryDecision::Retry(error)
        }
    }
}

/// Runs an operation up to `1 + max_retries` times.
///
/// Dropping the future returned by [`run`](Self::run) drops the attempt in
/// flight, cancelling it.
#[derive(Clone)]
pub struct Retrying<B = ExponentialBackoff, C = AbortOnCancel> {
    max_retries: u32,
    backoff: B,
    classifier: C,
}

impl<B, C> fmt::Debug for Retrying<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrying")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Retrying {
    /// Retry up to `max_retries` times with the default backoff and
    /// classifier.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: ExponentialBackoff::default(),
            classifier: AbortOnCancel,
        }
    }
}

impl<B, C> Retrying<B, C> {
    /// Replace the backoff policy.
    pub fn with_backoff<B2: BackoffPolicy>(self, backoff: B2) -> Retrying<B2, C> {
        Retrying {
            max_retries: self.max_retries,
            backoff,
            classifier: self.classifier,
        }
    }

    /// Replace the failure classifier.
    pub fn with_classifier<C2>(self, classifier: C2) -> Retrying<B, C2> {
        Retrying {
            max_retries: self.max_retries,
            backoff: self.backoff,
            classifier,
        }
    }

    /// Maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` until it succeeds, is aborted or runs out of retries.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        B: BackoffPolicy,
        C: FailureClassifier<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.classifier.classify(error) {
                RetryDecision::Abort(error) => return Err(error),
                RetryDecision::Retry(error) if attempt >= self.max_retries => return Err(error),
                RetryDecision::Retry(_) => {
                    let delay = self.backoff.delay(attempt);
                    debug!(attempt = attempt + 1, ?delay, "retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
