//! Retry and timeout primitives.
//!
//! [`with_timeout`] cancels an operation that has not settled within a
//! deadline; [`Retrying`] re-runs a failing operation with a pluggable
//! [`BackoffPolicy`] between attempts and a [`FailureClassifier`] deciding
//! which failures abort immediately.

mod backoff;
mod timeout;

pub use backoff::{
    AbortOnCancel, BackoffPolicy, ConstantBackoff, ExponentialBackoff, FailureClassifier,
    RetryDecision, Retryable, Retrying,
};
pub use timeout::{deadline_from_secs, timeout_or, with_timeout};
