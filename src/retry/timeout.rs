//! Deadlines for asynchronous operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;

/// Convert a deadline in seconds to an optional [`Duration`].
///
/// Negative (or NaN) values disable the deadline.
pub fn deadline_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(secs))
    }
}

/// Run `op`, cancelling it if it has not settled within `deadline`.
///
/// `None` disables the deadline. Expiry drops `op`, which cancels whatever it
/// was awaiting.
pub async fn with_timeout<F>(deadline: Option<Duration>, op: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, op).await,
        None => Ok(op.await),
    }
}

/// Like [`with_timeout`] for fallible operations, mapping expiry to an error
/// of the operation's own type.
///
/// A zero deadline fails without running `op`.
pub async fn timeout_or<F, T, E>(
    deadline: Option<Duration>,
    op: F,
    on_timeout: impl FnOnce() -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    if deadline == Some(Duration::ZERO) {
        return Err(on_timeout());
    }
    match with_timeout(deadline, op).await {
        Ok(result) => result,
        Err(_elapsed) => Err(on_timeout()),
    }
}
