//! Bounded retry policies for discovery and readiness polling.
//!
//! Both polling loops in the launch protocol (port-mapping discovery and
//! connection readiness) share one helper driven by an explicit
//! [`RetryPolicy`], instead of each open-coding its own loop. Every policy is
//! bounded — by attempt count, wall-clock deadline, or both — and every sleep
//! races against a [`CancellationToken`] so a caller can abort an in-progress
//! launch without waiting out the full timeout.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// An explicit bounded retry policy: how often to try, how long to wait
/// between tries, and whether the delay grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<usize>,
    deadline: Option<Duration>,
    delay: Duration,
    backoff: bool,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Fixed delay, bounded by attempt count.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: Some(max_attempts.max(1)),
            deadline: None,
            delay,
            backoff: false,
            max_delay: delay,
        }
    }

    /// Fixed delay, bounded by total wall-clock time. Attempts continue until
    /// the deadline has elapsed, however many that takes.
    pub fn deadline(total: Duration, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: None,
            deadline: Some(total),
            delay,
            backoff: false,
            max_delay: delay,
        }
    }

    /// Doubling delay starting at `initial`, capped at `max_delay`, bounded
    /// by attempt count.
    pub fn backoff(max_attempts: usize, initial: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: Some(max_attempts.max(1)),
            deadline: None,
            delay: initial,
            backoff: true,
            max_delay,
        }
    }

    /// The delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.delay
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The policy ran out. Carries the last underlying error for diagnostics.
    Exhausted {
        attempts: usize,
        waited: Duration,
        last: E,
    },
    /// The caller cancelled mid-wait (or before the first attempt).
    Cancelled,
}

/// Retry `op` until it succeeds or `policy` is exhausted.
///
/// The first attempt is made immediately; sleeps happen only between
/// attempts, and never after the attempt that exhausts the policy.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let mut delay = policy.delay;
    let mut attempts = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(last) => {
                let out_of_attempts = policy.max_attempts.is_some_and(|max| attempts >= max);
                let out_of_time = policy.deadline.is_some_and(|d| start.elapsed() >= d);
                if out_of_attempts || out_of_time {
                    return Err(RetryError::Exhausted {
                        attempts,
                        waited: start.elapsed(),
                        last,
                    });
                }

                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = sleep(delay) => {}
                }

                if policy.backoff {
                    delay = (delay * 2).min(policy.max_delay);
                }
            }
        }
    }
}
