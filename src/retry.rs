//! Bounded retry with a fixed poll interval.
//!
//! `retry_until_ok` runs an action until it succeeds or a deadline passes.
//! It is used for the `resizeInUseVolumes` patch. `retry_while` is the
//! variant the Kubernetes platform waits with: it also stops on the first
//! error the caller classifies as permanent.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, warn};

/// Deadline and cadence of a retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Overall budget, measured from the first attempt.
    pub timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub poll_interval: Duration,
}

impl RetryPolicy {
    /// Policy guarding cluster patch commands: 60s, polling every 5s.
    pub const PATCH: RetryPolicy = RetryPolicy::from_secs(60, 5);

    /// Create a policy.
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Create a policy from whole seconds.
    pub const fn from_secs(timeout: u64, poll_interval: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout),
            Duration::from_secs(poll_interval),
        )
    }

    /// Same cadence, different deadline.
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self::new(timeout, self.poll_interval)
    }

    /// Upper bound on how long a loop under this policy can block.
    pub fn max_wait(&self) -> Duration {
        self.timeout + self.poll_interval
    }
}

/// The deadline passed without a successful attempt.
#[derive(Debug)]
pub struct RetryTimeout<E> {
    /// Time spent retrying.
    pub elapsed: Duration,
    /// Attempts started, including one cut short by the deadline.
    pub attempts: u32,
    /// Error of the last attempt that completed.
    pub last_error: Option<E>,
}

impl<E: fmt::Display> fmt::Display for RetryTimeout<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {:?} and {} attempts",
            self.elapsed, self.attempts
        )?;
        match &self.last_error {
            Some(e) => write!(f, ": {}", e),
            None => write!(f, ": no attempt completed"),
        }
    }
}

impl<E> std::error::Error for RetryTimeout<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl<E: fmt::Display> RetryTimeout<E> {
    /// Last error rendered as text, for reports.
    pub fn last_error_message(&self) -> String {
        self.last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt completed before the deadline".to_string())
    }
}

/// Run `action` until it returns `Ok` or `policy.timeout` elapses.
///
/// The first attempt starts immediately. After a failed attempt the loop
/// sleeps `poll_interval`, clipped to the deadline, so the final attempt
/// happens at the deadline at the latest. An attempt still running when the
/// deadline passes is dropped.
pub async fn retry_until_ok<T, E, F, Fut>(
    policy: RetryPolicy,
    mut action: F,
) -> Result<T, RetryTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let mut attempts: u32 = 0;
    let mut last_error = None;

    loop {
        attempts += 1;
        match timeout_at(deadline, action()).await {
            Ok(Ok(value)) => {
                debug!(
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Retry loop succeeded"
                );
                return Ok(value);
            }
            Ok(Err(e)) => {
                debug!(attempt = attempts, error = %e, "Attempt failed");
                last_error = Some(e);
            }
            Err(_) => {
                debug!(attempt = attempts, "Attempt overran the deadline");
                break;
            }
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep_until((now + policy.poll_interval).min(deadline)).await;
    }

    let failure = RetryTimeout {
        elapsed: start.elapsed(),
        attempts,
        last_error,
    };
    warn!(
        timeout_ms = policy.timeout.as_millis() as u64,
        error = %failure,
        "Retry loop timed out"
    );
    Err(failure)
}

/// Failure of [`retry_while`].
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error until the deadline.
    Timeout(RetryTimeout<E>),
    /// An attempt failed with an error not worth retrying.
    Permanent { attempts: u32, error: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Timeout(timeout) => timeout.fmt(f),
            RetryError::Permanent { attempts, error } => {
                write!(f, "gave up on attempt {}: {}", attempts, error)
            }
        }
    }
}

/// Like [`retry_until_ok`], but returns as soon as an attempt fails with an
/// error for which `retryable` is false.
pub async fn retry_while<T, E, F, Fut, P>(
    policy: RetryPolicy,
    mut action: F,
    retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let retryable = &retryable;
    let mut attempts: u32 = 0;

    let outcome = retry_until_ok(policy, || {
        attempts += 1;
        let attempt = action();
        async move {
            match attempt.await {
                Ok(value) => Ok(Ok(value)),
                Err(e) if retryable(&e) => Err(e),
                Err(e) => Ok(Err(e)),
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            warn!(attempt = attempts, error = %error, "Permanent error, not retrying");
            Err(RetryError::Permanent { attempts, error })
        }
        Err(timeout) => Err(RetryError::Timeout(timeout)),
    }
}
