//! Condition poller
//!
//! Repeatedly evaluates an async check until it yields a value or the
//! timeout elapses. Check errors count as "not yet"; the most recent one is
//! reported if the wait times out.

use crate::error::PollError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Default interval between evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Interval and optional bound for a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between evaluations
    pub interval: Duration,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    /// Bounded policy
    #[inline]
    #[must_use]
    pub fn bounded(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }

    /// Policy without a timeout
    #[inline]
    #[must_use]
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::unbounded(DEFAULT_POLL_INTERVAL)
    }
}

/// Poll `check` until it returns `Ok(Some(value))`
///
/// The check is evaluated immediately, then after every `interval`. The last
/// sleep is shortened so the total wait never exceeds the timeout.
///
/// # Errors
/// Returns `PollError::TimedOut` once the timeout elapses
pub async fn await_value<T, E, F, Fut>(mut check: F, policy: &PollPolicy) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: Display,
{
    let started = Instant::now();
    let deadline = policy.timeout.map(|t| started + t);
    let mut attempts: u32 = 0;
    let mut last_error: Option<String> = None;

    loop {
        attempts = attempts.saturating_add(1);
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                last_error = None;
                tracing::debug!(attempts, "condition not yet met");
            }
            Err(e) => {
                tracing::debug!(attempts, error = %e, "condition check failed");
                last_error = Some(e.to_string());
            }
        }

        let sleep_for = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(PollError::TimedOut {
                        waited: now - started,
                        attempts,
                        last_error,
                    });
                }
                policy.interval.min(deadline - now)
            }
            None => policy.interval,
        };
        tokio::time::sleep(sleep_for).await;
    }
}

/// Poll a boolean condition until it holds
///
/// # Errors
/// Returns `PollError::TimedOut` once the timeout elapses
pub async fn await_condition<E, F, Fut>(mut condition: F, policy: &PollPolicy) -> Result<(), PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    await_value(
        || {
            let fut = condition();
            async move { fut.await.map(|ok| ok.then_some(())) }
        },
        policy,
    )
    .await
}
