//! Bounded reconnection attempts with exponential backoff and jitter.
//!
//! Jitter uses `std::time::SystemTime` UNIX nanos as a seed; it only spreads
//! reconnect storms and needs no real randomness.

use std::future::Future;
use std::time::Duration;
use tether_types::config::ReconnectPolicy;
use tracing::{debug, warn};

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { result: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { result, .. } => Ok(result),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Delay before the attempt following `attempt` (0-indexed).
///
/// Formula: `min(min_delay * 2^attempt, max_delay) * (1 + random * jitter)`,
/// clamped to `max_delay`.
pub fn compute_backoff(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let base = policy
        .min_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(policy.max_delay_ms);

    if policy.jitter <= 0.0 {
        return Duration::from_millis(capped);
    }

    let with_jitter = (capped as f64) * (1.0 + pseudo_random_fraction() * policy.jitter);
    Duration::from_millis((with_jitter as u64).min(policy.max_delay_ms))
}

fn pseudo_random_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mixed = nanos.wrapping_mul(2654435761);
    (mixed as f64) / (u32::MAX as f64)
}

/// Run `operation` up to `policy.max_attempts` times (at least once).
///
/// Errors for which `should_retry` returns `false` end the cycle immediately.
pub async fn retry_async<F, Fut, T, E, P>(
    policy: &ReconnectPolicy,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "reconnect succeeded after {attempt} failures");
                }
                return RetryOutcome::Success {
                    result,
                    attempts: attempt + 1,
                };
            }
            Err(err) => {
                let retryable = should_retry(&err);
                if attempt + 1 >= max || !retryable {
                    if retryable {
                        warn!(attempt = attempt + 1, max_attempts = max, "reconnect attempts exhausted: {err}");
                    } else {
                        debug!(attempt = attempt + 1, "error is not retryable, giving up: {err}");
                    }
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: attempt + 1,
                    };
                }

                let delay = compute_backoff(policy, attempt);
                debug!(attempt = attempt + 1, ?delay, "retrying after error: {err}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
