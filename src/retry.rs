//! Bounded retries with a per-attempt timeout.
//!
//! Wraps one target's `collect` call: each attempt races a deadline, a
//! timed-out or failed attempt backs off exponentially (1s, 2s, 4s, ...,
//! capped) with a little jitter before the next, and the retry budget is
//! `retries` additional attempts after the first.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::CollectError;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_MULTIPLIER: u32 = 2;
const JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub retries: u32,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        RetryPolicy { retries, timeout }
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Backoff before attempt `n + 1` after `n` failed attempts.
fn backoff_for(failed_attempts: u32) -> Duration {
    let factor = BACKOFF_MULTIPLIER.saturating_pow(failed_attempts.saturating_sub(1));
    let base = INITIAL_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF);
    let jitter = rand::rng().random_range(0..JITTER_MS);
    base + Duration::from_millis(jitter)
}

/// Run `op` under `policy`, returning the first success or the last error.
///
/// `label` identifies the operation in logs (collector + target). The
/// retry predicate is [`CollectError::is_retryable`]; by default every
/// error is retryable, so only explicit refusals short-circuit.
pub async fn run_with_retry<F, Fut, T>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, CollectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CollectError::Timeout {
                ms: policy.timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(%label, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_attempts() && err.is_retryable() => {
                let delay = backoff_for(attempt);
                warn!(
                    %label,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
