//! Bounded exponential backoff around fallible remote calls.
//!
//! Attempt `k` (1-based) that fails with a retryable error is followed by a
//! sleep of `base_delay * 2^(k-1)`. Permanent errors end the loop at once. The
//! executor keeps no state between calls, so any number of workers may share
//! one policy.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::contract::RemoteError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves as one.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Outcome of one attempt, as seen by the executor.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retryable(RemoteError),
    Terminal(RemoteError),
}

impl<T> From<Result<T, RemoteError>> for Attempt<T> {
    fn from(result: Result<T, RemoteError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Terminal(e),
        }
    }
}

/// Run `op` under `policy`, returning the first success or the final error.
///
/// `operation` names the call in log lines only.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match Attempt::from(op().await) {
            Attempt::Success(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Attempt::Terminal(e) => {
                error!(operation, attempt, error = %e, "Remote call failed permanently");
                return Err(e);
            }
            Attempt::Retryable(e) if attempt >= max_attempts => {
                error!(operation, attempts = attempt, error = %e, "Remote call failed, attempts exhausted");
                return Err(e);
            }
            Attempt::Retryable(e) => {
                let delay = policy.delay_after(attempt);
                match &e {
                    RemoteError::Timeout(_) => warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Remote call timed out, retrying"
                    ),
                    _ => warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Remote call failed, retrying"
                    ),
                }
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
