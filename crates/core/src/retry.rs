use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff used for audit appends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 25, max_delay_ms: 1_000 }
    }
}

impl BackoffPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Bounded timeout plus retry budget for calls to external collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalCallPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for ExternalCallPolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), retries: 1 }
    }
}

pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for crate::records::LookupError {
    fn is_transient(&self) -> bool {
        crate::records::LookupError::is_transient(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExternalCallError<E> {
    TimedOut,
    Failed(E),
}

/// Runs `call` under the policy timeout. Timeouts and transient failures are
/// retried; anything else returns at once.
pub async fn call_external<T, E, F, Fut>(
    operation: &str,
    policy: &ExternalCallPolicy,
    mut call: F,
) -> Result<T, ExternalCallError<E>>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let failure = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) if !error.is_transient() => return Err(ExternalCallError::Failed(error)),
            Ok(Err(error)) => {
                warn!(event_name = "external.call_failed", operation, attempt, error = %error);
                ExternalCallError::Failed(error)
            }
            Err(_) => {
                warn!(event_name = "external.call_timed_out", operation, attempt);
                ExternalCallError::TimedOut
            }
        };
        if attempt >= policy.retries {
            return Err(failure);
        }
        attempt += 1;
    }
}
