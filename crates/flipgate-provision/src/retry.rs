//! Bounded exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use flipgate_core::config::ProvisioningConfig;
use flipgate_core::parse_duration;

use crate::backend::BackendError;
use crate::error::{ProvisionError, ProvisionResult};

/// Retry budget for backend operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Describe calls before a resource that never turns ready times out.
    pub ready_polls: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            ready_polls: 30,
        }
    }
}

impl RetryPolicy {
    /// Overlay `[provisioning]` settings on the defaults.
    pub fn from_config(config: Option<&ProvisioningConfig>) -> Self {
        let mut policy = Self::default();
        let Some(config) = config else {
            return policy;
        };
        if let Some(n) = config.max_attempts {
            policy.max_attempts = n.max(1);
        }
        if let Some(d) = config.base_delay.as_deref().and_then(parse_duration) {
            policy.base_delay = d;
        }
        if let Some(d) = config.max_delay.as_deref().and_then(parse_duration) {
            policy.max_delay = d;
        }
        policy
    }

    /// Delay before attempt `attempt + 1` (zero-based `attempt`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// Transient errors are retried with backoff. `Rejected` and `NotFound`
    /// surface immediately as [`ProvisionError::Rejected`]. Exhausting the
    /// budget yields [`ProvisionError::Timeout`].
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> ProvisionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(%name, attempts = attempt, error = %e, "retry budget exhausted");
                        return Err(ProvisionError::Timeout {
                            name: name.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.delay_for(attempt - 1);
                    warn!(%name, attempt, ?delay, error = %e, "transient backend error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ProvisionError::Rejected {
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
