use std::future::Future;
use std::time::Duration;
use tracing;

use crate::config::types::Settings;

/// Exponential backoff applied by callers around remote operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.remote_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Retry a fallible async operation with exponential backoff.
pub async fn with_retry<F, Fut, T, E>(
    policy: RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt > policy.max_retries {
                    if policy.max_retries > 0 {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt,
                            "All retry attempts exhausted"
                        );
                    }
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
