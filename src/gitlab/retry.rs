//! Fixed-delay, bounded retry for GitLab API calls.
//!
//! Every logical API call goes through [`retry_with_delay`]. The policy is
//! simple on purpose: a fixed delay between attempts and a hard bound on the
//! number of retries, applied uniformly to every failure — HTTP status,
//! transport, or parse. The counter increments per attempt across the whole
//! call, not per distinct error kind. When the bound is exceeded the call
//! fails with [`ApiError::RetryExhausted`], which is distinct from (and
//! wraps) the underlying cause.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::{ApiError, RequestError};

/// Configuration for fixed-delay retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the initial attempt).
    pub max_retries: u32,

    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    /// Default retry configuration: 24 retries at 5 s apart, i.e. roughly
    /// two minutes of riding out an API outage before giving up.
    pub const DEFAULT: Self = Self {
        max_retries: 24,
        delay: Duration::from_secs(5),
    };

    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of attempts a call may make, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Executes an async operation, retrying any failure after a fixed delay.
///
/// The operation is re-invoked until it succeeds or `config.max_retries`
/// retries have been spent; an operation that always fails is attempted
/// exactly `max_retries + 1` times. Each retry is logged with the error and
/// the current retry count.
pub async fn retry_with_delay<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;
                if attempts >= config.max_attempts() {
                    return Err(ApiError::RetryExhausted {
                        attempts,
                        source: err,
                    });
                }

                warn!(error = %err, retry = attempts, "request failed, retrying");
                tokio::time::sleep(config.delay).await;
            }
        }
    }
}
