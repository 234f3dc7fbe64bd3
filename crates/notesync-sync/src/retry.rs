//! Retry policy for remote calls
//!
//! One policy type is shared by every remote call site. Which errors are
//! retried is decided by a classification predicate, by default
//! [`RemoteError::is_transient`]. Delays grow exponentially from
//! `base_delay` and are capped at `max_delay`.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use notesync_core::config::RetryConfig;
use notesync_core::ports::{RemoteError, RemoteResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy for uploads and downloads
    pub fn transfer(config: &RetryConfig) -> Self {
        Self::new(
            config.transfer_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Policy for listings, metadata and change-feed calls
    pub fn metadata(config: &RetryConfig) -> Self {
        Self::new(
            config.metadata_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.metadata_max_delay_ms),
        )
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `f`, retrying transient errors.
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        self.run_classified(operation, RemoteError::is_transient, f)
            .await
    }

    /// Run `f`, retrying errors for which `retryable` returns true.
    pub async fn run_classified<F, Fut, T, P>(
        &self,
        operation: &str,
        retryable: P,
        mut f: F,
    ) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
        P: Fn(&RemoteError) -> bool,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 < self.max_attempts && retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transfer(&RetryConfig::default())
    }
}
