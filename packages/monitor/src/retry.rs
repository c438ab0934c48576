//! Retry Policy
//!
//! Bounded retry with a constant delay between attempts. Every remote call the
//! monitor makes (head query, block fetch, trace fetch) goes through here.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::warn;

/// Default number of additional attempts after the first failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Retry configuration: `max_retries` additional attempts, `delay_ms` apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails
    pub max_retries: u32,
    /// Constant wait between attempts in milliseconds
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, delay_ms: u64) -> Self {
        Self { max_retries, delay_ms }
    }

    /// A policy that runs the operation exactly once
    pub const fn no_retry() -> Self {
        Self::new(0, 0)
    }

    /// Same delay, different retry budget
    pub const fn with_max_retries(self, max_retries: u32) -> Self {
        Self { max_retries, ..self }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Total number of times the operation may run
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds or the retry budget is spent
///
/// # Arguments
/// * `policy` - Retry budget and delay
/// * `label` - Name of the operation, used in log lines
/// * `operation` - Factory producing a fresh future for every attempt
///
/// # Returns
/// The first successful value, or the error of the final attempt unchanged
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    label,
                    attempt,
                    policy.max_attempts(),
                    e,
                    policy.delay()
                );
                sleep(policy.delay()).await;
            }
            Err(e) => return Err(e),
        }
    }
}
