//! Retry with bounded exponential backoff and jitter.
//!
//! [`RetryPolicy`] configures the retry behavior: maximum number of retries,
//! initial delay, delay ceiling and jitter. [`retry_with_backoff`] runs an
//! operation under a policy, doubling the delay after each failed attempt and
//! clamping it at the ceiling. The caller decides which errors are worth
//! retrying; anything else aborts the loop immediately.

use std::time::{Duration, SystemTime};
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial one.
    pub max_retries: usize,
    /// Initial delay in milliseconds before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds between retries.
    pub max_delay_ms: u64,
    /// Maximum jitter in milliseconds to add to the delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1600,
            jitter_ms: 100,
        }
    }
}

// Generates a random jitter value up to max_jitter
fn generate_jitter(max_jitter: u64) -> u64 {
    let now = SystemTime::now();
    let nanos = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos as u64 % (max_jitter + 1)
}

/// Retries `operation` according to `policy`, sleeping through `sleep`
/// between attempts.
///
/// `is_retryable` classifies failures: a non-retryable error is returned at
/// once. `sleep` is injectable so tests can run with zero delays.
pub fn retry_with_backoff<F, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    sleep: &mut dyn FnMut(Duration),
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Debug,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay_ms;

    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                attempt += 1;
                warn!(
                    name: "retry",
                    operation = operation_name,
                    attempt,
                    error = format!("{err:?}"),
                    "retrying after failure"
                );
                let jitter = generate_jitter(policy.jitter_ms);
                let delay_with_jitter = std::cmp::min(delay + jitter, policy.max_delay_ms);
                sleep(Duration::from_millis(delay_with_jitter));
                delay = std::cmp::min(delay * 2, policy.max_delay_ms);
            }
            Err(err) => return Err(err),
        }
    }
}
