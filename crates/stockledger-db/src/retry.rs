//! # Optimistic Retry Loop
//!
//! Every mutating ledger operation is one attempt function that reads its
//! working set, computes writes and commits. When the attempt reports a
//! [`DbError::WriteConflict`] the whole attempt runs again from scratch.
//!
//! ```text
//!  attempt 1 ──► WriteConflict ──► sleep(backoff) ──► attempt 2 ──► Ok
//!                                                        │
//!                         max_attempts reached ──────────┴──► ConcurrencyExhausted
//! ```
//!
//! Any other error (including ledger rule violations) is returned at once.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use stockledger_core::CoreError;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// How often and how patiently an operation is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Runs `attempt` until it succeeds, fails with a non-conflict error, or the
/// policy runs out of attempts.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match attempt().await {
            Err(DbError::WriteConflict(reason)) => {
                if attempts >= policy.max_attempts {
                    warn!(operation, attempts, %reason, "Giving up after repeated write conflicts");
                    return Err(CoreError::ConcurrencyExhausted {
                        operation: operation.to_string(),
                        attempts,
                    }
                    .into());
                }
                let delay = backoff.next_backoff().unwrap_or(policy.max_delay);
                debug!(operation, attempts, ?delay, %reason, "Write conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
