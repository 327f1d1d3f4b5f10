//! Bounded retry for an eventually-consistent control plane.
//!
//! The destination cluster reconciles asynchronously: objects created a
//! moment ago may still read as not found, and its controllers write to the
//! same revisions the migration updates. Call sites wrap single-resource
//! operations in [`retry_if`] with a predicate selecting which failures are
//! transient. Nesting two calls gives each classification its own budget.
//!
//! # Example
//!
//! ```ignore
//! use kn_migrate::retry::{retry_if, RetryPolicy};
//!
//! let revision = retry_if(
//!     &RetryPolicy::new(16, Duration::from_secs(1)),
//!     "get revision",
//!     Error::is_not_found,
//!     || async { client.get_revision("foo-00002").await },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Attempt budget and fixed wait for one retryable call site
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before each retry
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Run `operation`, retrying failures for which `retryable` returns true.
///
/// Errors that are not retryable are returned immediately. After
/// `max_attempts` attempts the last error is returned.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !retryable(&e) => return Err(e),
            Err(e) => {
                if attempt >= policy.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = policy.backoff.as_millis(),
                    "Operation failed, retrying"
                );

                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }
}
