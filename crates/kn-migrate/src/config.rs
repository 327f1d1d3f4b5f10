//! Migration options threaded through every component

use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Default number of attempts when a resource is not visible yet
pub const DEFAULT_MAX_GET_ATTEMPTS: u32 = 16;

/// Default number of read-modify-write cycles on update conflicts
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 16;

/// Default wait between not-found retries
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default pause between replayed revisions
pub const DEFAULT_REVISION_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Retry budgets for the destination control plane
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySettings {
    /// Attempts for reads that may race the destination's controllers
    pub max_get_attempts: u32,
    /// Attempts for updates that may hit a resource version conflict
    pub max_update_attempts: u32,
    /// Wait between not-found retries
    pub retry_interval: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_get_attempts: DEFAULT_MAX_GET_ATTEMPTS,
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl RetrySettings {
    /// Settings with no waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_get_attempts: max_attempts,
            max_update_attempts: max_attempts,
            retry_interval: Duration::ZERO,
        }
    }

    /// Policy for reads that return not-found during replication lag
    pub fn not_found_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_get_attempts, self.retry_interval)
    }

    /// Policy for read-modify-write cycles; conflicts re-fetch immediately
    pub fn conflict_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_update_attempts, Duration::ZERO)
    }
}

/// Options for one migration run
#[derive(Clone, Debug)]
pub struct MigrationOptions {
    /// Namespace holding the services on the source cluster
    pub source_namespace: String,
    /// Namespace receiving the services on the destination cluster
    pub destination_namespace: String,
    /// Replace services that already exist on the destination
    pub force: bool,
    /// Delete all services from the source after a successful run
    pub delete_source: bool,
    /// Retry budgets
    pub retry: RetrySettings,
    /// Pause between replayed revisions so destination controllers settle
    pub revision_settle_delay: Duration,
}

impl MigrationOptions {
    /// Options with default retry settings and delays
    pub fn new(source_namespace: impl Into<String>, destination_namespace: impl Into<String>) -> Self {
        Self {
            source_namespace: source_namespace.into(),
            destination_namespace: destination_namespace.into(),
            force: false,
            delete_source: false,
            retry: RetrySettings::default(),
            revision_settle_delay: DEFAULT_REVISION_SETTLE_DELAY,
        }
    }

    /// Reject options that cannot address either cluster
    pub fn validate(&self) -> Result<()> {
        if self.source_namespace.trim().is_empty() {
            return Err(Error::config(
                "cannot get source cluster namespace, please use --namespace to set",
            ));
        }
        if self.destination_namespace.trim().is_empty() {
            return Err(Error::config(
                "cannot get destination cluster namespace, please use --destination-namespace to set",
            ));
        }
        if self.retry.max_get_attempts == 0 || self.retry.max_update_attempts == 0 {
            return Err(Error::config("retry attempts must be at least 1"));
        }
        Ok(())
    }
}
