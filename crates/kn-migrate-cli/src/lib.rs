//! kn-migrate CLI library

pub mod error;
pub mod format;
pub mod report;

pub use error::{Error, Result};

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kn_migrate::config::{
    DEFAULT_MAX_GET_ATTEMPTS, DEFAULT_MAX_UPDATE_ATTEMPTS, DEFAULT_RETRY_INTERVAL,
    DEFAULT_REVISION_SETTLE_DELAY,
};
use kn_migrate::{ClusterMigration, KubeResourceClient, MigrationOptions, RetrySettings};
use tracing::debug;

use crate::report::ConsoleReporter;

/// Migrate Knative services from one cluster to another
#[derive(Parser, Debug)]
#[command(name = "kn-migrate")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  # Migrate Knative services from source cluster to destination cluster by export KUBECONFIG and KUBECONFIG_DESTINATION as environment variables
  kn-migrate --namespace default --destination-namespace default
  # Migrate Knative services from source cluster to destination cluster by set kubeconfig as parameters
  kn-migrate --namespace default --destination-namespace default --kubeconfig $HOME/.kube/source.yml --destination-kubeconfig $HOME/.kube/destination.yml
  # Force replace the service if it exists in destination cluster, then delete it in source cluster
  kn-migrate --namespace default --destination-namespace default --force --delete")]
pub struct Cli {
    /// The namespace of the source Knative resources
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// The kubeconfig of the source Knative resources
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// The namespace of the destination Knative resources
    #[arg(long)]
    pub destination_namespace: Option<String>,

    /// The kubeconfig of the destination Knative resources
    #[arg(long, env = "KUBECONFIG_DESTINATION")]
    pub destination_kubeconfig: Option<PathBuf>,

    /// Migrate service forcefully, replaces existing service if any
    #[arg(long)]
    pub force: bool,

    /// Delete all Knative resources from the source cluster after migration
    #[arg(long)]
    pub delete: bool,

    /// Attempts for destination reads that may not be visible yet
    #[arg(long, default_value_t = DEFAULT_MAX_GET_ATTEMPTS)]
    pub max_get_retries: u32,

    /// Attempts for revision updates that hit a conflict
    #[arg(long, default_value_t = DEFAULT_MAX_UPDATE_ATTEMPTS)]
    pub max_update_retries: u32,

    /// Seconds to wait between not-found retries
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_secs())]
    pub retry_interval_secs: u64,

    /// Seconds to wait between replayed revisions
    #[arg(long, default_value_t = DEFAULT_REVISION_SETTLE_DELAY.as_secs())]
    pub revision_settle_secs: u64,
}

/// Validated inputs for one run
#[derive(Debug)]
pub struct RunConfig {
    pub source_kubeconfig: PathBuf,
    pub destination_kubeconfig: PathBuf,
    pub options: MigrationOptions,
}

fn non_empty<T: AsRef<std::ffi::OsStr>>(value: Option<T>) -> Option<T> {
    value.filter(|v| !v.as_ref().is_empty())
}

impl Cli {
    /// Check required inputs in the order they are reported to the user
    pub fn resolve(self) -> Result<RunConfig> {
        let source_kubeconfig = non_empty(self.kubeconfig).ok_or_else(|| {
            Error::config("cannot get source cluster kube config, please use --kubeconfig or export environment variable KUBECONFIG to set")
        })?;
        let destination_kubeconfig = non_empty(self.destination_kubeconfig).ok_or_else(|| {
            Error::config("cannot get destination cluster kube config, please use --destination-kubeconfig or export environment variable KUBECONFIG_DESTINATION to set")
        })?;
        let source_namespace = non_empty(self.namespace).ok_or_else(|| {
            Error::config("cannot get source cluster namespace, please use --namespace to set")
        })?;
        let destination_namespace = non_empty(self.destination_namespace).ok_or_else(|| {
            Error::config(
                "cannot get destination cluster namespace, please use --destination-namespace to set",
            )
        })?;

        let mut options = MigrationOptions::new(source_namespace, destination_namespace);
        options.force = self.force;
        options.delete_source = self.delete;
        options.retry = RetrySettings {
            max_get_attempts: self.max_get_retries,
            max_update_attempts: self.max_update_retries,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
        };
        options.revision_settle_delay = Duration::from_secs(self.revision_settle_secs);
        options
            .validate()
            .map_err(|e| match e {
                kn_migrate::Error::Config(msg) => Error::Config(msg),
                other => Error::Migration(other),
            })?;

        Ok(RunConfig {
            source_kubeconfig,
            destination_kubeconfig,
            options,
        })
    }

    /// Run the migration
    pub async fn run(self) -> Result<()> {
        let config = self.resolve()?;
        let options = &config.options;

        debug!(
            source = %config.source_kubeconfig.display(),
            destination = %config.destination_kubeconfig.display(),
            "Connecting to clusters"
        );
        let source =
            KubeResourceClient::connect(&config.source_kubeconfig, &options.source_namespace)
                .await?;
        let destination = KubeResourceClient::connect(
            &config.destination_kubeconfig,
            &options.destination_namespace,
        )
        .await?;

        let mut reporter = ConsoleReporter::new(
            &options.source_namespace,
            config.source_kubeconfig.display().to_string(),
            config.destination_kubeconfig.display().to_string(),
        );
        ClusterMigration::new(&source, &destination, options)
            .run(&mut reporter)
            .await?;
        Ok(())
    }
}
