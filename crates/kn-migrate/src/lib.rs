//! Knative service migration between clusters
//!
//! Copies every Knative Service of a source namespace, together with its
//! `<service>-config` configmap and its full revision history, into a
//! namespace on another cluster. Revisions keep their names and their
//! `configurationGeneration` labels so the destination history reads like
//! the source one.
//!
//! ## Flow
//!
//! ```text
//! Source cluster                         Destination cluster
//! ─────────────────                      ──────────────────
//! 1. Snapshot services + revisions       2. Snapshot, ensure namespace
//! 3. For each service (sequential):
//!    ├─ <svc>-config ──────────────────►  copy (replace when forced)
//!    ├─ Service ───────────────────────►  delete (forced) + create
//!    │                                    ├─ await latestCreatedRevisionName
//!    │                                    └─ read Configuration UID
//!    └─ Revisions (list order) ────────►  4. For each revision:
//!                                            ├─ latest created: fix up its
//!                                            │  generation label (RMW)
//!                                            └─ otherwise: create, owned by
//!                                               the Configuration
//! 5. Snapshot destination
//! 6. Delete source services (--delete only, after every service succeeded)
//! ```
//!
//! Destination reads are retried while the API reports not-found and
//! updates are retried on resource version conflicts; see [`retry`].

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod replay;
pub mod resources;
pub mod retry;
pub mod service;

#[cfg(test)]
mod fake;

pub use client::{KubeResourceClient, NamespaceStatus, ResourceClient};
pub use config::{MigrationOptions, RetrySettings};
pub use driver::{
    ClusterMigration, ClusterRole, MigrationReporter, MigrationSummary, NoopReporter,
    RevisionSnapshot, ServiceSnapshot, SnapshotPhase,
};
pub use error::{Error, MigrationStep};
pub use replay::{ReplayAction, ReplayOutcome, ReplayPlan};
pub use resources::ConfigurationRef;
pub use service::{ServiceMigrationReport, ServiceMigrator};

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, Error>;
