//! Namespace-wide migration driver
//!
//! Runs the [`ServiceMigrator`] for every service in the source namespace,
//! one after another, and halts on the first failure. Source services are
//! only deleted after every service has migrated.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::{NamespaceStatus, ResourceClient};
use crate::config::MigrationOptions;
use crate::resources::{latest_created_revision, revision_generation};
use crate::service::{ServiceMigrationReport, ServiceMigrator};
use crate::Result;

/// Which cluster a snapshot or event refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterRole {
    /// Cluster the services are read from
    Source,
    /// Cluster the services are written to
    Destination,
}

/// When a snapshot was taken
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotPhase {
    /// Before any mutation
    Before,
    /// After all services migrated
    After,
}

/// A revision as shown to the operator
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionSnapshot {
    /// Revision name
    pub name: String,
    /// Generation label
    pub generation: Option<String>,
    /// Creation timestamp
    pub created: Option<Time>,
}

/// A service and its revisions as shown to the operator
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSnapshot {
    /// Service name
    pub name: String,
    /// Public URL
    pub url: Option<String>,
    /// Latest created revision reported by the service
    pub latest_created_revision: Option<String>,
    /// Latest ready revision reported by the service
    pub latest_ready_revision: Option<String>,
    /// Revisions in list order
    pub revisions: Vec<RevisionSnapshot>,
}

/// Operator-facing progress hooks, invoked at fixed points of a run
pub trait MigrationReporter {
    /// Services with revisions in one namespace
    fn snapshot(
        &mut self,
        cluster: ClusterRole,
        phase: SnapshotPhase,
        namespace: &str,
        services: &[ServiceSnapshot],
    );

    /// Destination namespace was checked or created
    fn namespace_ready(&mut self, namespace: &str, status: NamespaceStatus);

    /// Migration of a service is starting
    fn service_started(&mut self, service: &str);

    /// Migration of a service finished
    fn service_migrated(&mut self, report: &ServiceMigrationReport);

    /// Source cleanup was skipped because deletion was not requested
    fn source_cleanup_skipped(&mut self);

    /// A service was deleted from the source
    fn source_service_deleted(&mut self, service: &str);
}

/// Reporter that discards everything
#[derive(Debug, Default)]
pub struct NoopReporter;

impl MigrationReporter for NoopReporter {
    fn snapshot(&mut self, _: ClusterRole, _: SnapshotPhase, _: &str, _: &[ServiceSnapshot]) {}
    fn namespace_ready(&mut self, _: &str, _: NamespaceStatus) {}
    fn service_started(&mut self, _: &str) {}
    fn service_migrated(&mut self, _: &ServiceMigrationReport) {}
    fn source_cleanup_skipped(&mut self) {}
    fn source_service_deleted(&mut self, _: &str) {}
}

/// Result of a complete run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Per-service reports in migration order
    pub services: Vec<ServiceMigrationReport>,
    /// Services deleted from the source
    pub deleted_from_source: Vec<String>,
}

/// Collect every service in a namespace together with its revisions
pub async fn snapshot_namespace(client: &dyn ResourceClient) -> Result<Vec<ServiceSnapshot>> {
    let services = client.list_services().await?;
    let mut snapshots = Vec::with_capacity(services.len());

    for service in &services {
        let name = service.name_any();
        let revisions = client
            .list_revisions_by_service(&name)
            .await?
            .iter()
            .map(|rev| RevisionSnapshot {
                name: rev.name_any(),
                generation: revision_generation(rev).map(str::to_string),
                created: rev.metadata.creation_timestamp.clone(),
            })
            .collect();

        let status = service.status.as_ref();
        snapshots.push(ServiceSnapshot {
            latest_created_revision: latest_created_revision(service).map(str::to_string),
            latest_ready_revision: status.and_then(|s| s.latest_ready_revision_name.clone()),
            url: status.and_then(|s| s.url.clone()),
            name,
            revisions,
        });
    }

    Ok(snapshots)
}

/// Migrates every service of a source namespace to a destination namespace
pub struct ClusterMigration<'a> {
    source: &'a dyn ResourceClient,
    destination: &'a dyn ResourceClient,
    options: &'a MigrationOptions,
}

impl<'a> ClusterMigration<'a> {
    /// Create a driver
    pub fn new(
        source: &'a dyn ResourceClient,
        destination: &'a dyn ResourceClient,
        options: &'a MigrationOptions,
    ) -> Self {
        Self {
            source,
            destination,
            options,
        }
    }

    /// Run the migration, reporting progress to `reporter`
    pub async fn run(&self, reporter: &mut dyn MigrationReporter) -> Result<MigrationSummary> {
        self.options.validate()?;
        let source_ns = self.options.source_namespace.as_str();
        let destination_ns = self.options.destination_namespace.as_str();

        let source_services = snapshot_namespace(self.source).await?;
        reporter.snapshot(ClusterRole::Source, SnapshotPhase::Before, source_ns, &source_services);

        let before = snapshot_namespace(self.destination).await?;
        reporter.snapshot(
            ClusterRole::Destination,
            SnapshotPhase::Before,
            destination_ns,
            &before,
        );

        let ns_status = self.destination.get_or_create_namespace(destination_ns).await?;
        reporter.namespace_ready(destination_ns, ns_status);

        info!(
            source_namespace = %source_ns,
            destination_namespace = %destination_ns,
            force = self.options.force,
            "Migrating Knative services"
        );

        let migrator = ServiceMigrator::new(self.source, self.destination, self.options);
        let mut summary = MigrationSummary::default();
        for service in self.source.list_services().await? {
            let name = service.name_any();
            reporter.service_started(&name);
            let report = migrator.migrate(&service).await?;
            reporter.service_migrated(&report);
            summary.services.push(report);
        }

        let after = snapshot_namespace(self.destination).await?;
        reporter.snapshot(
            ClusterRole::Destination,
            SnapshotPhase::After,
            destination_ns,
            &after,
        );

        if self.options.delete_source {
            summary.deleted_from_source = self.delete_source_services(reporter).await?;
        } else {
            reporter.source_cleanup_skipped();
        }

        info!(
            services = summary.services.len(),
            deleted = summary.deleted_from_source.len(),
            "Migration complete"
        );
        Ok(summary)
    }

    async fn delete_source_services(
        &self,
        reporter: &mut dyn MigrationReporter,
    ) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for service in self.source.list_services().await? {
            let name = service.name_any();
            self.source.delete_service(&name).await?;
            debug!(service = %name, namespace = %self.options.source_namespace, "Deleted source service");
            reporter.source_service_deleted(&name);
            deleted.push(name);
        }
        Ok(deleted)
    }
}
