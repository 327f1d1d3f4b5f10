//! Console progress output for a migration run

use kn_migrate::{
    ClusterRole, MigrationReporter, NamespaceStatus, ReplayOutcome, ServiceMigrationReport,
    ServiceSnapshot, SnapshotPhase,
};

use crate::format::{format_age, print_table};

/// Prints snapshots and per-service progress to stdout
pub struct ConsoleReporter {
    source_namespace: String,
    source_cluster: String,
    destination_cluster: String,
    deletion_announced: bool,
}

impl ConsoleReporter {
    pub fn new(
        source_namespace: impl Into<String>,
        source_cluster: impl Into<String>,
        destination_cluster: impl Into<String>,
    ) -> Self {
        Self {
            source_namespace: source_namespace.into(),
            source_cluster: source_cluster.into(),
            destination_cluster: destination_cluster.into(),
            deletion_announced: false,
        }
    }
}

/// Banner printed above a snapshot
pub fn snapshot_title(cluster: ClusterRole, phase: SnapshotPhase) -> String {
    let phase = match phase {
        SnapshotPhase::Before => "Before",
        SnapshotPhase::After => "After",
    };
    let cluster = match cluster {
        ClusterRole::Source => "source",
        ClusterRole::Destination => "destination",
    };
    format!("[{} migration in {} cluster]", phase, cluster)
}

/// One row per service
pub fn service_rows(services: &[ServiceSnapshot]) -> Vec<Vec<String>> {
    services
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.url.clone().unwrap_or_default(),
                s.latest_created_revision.clone().unwrap_or_default(),
                s.latest_ready_revision.clone().unwrap_or_default(),
                s.revisions.len().to_string(),
            ]
        })
        .collect()
}

/// One row per revision of every service
pub fn revision_rows(services: &[ServiceSnapshot]) -> Vec<Vec<String>> {
    services
        .iter()
        .flat_map(|s| {
            s.revisions.iter().map(move |r| {
                vec![
                    s.name.clone(),
                    r.name.clone(),
                    r.generation.clone().unwrap_or_else(|| "-".to_string()),
                    r.created
                        .as_ref()
                        .map(|t| format_age(&t.0))
                        .unwrap_or_else(|| "-".to_string()),
                ]
            })
        })
        .collect()
}

/// Lines describing what happened to one service
pub fn service_lines(report: &ServiceMigrationReport) -> Vec<String> {
    let mut lines = Vec::new();
    let configmap = kn_migrate::resources::configmap_name(&report.service);
    if report.configmap_copied {
        lines.push(format!("Migrated configmap {} successfully", configmap));
    } else {
        lines.push(format!(
            "No configmap for service {}, skip migrate configmap",
            report.service
        ));
    }
    if report.replaced {
        lines.push(format!(
            "Replaced existing service {} in the destination cluster",
            report.service
        ));
    }
    lines.push(format!("Migrated service {} successfully", report.service));
    for outcome in &report.revisions {
        lines.push(match outcome {
            ReplayOutcome::Created { name, .. } => {
                format!("Migrated revision {} successfully", name)
            }
            ReplayOutcome::Reconciled { name, generation } => format!(
                "Replace revision {} to generation {} successfully",
                name,
                generation.as_deref().unwrap_or("-")
            ),
        });
    }
    lines
}

impl MigrationReporter for ConsoleReporter {
    fn snapshot(
        &mut self,
        cluster: ClusterRole,
        phase: SnapshotPhase,
        namespace: &str,
        services: &[ServiceSnapshot],
    ) {
        println!("{}", snapshot_title(cluster, phase));
        println!("Namespace {}: {} service(s)", namespace, services.len());
        if services.is_empty() {
            println!();
            return;
        }
        print_table(
            &["SERVICE", "URL", "LATEST CREATED", "LATEST READY", "REVISIONS"],
            &service_rows(services),
        );
        println!();
        print_table(
            &["SERVICE", "REVISION", "GENERATION", "AGE"],
            &revision_rows(services),
        );
        println!();
    }

    fn namespace_ready(&mut self, namespace: &str, status: NamespaceStatus) {
        match status {
            NamespaceStatus::Created => {
                println!("Create namespace {} in destination cluster", namespace)
            }
            NamespaceStatus::Existing => {
                println!("Namespace {} already exists in destination cluster", namespace)
            }
        }

        println!("\nNow migrate all Knative service resources");
        println!(
            "From the source {} namespace of cluster {}",
            self.source_namespace, self.source_cluster
        );
        println!(
            "To the destination {} namespace of cluster {}",
            namespace, self.destination_cluster
        );
    }

    fn service_started(&mut self, service: &str) {
        println!("Start migrate service {}", service);
    }

    fn service_migrated(&mut self, report: &ServiceMigrationReport) {
        for line in service_lines(report) {
            println!("{}", line);
        }
        println!();
    }

    fn source_cleanup_skipped(&mut self) {
        println!("Migrate without --delete option, skip deleting Knative resource in source cluster");
    }

    fn source_service_deleted(&mut self, service: &str) {
        if !self.deletion_announced {
            println!(
                "Migrate with --delete option, deleting all Knative resource in source cluster"
            );
            self.deletion_announced = true;
        }
        println!("Deleted service {} in source cluster", service);
    }
}
