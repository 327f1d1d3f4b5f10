//! Migration of a single Knative service
//!
//! Steps run strictly in order and each one gates the next:
//!
//! ```text
//! 0. check destination      ── exists && !force ──► ServiceExists (no mutation)
//! 1. copy <svc>-config      ── absent on source ──► skipped
//! 2. delete (force) + create service
//! 3. await status.latestCreatedRevisionName and the new service UID
//! 4. read Configuration UID, once it is controlled by the new service
//! 5. replay source revisions in source list order, settling between each
//! ```
//!
//! Any failure is wrapped with the service name and [`MigrationStep`] and
//! returned without touching later steps.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::client::ResourceClient;
use crate::config::MigrationOptions;
use crate::error::MigrationStep;
use crate::replay::{ReplayOutcome, ReplayPlan, RevisionReplayer};
use crate::resources::{
    configmap_name, controller_uid, latest_created_revision, ConfigurationRef, Service,
};
use crate::retry::retry_if;
use crate::{Error, Result};

/// What happened to one migrated service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMigrationReport {
    /// Service name
    pub service: String,
    /// Whether `<service>-config` was copied
    pub configmap_copied: bool,
    /// Whether an existing destination service was deleted first
    pub replaced: bool,
    /// Revision the destination created alongside the service
    pub latest_created_revision: String,
    /// Per-revision results in replay order
    pub revisions: Vec<ReplayOutcome>,
}

/// Migrates one service at a time from source to destination
pub struct ServiceMigrator<'a> {
    source: &'a dyn ResourceClient,
    destination: &'a dyn ResourceClient,
    options: &'a MigrationOptions,
}

impl<'a> ServiceMigrator<'a> {
    /// Create a migrator
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

    /// Migrate one source service end to end
    #[instrument(skip_all, fields(service = %service.name_any()))]
    pub async fn migrate(&self, service: &Service) -> Result<ServiceMigrationReport> {
        let name = service
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::invalid("Service", "missing metadata.name"))?;

        let exists = self
            .destination_has_service(&name)
            .await
            .map_err(|e| e.at_step(&name, MigrationStep::CheckExisting))?;
        if exists && !self.options.force {
            return Err(Error::ServiceExists {
                name: name.clone(),
                namespace: self.options.destination_namespace.clone(),
            }
            .at_step(&name, MigrationStep::CheckExisting));
        }

        let configmap_copied = self
            .copy_configmap(&name)
            .await
            .map_err(|e| e.at_step(&name, MigrationStep::CopyConfigMap))?;

        self.create_service(service, &name, exists)
            .await
            .map_err(|e| e.at_step(&name, MigrationStep::CreateService))?;
        debug!(service = %name, replaced = exists, "Migrated service");

        let (latest, service_uid) = self
            .await_latest_created_revision(&name)
            .await
            .map_err(|e| e.at_step(&name, MigrationStep::AwaitLatestRevision))?;

        let configuration_uid = self
            .configuration_uid(&name, &service_uid)
            .await
            .map_err(|e| e.at_step(&name, MigrationStep::FetchConfiguration))?;

        let plan = ReplayPlan::new(
            latest.clone(),
            ConfigurationRef::new(name.as_str(), configuration_uid),
        );
        let revisions = self
            .source
            .list_revisions_by_service(&name)
            .await
            .map_err(|e| e.at_step(&name, MigrationStep::ListRevisions))?;

        debug!(
            service = %name,
            revisions = revisions.len(),
            latest_created = %plan.latest_created_revision,
            "Replaying revision history"
        );

        let replayer = RevisionReplayer::new(self.destination, &plan, &self.options.retry);
        let mut outcomes = Vec::with_capacity(revisions.len());
        for (index, revision) in revisions.iter().enumerate() {
            if index > 0 && !self.options.revision_settle_delay.is_zero() {
                tokio::time::sleep(self.options.revision_settle_delay).await;
            }
            let outcome = replayer.replay(revision).await.map_err(|e| {
                e.at_step(&name, MigrationStep::ReplayRevision(revision.name_any()))
            })?;
            outcomes.push(outcome);
        }

        Ok(ServiceMigrationReport {
            service: name,
            configmap_copied,
            replaced: exists,
            latest_created_revision: latest,
            revisions: outcomes,
        })
    }

    async fn destination_has_service(&self, name: &str) -> Result<bool> {
        match self.destination.get_service(name).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy `<service>-config` if the source has one
    async fn copy_configmap(&self, service_name: &str) -> Result<bool> {
        let cm_name = configmap_name(service_name);

        let source_cm: ConfigMap = match self.source.get_config_map(&cm_name).await {
            Ok(cm) => cm,
            Err(Error::NotFound { .. }) => {
                debug!(service = %service_name, "No configmap for service, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        match self.destination.create_config_map(&source_cm).await {
            Ok(_) => {}
            Err(Error::AlreadyExists { .. }) if self.options.force => {
                self.destination.replace_config_map(&source_cm).await?;
                debug!(configmap = %cm_name, "Replaced existing configmap");
            }
            Err(e) => return Err(e),
        }

        debug!(configmap = %cm_name, "Migrated configmap");
        Ok(true)
    }

    async fn create_service(&self, service: &Service, name: &str, exists: bool) -> Result<()> {
        if !exists {
            self.destination.create_service(service).await?;
            return Ok(());
        }

        info!(service = %name, "Deleting service from the destination cluster to recreate as replacement");
        self.destination.delete_service(name).await?;

        // Deletion completes asynchronously; keep creating until the old
        // object is gone.
        let destination = self.destination;
        retry_if(
            &self.options.retry.not_found_policy(),
            name,
            Error::is_already_exists,
            move || async move { destination.create_service(service).await },
        )
        .await?;
        Ok(())
    }

    /// Latest created revision name and service UID, once the destination
    /// controller has reconciled the new service at least once
    async fn await_latest_created_revision(&self, name: &str) -> Result<(String, String)> {
        let destination = self.destination;
        retry_if(
            &self.options.retry.not_found_policy(),
            name,
            Error::is_not_found,
            move || async move {
                let service = destination.get_service(name).await?;
                let pending = |field| Error::Pending {
                    kind: "Service",
                    name: name.to_string(),
                    field,
                };
                let latest = latest_created_revision(&service)
                    .ok_or_else(|| pending("latestCreatedRevisionName"))?;
                let uid = service
                    .metadata
                    .uid
                    .as_deref()
                    .ok_or_else(|| pending("metadata.uid"))?;
                Ok((latest.to_string(), uid.to_string()))
            },
        )
        .await
    }

    /// UID of the Configuration controlled by the service with `service_uid`.
    ///
    /// After a forced replacement the previous Configuration can still be
    /// readable under the same name; it is treated as not there yet.
    async fn configuration_uid(&self, name: &str, service_uid: &str) -> Result<String> {
        let destination = self.destination;
        retry_if(
            &self.options.retry.not_found_policy(),
            name,
            Error::is_not_found,
            move || async move {
                let config = destination.get_configuration(name).await?;
                let pending = |field| Error::Pending {
                    kind: "Configuration",
                    name: name.to_string(),
                    field,
                };
                let uid = config.metadata.uid.clone().ok_or_else(|| pending("metadata.uid"))?;
                if controller_uid(&config.metadata) != Some(service_uid) {
                    return Err(pending("owner reference to the new service"));
                }
                Ok(uid)
            },
        )
        .await
    }
}
