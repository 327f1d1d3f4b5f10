//! Resource client for one cluster and namespace
//!
//! [`ResourceClient`] is the only way the migration engine touches a
//! cluster. Every failure is classified into [`Error`] variants the retry
//! executor understands.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::resources::{
    configmap_for_destination, revision_for_destination, service_for_destination,
    service_revision_selector, Configuration, ConfigurationRef, Revision, Service,
};
use crate::{Error, Result};

/// Default connection timeout for cluster clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default read timeout for cluster clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Outcome of ensuring a namespace exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceStatus {
    /// Namespace was already present
    Existing,
    /// Namespace was created
    Created,
}

/// Typed CRUD against one cluster, scoped to one namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List Knative services in the namespace
    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Get a service by name
    async fn get_service(&self, name: &str) -> Result<Service>;

    /// Create a service in this client's namespace
    async fn create_service(&self, service: &Service) -> Result<Service>;

    /// Delete a service by name. The service stays visible until its
    /// Configuration and Revisions are gone.
    async fn delete_service(&self, name: &str) -> Result<()>;

    /// List revisions belonging to a service
    async fn list_revisions_by_service(&self, service_name: &str) -> Result<Vec<Revision>>;

    /// Get a revision by name
    async fn get_revision(&self, name: &str) -> Result<Revision>;

    /// Create a revision owned by the given destination Configuration
    async fn create_revision(&self, revision: &Revision, owner: &ConfigurationRef)
        -> Result<Revision>;

    /// Replace a revision; fails with `Conflict` on a stale resource version
    async fn update_revision(&self, revision: &Revision) -> Result<Revision>;

    /// Get the Configuration of a service
    async fn get_configuration(&self, service_name: &str) -> Result<Configuration>;

    /// Ensure a namespace exists on the cluster
    async fn get_or_create_namespace(&self, name: &str) -> Result<NamespaceStatus>;

    /// Get a configmap by name
    async fn get_config_map(&self, name: &str) -> Result<ConfigMap>;

    /// Create a configmap in this client's namespace
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Overwrite an existing configmap's labels, annotations and data
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
}

/// [`ResourceClient`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    namespace: String,
}

impl KubeResourceClient {
    /// Wrap an existing kube client
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using a kubeconfig file
    pub async fn connect(kubeconfig: &Path, namespace: impl Into<String>) -> Result<Self> {
        let client = create_client(kubeconfig).await?;
        Ok(Self::new(client, namespace))
    }

    /// Namespace this client operates in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Create a kube client from a kubeconfig file with default timeouts
pub async fn create_client(kubeconfig: &Path) -> Result<Client> {
    let kubeconfig_data = Kubeconfig::read_from(kubeconfig).map_err(|e| {
        Error::config(format!(
            "failed to read kubeconfig {}: {}",
            kubeconfig.display(),
            e
        ))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig_data, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::config(format!(
                "failed to load kubeconfig {}: {}",
                kubeconfig.display(),
                e
            ))
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(Client::try_from(config)?)
}

/// Foreground deletion: the owner is removed only after its dependents
fn cascading_delete() -> DeleteParams {
    DeleteParams::foreground()
}

fn object_name<K: kube::Resource>(obj: &K, kind: &'static str) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::invalid(kind, "missing metadata.name"))
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn list_services(&self) -> Result<Vec<Service>> {
        let api: Api<Service> = self.api();
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube("Service", &self.namespace, e))?;
        Ok(list.items)
    }

    async fn get_service(&self, name: &str) -> Result<Service> {
        let api: Api<Service> = self.api();
        api.get(name)
            .await
            .map_err(|e| Error::from_kube("Service", name, e))
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let name = object_name(service, "Service")?;
        let api: Api<Service> = self.api();
        let obj = service_for_destination(service, &self.namespace);
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube("Service", &name, e))?;
        debug!(service = %name, namespace = %self.namespace, "Created service");
        Ok(created)
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let api: Api<Service> = self.api();
        api.delete(name, &cascading_delete())
            .await
            .map_err(|e| Error::from_kube("Service", name, e))?;
        debug!(service = %name, namespace = %self.namespace, "Deleted service");
        Ok(())
    }

    async fn list_revisions_by_service(&self, service_name: &str) -> Result<Vec<Revision>> {
        let api: Api<Revision> = self.api();
        let params = ListParams::default().labels(&service_revision_selector(service_name));
        let list = api
            .list(&params)
            .await
            .map_err(|e| Error::from_kube("Revision", service_name, e))?;
        Ok(list.items)
    }

    async fn get_revision(&self, name: &str) -> Result<Revision> {
        let api: Api<Revision> = self.api();
        api.get(name)
            .await
            .map_err(|e| Error::from_kube("Revision", name, e))
    }

    async fn create_revision(
        &self,
        revision: &Revision,
        owner: &ConfigurationRef,
    ) -> Result<Revision> {
        let name = object_name(revision, "Revision")?;
        let api: Api<Revision> = self.api();
        let obj = revision_for_destination(revision, &self.namespace, owner);
        api.create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube("Revision", &name, e))
    }

    async fn update_revision(&self, revision: &Revision) -> Result<Revision> {
        let name = object_name(revision, "Revision")?;
        let api: Api<Revision> = self.api();
        api.replace(&name, &PostParams::default(), revision)
            .await
            .map_err(|e| Error::from_kube("Revision", &name, e))
    }

    async fn get_configuration(&self, service_name: &str) -> Result<Configuration> {
        let api: Api<Configuration> = self.api();
        api.get(service_name)
            .await
            .map_err(|e| Error::from_kube("Configuration", service_name, e))
    }

    async fn get_or_create_namespace(&self, name: &str) -> Result<NamespaceStatus> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        match api.get(name).await {
            Ok(_) => return Ok(NamespaceStatus::Existing),
            Err(e) => match Error::from_kube("Namespace", name, e) {
                Error::NotFound { .. } => {}
                other => return Err(other),
            },
        }

        let ns = Namespace {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns)
            .await
            .map_err(|e| Error::from_kube("Namespace", name, e))?;

        debug!(namespace = %name, "Created namespace");
        Ok(NamespaceStatus::Created)
    }

    async fn get_config_map(&self, name: &str) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = self.api();
        api.get(name)
            .await
            .map_err(|e| Error::from_kube("ConfigMap", name, e))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = object_name(config_map, "ConfigMap")?;
        let api: Api<ConfigMap> = self.api();
        let obj = configmap_for_destination(config_map, &self.namespace);
        api.create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube("ConfigMap", &name, e))
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = object_name(config_map, "ConfigMap")?;
        let api: Api<ConfigMap> = self.api();
        let live = api
            .get(&name)
            .await
            .map_err(|e| Error::from_kube("ConfigMap", &name, e))?;

        let mut obj = configmap_for_destination(config_map, &self.namespace);
        obj.metadata.resource_version = live.metadata.resource_version;
        api.replace(&name, &PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube("ConfigMap", &name, e))
    }
}
