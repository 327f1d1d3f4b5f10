//! In-memory cluster for tests
//!
//! Behaves like a Knative Serving control plane as far as the migration can
//! observe it: creating a Service materialises a Configuration and the
//! service's first Revision, deletes cascade in the foreground, updates are
//! checked against resource versions, and reads of freshly created objects
//! can be made to lag.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::json;

use crate::client::{NamespaceStatus, ResourceClient};
use crate::resources::{
    configmap_for_destination, revision_for_destination, revision_generation, revision_labels,
    service_for_destination, Configuration, ConfigurationRef, ConfigurationSpec,
    ConfigurationStatus, Revision, RevisionSpec, Service, ServiceSpec, ServiceStatus,
    SERVICE_LABEL, SERVING_API_VERSION,
};
use crate::{Error, Result};

#[derive(Default, Serialize)]
struct Objects {
    namespaces: BTreeSet<String>,
    services: BTreeMap<String, Service>,
    configurations: BTreeMap<String, Configuration>,
    revisions: BTreeMap<String, Revision>,
    config_maps: BTreeMap<String, ConfigMap>,
}

#[derive(Default)]
struct State {
    objects: Objects,
    next_id: u64,
    read_lag: u32,
    gc_lag: u32,
    terminating: HashMap<String, u32>,
    pending_reads: HashMap<String, u32>,
    update_conflicts: HashMap<String, u32>,
    revision_updates: HashMap<String, u32>,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn stamp(&mut self, meta: &mut kube::api::ObjectMeta) {
        meta.uid = Some(format!("uid-{}", self.next_id()));
        meta.resource_version = Some(self.next_id());
    }

    fn created(&mut self, kind: &str, name: &str) {
        if self.read_lag > 0 {
            self.pending_reads
                .insert(format!("{}/{}", kind, name), self.read_lag);
        }
    }

    /// True while a freshly created object should still read as missing
    fn lagging(&mut self, kind: &str, name: &str) -> bool {
        match self.pending_reads.get_mut(&format!("{}/{}", kind, name)) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// Store a service and do what the Knative controllers would do
    fn materialise_service(&mut self, mut service: Service, namespace: &str) -> Service {
        let name = service.name_any();
        let revision_name = service
            .spec
            .fields
            .get("template")
            .and_then(|t| t.pointer("/metadata/name"))
            .and_then(|n| n.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-00001", name));

        service.metadata.namespace = Some(namespace.to_string());
        self.stamp(&mut service.metadata);

        let mut config = Configuration::new(&name, ConfigurationSpec::default());
        config.metadata.namespace = Some(namespace.to_string());
        config.metadata.owner_references = Some(vec![OwnerReference {
            api_version: SERVING_API_VERSION.to_string(),
            kind: "Service".to_string(),
            name: name.clone(),
            uid: service.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        self.stamp(&mut config.metadata);
        config.status = Some(ConfigurationStatus {
            latest_created_revision_name: Some(revision_name.clone()),
        });

        let mut revision = Revision::new(&revision_name, RevisionSpec::default());
        revision.metadata.namespace = Some(namespace.to_string());
        revision.metadata.labels = Some(revision_labels(&name, "1"));
        self.stamp(&mut revision.metadata);

        service.status = Some(ServiceStatus {
            latest_created_revision_name: Some(revision_name.clone()),
            latest_ready_revision_name: Some(revision_name.clone()),
            url: Some(format!("http://{}.{}.example.com", name, namespace)),
        });

        self.created("Service", &name);
        self.created("Configuration", &name);
        self.created("Revision", &revision_name);

        self.objects.configurations.insert(name.clone(), config);
        self.objects.revisions.insert(revision_name, revision);
        self.objects.services.insert(name, service.clone());
        service
    }

    /// Remove a service together with its Configuration and Revisions
    fn collect(&mut self, name: &str) {
        self.terminating.remove(name);
        self.objects.services.remove(name);
        self.objects.configurations.remove(name);
        self.objects
            .revisions
            .retain(|_, r| r.labels().get(SERVICE_LABEL).map(String::as_str) != Some(name));
    }
}

/// Fake single-namespace cluster implementing [`ResourceClient`]
pub struct FakeCluster {
    namespace: String,
    state: Mutex<State>,
}

impl FakeCluster {
    /// Empty cluster; the namespace does not exist until something is added
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a service whose history is `revisions` (name, generation), the
    /// last entry being the latest created revision
    pub fn add_service(&self, name: &str, revisions: &[(&str, &str)]) {
        let latest = revisions.last().map(|(n, _)| n.to_string());
        let spec = ServiceSpec {
            fields: json!({
                "template": {
                    "metadata": { "name": latest },
                    "spec": { "containers": [{ "image": format!("ghcr.io/acme/{}", name) }] }
                }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        };

        let mut state = self.state();
        state.objects.namespaces.insert(self.namespace.clone());
        state.materialise_service(Service::new(name, spec), &self.namespace);

        // Replace the controller-made revision with the given history
        state
            .objects
            .revisions
            .retain(|_, r| r.labels().get(SERVICE_LABEL).map(String::as_str) != Some(name));
        for (rev_name, generation) in revisions {
            let mut rev = Revision::new(
                rev_name,
                RevisionSpec {
                    fields: json!({ "containers": [{ "image": format!("ghcr.io/acme/{}", rev_name) }] })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                },
            );
            rev.metadata.namespace = Some(self.namespace.clone());
            rev.metadata.labels = Some(revision_labels(name, generation));
            state.stamp(&mut rev.metadata);
            state.objects.revisions.insert(rev_name.to_string(), rev);
        }
    }

    /// Add a configmap with the given data
    pub fn add_config_map(&self, name: &str, data: &[(&str, &str)]) {
        let mut cm = ConfigMap::default();
        cm.metadata.name = Some(name.to_string());
        cm.metadata.namespace = Some(self.namespace.clone());
        cm.data = Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );

        let mut state = self.state();
        state.objects.namespaces.insert(self.namespace.clone());
        state.stamp(&mut cm.metadata);
        state.objects.config_maps.insert(name.to_string(), cm);
    }

    /// Make reads of objects created from now on fail `reads` times
    pub fn set_read_lag(&self, reads: u32) {
        self.state().read_lag = reads;
    }

    /// Keep deleted services visible for `calls` create attempts while
    /// their dependents are collected
    pub fn set_gc_lag(&self, calls: u32) {
        self.state().gc_lag = calls;
    }

    /// Fail the next `count` updates of a revision with a conflict
    pub fn inject_update_conflicts(&self, revision: &str, count: u32) {
        self.state()
            .update_conflicts
            .insert(revision.to_string(), count);
    }

    /// All services, ordered by name
    pub fn services(&self) -> Vec<Service> {
        self.state().objects.services.values().cloned().collect()
    }

    /// A service by name
    pub fn service(&self, name: &str) -> Option<Service> {
        self.state().objects.services.get(name).cloned()
    }

    /// UID of a service's configuration
    pub fn configuration_uid(&self, service: &str) -> Option<String> {
        self.state()
            .objects
            .configurations
            .get(service)
            .and_then(|c| c.metadata.uid.clone())
    }

    /// A revision by name
    pub fn revision(&self, name: &str) -> Option<Revision> {
        self.state().objects.revisions.get(name).cloned()
    }

    /// Revisions of a service, ordered by name
    pub fn revisions_of(&self, service: &str) -> Vec<Revision> {
        self.state()
            .objects
            .revisions
            .values()
            .filter(|r| r.labels().get(SERVICE_LABEL).map(String::as_str) == Some(service))
            .cloned()
            .collect()
    }

    /// (name, generation) of every revision of a service
    pub fn revision_generations(&self, service: &str) -> Vec<(String, Option<String>)> {
        self.revisions_of(service)
            .iter()
            .map(|r| (r.name_any(), revision_generation(r).map(str::to_string)))
            .collect()
    }

    /// Successful updates applied to a revision
    pub fn revision_updates(&self, name: &str) -> u32 {
        self.state()
            .revision_updates
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// A configmap by name
    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.state().objects.config_maps.get(name).cloned()
    }

    /// Serialized state of every stored object
    pub fn dump(&self) -> String {
        serde_json::to_string(&self.state().objects).unwrap_or_default()
    }
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.services())
    }

    async fn get_service(&self, name: &str) -> Result<Service> {
        let mut state = self.state();
        if state.lagging("Service", name) {
            return Err(Error::not_found("Service", name));
        }
        state
            .objects
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Service", name))
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let name = service.name_any();
        let mut state = self.state();
        if let Some(n) = state.terminating.get_mut(&name) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                state.collect(&name);
            }
        }
        if state.objects.services.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "Service",
                name,
            });
        }
        let obj = service_for_destination(service, &self.namespace);
        Ok(state.materialise_service(obj, &self.namespace))
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if !state.objects.services.contains_key(name) {
            return Err(Error::not_found("Service", name));
        }
        if state.gc_lag == 0 {
            state.collect(name);
        } else {
            let lag = state.gc_lag;
            state.terminating.insert(name.to_string(), lag);
        }
        Ok(())
    }

    async fn list_revisions_by_service(&self, service_name: &str) -> Result<Vec<Revision>> {
        Ok(self.revisions_of(service_name))
    }

    async fn get_revision(&self, name: &str) -> Result<Revision> {
        let mut state = self.state();
        if state.lagging("Revision", name) {
            return Err(Error::not_found("Revision", name));
        }
        state
            .objects
            .revisions
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("Revision", name))
    }

    async fn create_revision(
        &self,
        revision: &Revision,
        owner: &ConfigurationRef,
    ) -> Result<Revision> {
        let name = revision.name_any();
        let mut state = self.state();
        if state.objects.revisions.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "Revision",
                name,
            });
        }
        let mut obj = revision_for_destination(revision, &self.namespace, owner);
        state.stamp(&mut obj.metadata);
        state.objects.revisions.insert(name, obj.clone());
        Ok(obj)
    }

    async fn update_revision(&self, revision: &Revision) -> Result<Revision> {
        let name = revision.name_any();
        let mut state = self.state();

        let conflict = Error::Conflict {
            kind: "Revision",
            name: name.clone(),
        };
        if let Some(n) = state.update_conflicts.get_mut(&name) {
            if *n > 0 {
                *n -= 1;
                // Another writer bumped the object
                let rv = state.next_id();
                if let Some(live) = state.objects.revisions.get_mut(&name) {
                    live.metadata.resource_version = Some(rv);
                }
                return Err(conflict);
            }
        }

        let live_rv = match state.objects.revisions.get(&name) {
            Some(live) => live.metadata.resource_version.clone(),
            None => return Err(Error::not_found("Revision", &name)),
        };
        if live_rv != revision.metadata.resource_version {
            return Err(conflict);
        }

        let mut obj = revision.clone();
        obj.metadata.resource_version = Some(state.next_id());
        state.objects.revisions.insert(name.clone(), obj.clone());
        *state.revision_updates.entry(name).or_default() += 1;
        Ok(obj)
    }

    async fn get_configuration(&self, service_name: &str) -> Result<Configuration> {
        let mut state = self.state();
        if state.lagging("Configuration", service_name) {
            return Err(Error::not_found("Configuration", service_name));
        }
        state
            .objects
            .configurations
            .get(service_name)
            .cloned()
            .ok_or_else(|| Error::not_found("Configuration", service_name))
    }

    async fn get_or_create_namespace(&self, name: &str) -> Result<NamespaceStatus> {
        let mut state = self.state();
        if state.objects.namespaces.insert(name.to_string()) {
            Ok(NamespaceStatus::Created)
        } else {
            Ok(NamespaceStatus::Existing)
        }
    }

    async fn get_config_map(&self, name: &str) -> Result<ConfigMap> {
        self.config_map(name)
            .ok_or_else(|| Error::not_found("ConfigMap", name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = config_map.name_any();
        let mut state = self.state();
        if state.objects.config_maps.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "ConfigMap",
                name,
            });
        }
        let mut obj = configmap_for_destination(config_map, &self.namespace);
        state.stamp(&mut obj.metadata);
        state.objects.config_maps.insert(name, obj.clone());
        Ok(obj)
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let name = config_map.name_any();
        let mut state = self.state();
        let Some(live) = state.objects.config_maps.get(&name) else {
            return Err(Error::not_found("ConfigMap", &name));
        };
        let mut obj = configmap_for_destination(config_map, &self.namespace);
        obj.metadata.uid = live.metadata.uid.clone();
        obj.metadata.resource_version = Some(state.next_id());
        state.objects.config_maps.insert(name, obj.clone());
        Ok(obj)
    }
}
