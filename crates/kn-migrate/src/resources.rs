//! Knative Serving resource types and destination rebinding
//!
//! Only the fields the migration reads are typed. Specs are kept as raw JSON
//! maps so every field is carried across clusters verbatim, including fields
//! newer than this tool.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// API version of the Knative Serving resources
pub const SERVING_API_VERSION: &str = "serving.knative.dev/v1";

/// Label recording a revision's position in its configuration's history
pub const CONFIGURATION_GENERATION_LABEL: &str = "serving.knative.dev/configurationGeneration";

/// Label naming the configuration that owns a revision
pub const CONFIGURATION_LABEL: &str = "serving.knative.dev/configuration";

/// Label naming the service a revision belongs to
pub const SERVICE_LABEL: &str = "serving.knative.dev/service";

/// Label carrying the UID of the configuration that owns a revision
pub const CONFIGURATION_UID_LABEL: &str = "serving.knative.dev/configurationUID";

/// Label carrying the UID of the service a revision belongs to
pub const SERVICE_UID_LABEL: &str = "serving.knative.dev/serviceUID";

/// Suffix of the configmap that travels with a service
pub const CONFIGMAP_SUFFIX: &str = "-config";

/// Knative Service spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "serving.knative.dev",
    version = "v1",
    kind = "Service",
    namespaced,
    status = "ServiceStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
pub struct ServiceSpec {
    /// Template, traffic and any other spec fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Knative Service status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Revision most recently created for this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_revision_name: Option<String>,
    /// Revision most recently ready to serve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_ready_revision_name: Option<String>,
    /// Public URL of the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Knative Revision spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "serving.knative.dev",
    version = "v1",
    kind = "Revision",
    namespaced,
    status = "RevisionStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
pub struct RevisionSpec {
    /// Containers, scaling and any other spec fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Knative Revision status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct RevisionStatus {
    /// Status fields; never copied to the destination
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Knative Configuration spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "serving.knative.dev",
    version = "v1",
    kind = "Configuration",
    namespaced,
    status = "ConfigurationStatus",
    schema = "disabled",
    derive = "PartialEq"
)]
pub struct ConfigurationSpec {
    /// Template and any other spec fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Knative Configuration status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationStatus {
    /// Revision most recently created from this configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_revision_name: Option<String>,
}

/// Identity of the destination Configuration that owns replayed revisions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationRef {
    /// Configuration name, equal to the service name
    pub name: String,
    /// UID assigned by the destination cluster
    pub uid: String,
}

impl ConfigurationRef {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }
}

/// Name of the configmap associated with a service
pub fn configmap_name(service_name: &str) -> String {
    format!("{}{}", service_name, CONFIGMAP_SUFFIX)
}

/// Generation label of a revision, if set
pub fn revision_generation(revision: &Revision) -> Option<&str> {
    revision
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(CONFIGURATION_GENERATION_LABEL))
        .map(String::as_str)
}

/// Set or clear the generation label of a revision
pub fn set_revision_generation(revision: &mut Revision, generation: Option<&str>) {
    match generation {
        Some(value) => {
            revision
                .labels_mut()
                .insert(CONFIGURATION_GENERATION_LABEL.to_string(), value.to_string());
        }
        None => {
            if let Some(labels) = revision.metadata.labels.as_mut() {
                labels.remove(CONFIGURATION_GENERATION_LABEL);
            }
        }
    }
}

/// Latest created revision reported by a service, if populated
pub fn latest_created_revision(service: &Service) -> Option<&str> {
    service
        .status
        .as_ref()
        .and_then(|s| s.latest_created_revision_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// Fresh metadata for an object created on the destination.
///
/// Server-assigned fields (uid, resourceVersion, timestamps, managed
/// fields) are dropped.
fn rebind_metadata(meta: &ObjectMeta, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: meta.name.clone(),
        namespace: Some(namespace.to_string()),
        labels: meta.labels.clone(),
        annotations: meta.annotations.clone(),
        ..Default::default()
    }
}

/// Service to create on the destination from a source service
pub fn service_for_destination(source: &Service, namespace: &str) -> Service {
    Service {
        metadata: rebind_metadata(&source.metadata, namespace),
        spec: source.spec.clone(),
        status: None,
    }
}

/// Revision to create on the destination, owned by the destination
/// Configuration `owner`.
///
/// Labels carrying source cluster UIDs are rewritten or dropped.
pub fn revision_for_destination(
    source: &Revision,
    namespace: &str,
    owner: &ConfigurationRef,
) -> Revision {
    let mut metadata = rebind_metadata(&source.metadata, namespace);
    let mut labels = metadata.labels.take().unwrap_or_default();
    labels.remove(SERVICE_UID_LABEL);
    labels.insert(CONFIGURATION_UID_LABEL.to_string(), owner.uid.clone());
    metadata.labels = Some(labels);
    metadata.owner_references = Some(vec![OwnerReference {
        api_version: SERVING_API_VERSION.to_string(),
        kind: "Configuration".to_string(),
        name: owner.name.clone(),
        uid: owner.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);

    Revision {
        metadata,
        spec: source.spec.clone(),
        status: None,
    }
}

/// UID of the controlling owner of an object, if any
pub fn controller_uid(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|o| o.controller == Some(true))
        .map(|o| o.uid.as_str())
}

/// ConfigMap to create on the destination from a source configmap
pub fn configmap_for_destination(source: &ConfigMap, namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: rebind_metadata(&source.metadata, namespace),
        data: source.data.clone(),
        binary_data: source.binary_data.clone(),
        immutable: source.immutable,
    }
}

/// Label selector matching every revision of a service
pub fn service_revision_selector(service_name: &str) -> String {
    format!("{}={}", SERVICE_LABEL, service_name)
}

/// Labels for a revision in a service's history (used by fixtures and
/// by anything fabricating revisions)
pub fn revision_labels(service_name: &str, generation: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SERVICE_LABEL.to_string(), service_name.to_string()),
        (CONFIGURATION_LABEL.to_string(), service_name.to_string()),
        (
            CONFIGURATION_GENERATION_LABEL.to_string(),
            generation.to_string(),
        ),
    ])
}
