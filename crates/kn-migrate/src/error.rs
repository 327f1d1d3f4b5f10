//! Error types for service migration
//!
//! API failures are classified at the client boundary so that the retry
//! executor can tell transient read-after-write lag and concurrent updates
//! apart from permanent failures.

use std::fmt;

use thiserror::Error;

/// Errors from migration operations
#[derive(Debug, Error)]
pub enum Error {
    /// Resource is not (yet) visible on the cluster
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// Resource exists but a status field has not been populated yet
    #[error("{kind} {name} has no {field} yet")]
    Pending {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
        /// Field that is still empty
        field: &'static str,
    },

    /// Update lost a resource version race with another writer
    #[error("conflict updating {kind} {name}: the object has been modified")]
    Conflict {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// Create collided with an existing object
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
    },

    /// Destination already has the service and replacement was not requested
    #[error(
        "cannot migrate service {name} in namespace {namespace} because the service already exists and no --force option was given"
    )]
    ServiceExists {
        /// Service name
        name: String,
        /// Destination namespace
        namespace: String,
    },

    /// Object is missing a field the migration needs
    #[error("invalid {kind}: {message}")]
    InvalidResource {
        /// Resource kind
        kind: &'static str,
        /// What is missing or malformed
        message: String,
    },

    /// Migration options are incomplete
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other Kubernetes API or transport error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A migration step failed for a service
    #[error("migrating service {service} failed at {step}: {source}")]
    Step {
        /// Service being migrated
        service: String,
        /// Step that failed
        step: MigrationStep,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid resource error
    pub fn invalid(kind: &'static str, msg: impl Into<String>) -> Self {
        Self::InvalidResource {
            kind,
            message: msg.into(),
        }
    }

    /// Classify a kube-rs error for the named resource.
    ///
    /// Classification uses the status reason first, matching how the API
    /// server distinguishes `Conflict` from `AlreadyExists` (both are 409).
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        if let kube::Error::Api(ref resp) = err {
            match resp.reason.as_str() {
                "NotFound" => return Self::not_found(kind, name),
                "Conflict" => {
                    return Self::Conflict {
                        kind,
                        name: name.to_string(),
                    }
                }
                "AlreadyExists" => {
                    return Self::AlreadyExists {
                        kind,
                        name: name.to_string(),
                    }
                }
                _ if resp.code == 404 => return Self::not_found(kind, name),
                _ => {}
            }
        }
        Self::Kube(err)
    }

    /// Create a not found error
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Wrap this error with the service and step that produced it
    pub fn at_step(self, service: &str, step: MigrationStep) -> Self {
        Self::Step {
            service: service.to_string(),
            step,
            source: Box::new(self),
        }
    }

    /// True for errors caused by eventual consistency lag
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Pending { .. })
    }

    /// True for resource version conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True when a create hit an existing object
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// The step that failed, if this error carries step context
    pub fn step(&self) -> Option<&MigrationStep> {
        match self {
            Self::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The innermost error with step context removed
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Steps of a single service migration, in execution order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationStep {
    /// Look up the service on the destination
    CheckExisting,
    /// Copy the `<service>-config` configmap
    CopyConfigMap,
    /// Delete (when forced) and create the destination service
    CreateService,
    /// Wait for the destination to report its latest created revision
    AwaitLatestRevision,
    /// Read the destination Configuration UID
    FetchConfiguration,
    /// List the source revision history
    ListRevisions,
    /// Replay one source revision
    ReplayRevision(String),
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckExisting => write!(f, "check existing service"),
            Self::CopyConfigMap => write!(f, "copy configmap"),
            Self::CreateService => write!(f, "create service"),
            Self::AwaitLatestRevision => write!(f, "await latest created revision"),
            Self::FetchConfiguration => write!(f, "fetch configuration"),
            Self::ListRevisions => write!(f, "list revisions"),
            Self::ReplayRevision(name) => write!(f, "replay revision {}", name),
        }
    }
}
