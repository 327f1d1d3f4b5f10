//! Revision replay onto the destination cluster
//!
//! Creating a Service makes the destination control plane fabricate its
//! first Revision on its own, named after the service template. When the
//! source history is replayed, that revision already exists, so it is
//! reconciled in place (generation label overwritten) while every other
//! revision is created fresh.
//!
//! The choice is made by [`ReplayPlan::action_for`], which compares names
//! against the latest created revision captured once per service. Live
//! destination state is never consulted for the decision, so revisions the
//! destination creates later cannot flip it.

use tracing::debug;

use crate::client::ResourceClient;
use crate::config::RetrySettings;
use crate::resources::{revision_generation, set_revision_generation, ConfigurationRef, Revision};
use crate::retry::retry_if;
use crate::{Error, Result};

/// How a source revision is reproduced on the destination
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayAction {
    /// Create a new revision bound to the destination Configuration
    Create,
    /// Overwrite the generation label of the auto-created revision
    Reconcile,
}

/// Destination facts captured once per service before replay starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayPlan {
    /// Revision the destination created alongside the service
    pub latest_created_revision: String,
    /// Destination Configuration that owns created revisions
    pub configuration: ConfigurationRef,
}

impl ReplayPlan {
    /// Create a plan
    pub fn new(latest_created_revision: impl Into<String>, configuration: ConfigurationRef) -> Self {
        Self {
            latest_created_revision: latest_created_revision.into(),
            configuration,
        }
    }

    /// Select the action for a source revision by name
    pub fn action_for(&self, revision_name: &str) -> ReplayAction {
        if revision_name == self.latest_created_revision {
            ReplayAction::Reconcile
        } else {
            ReplayAction::Create
        }
    }
}

/// Result of replaying one revision
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Revision was created on the destination
    Created {
        /// Revision name
        name: String,
        /// Generation label carried over
        generation: Option<String>,
    },
    /// Auto-created revision had its generation label reconciled
    Reconciled {
        /// Revision name
        name: String,
        /// Generation label written
        generation: Option<String>,
    },
}

impl ReplayOutcome {
    /// Revision name
    pub fn name(&self) -> &str {
        match self {
            Self::Created { name, .. } | Self::Reconciled { name, .. } => name,
        }
    }

    /// Generation label on the destination after replay
    pub fn generation(&self) -> Option<&str> {
        match self {
            Self::Created { generation, .. } | Self::Reconciled { generation, .. } => {
                generation.as_deref()
            }
        }
    }

    /// Action that produced this outcome
    pub fn action(&self) -> ReplayAction {
        match self {
            Self::Created { .. } => ReplayAction::Create,
            Self::Reconciled { .. } => ReplayAction::Reconcile,
        }
    }
}

/// Replays source revisions for one service
pub struct RevisionReplayer<'a> {
    destination: &'a dyn ResourceClient,
    plan: &'a ReplayPlan,
    retry: &'a RetrySettings,
}

impl<'a> RevisionReplayer<'a> {
    /// Create a replayer for one service
    pub fn new(
        destination: &'a dyn ResourceClient,
        plan: &'a ReplayPlan,
        retry: &'a RetrySettings,
    ) -> Self {
        Self {
            destination,
            plan,
            retry,
        }
    }

    /// Reproduce one source revision on the destination
    pub async fn replay(&self, source: &Revision) -> Result<ReplayOutcome> {
        let name = source
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::invalid("Revision", "missing metadata.name"))?;
        let generation = revision_generation(source);

        match self.plan.action_for(name) {
            ReplayAction::Create => {
                self.create(source, name).await?;
                debug!(revision = %name, generation = ?generation, "Migrated revision");
                Ok(ReplayOutcome::Created {
                    name: name.to_string(),
                    generation: generation.map(str::to_string),
                })
            }
            ReplayAction::Reconcile => {
                self.reconcile(name, generation).await?;
                debug!(revision = %name, generation = ?generation, "Reconciled revision generation");
                Ok(ReplayOutcome::Reconciled {
                    name: name.to_string(),
                    generation: generation.map(str::to_string),
                })
            }
        }
    }

    async fn create(&self, source: &Revision, name: &str) -> Result<Revision> {
        let destination = self.destination;
        let owner = &self.plan.configuration;
        let not_found = self.retry.not_found_policy();

        retry_if(
            &self.retry.conflict_policy(),
            name,
            Error::is_conflict,
            move || async move {
                retry_if(&not_found, name, Error::is_not_found, move || async move {
                    destination.create_revision(source, owner).await
                })
                .await
            },
        )
        .await
    }

    /// Read-modify-write of the generation label.
    ///
    /// A conflict restarts the cycle from the read, so the label is always
    /// applied to the newest version the destination controllers wrote.
    async fn reconcile(&self, name: &str, generation: Option<&str>) -> Result<Revision> {
        let destination = self.destination;
        let not_found = self.retry.not_found_policy();

        retry_if(
            &self.retry.conflict_policy(),
            name,
            Error::is_conflict,
            move || async move {
                let mut live = retry_if(&not_found, name, Error::is_not_found, move || async move {
                    destination.get_revision(name).await
                })
                .await?;

                set_revision_generation(&mut live, generation);
                destination.update_revision(&live).await
            },
        )
        .await
    }
}
