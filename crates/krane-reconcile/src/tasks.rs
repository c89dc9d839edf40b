//! The two reconciliation tasks.
//!
//! Both tasks keep their progress in `self`, so a retried attempt resumes
//! where the failed one stopped: containers already created are started
//! rather than created again, and containers already removed are skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use krane_core::{NAMESPACE_LABEL, REVISION_LABEL};
use krane_deployment::SecretsStore;
use krane_job::{JobKind, Task};
use krane_runtime::{ContainerRecord, ContainerRuntime, RemoveOptions, RuntimeError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::spec::DesiredContainer;

/// Result of an Up job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    /// Containers now serving the deployment.
    pub containers: Vec<String>,
    /// Old containers torn down.
    pub removed: Vec<String>,
    /// The deployment was already converged; nothing changed.
    pub unchanged: bool,
}

/// Result of a Down job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownReport {
    pub removed: Vec<String>,
    /// The secrets collection was deleted too.
    pub purged: bool,
}

/// Up: create-and-start the desired containers, then remove the old ones.
pub struct CreateContainers {
    desired: DesiredContainer,
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace: Duration,
    pull_image: bool,
    /// Containers that existed when the job first ran.
    previous: Option<Vec<ContainerRecord>>,
    /// New containers created so far, with their started flag.
    created: Vec<(String, bool)>,
    removed: Vec<String>,
}

impl CreateContainers {
    pub fn new(
        desired: DesiredContainer,
        runtime: Arc<dyn ContainerRuntime>,
        stop_grace: Duration,
        pull_image: bool,
    ) -> Self {
        Self {
            desired,
            runtime,
            stop_grace,
            pull_image,
            previous: None,
            created: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn desired(&self) -> &DesiredContainer {
        &self.desired
    }

    async fn snapshot(&mut self) -> Result<Vec<ContainerRecord>, ReconcileError> {
        if let Some(previous) = &self.previous {
            return Ok(previous.clone());
        }
        let current = self
            .runtime
            .list_by_label(NAMESPACE_LABEL, &self.desired.deployment)
            .await?;
        debug!(
            deployment = %self.desired.deployment,
            count = current.len(),
            "current containers captured"
        );
        self.previous = Some(current.clone());
        Ok(current)
    }

    /// Pick up containers a failed attempt created without learning their
    /// id, such as a create whose reply timed out. Anything past `scale` is
    /// removed so no alias is routed to an untracked container.
    async fn adopt_strays(&mut self, previous: &[ContainerRecord]) -> Result<(), ReconcileError> {
        let current = self
            .runtime
            .list_by_label(NAMESPACE_LABEL, &self.desired.deployment)
            .await?;
        let revision = self.desired.revision().to_string();
        for record in current {
            let known = previous.iter().any(|p| p.id == record.id)
                || self.created.iter().any(|(id, _)| *id == record.id);
            if known || record.label(REVISION_LABEL) != Some(revision.as_str()) {
                continue;
            }
            if self.created.len() < self.desired.scale as usize {
                info!(deployment = %self.desired.deployment, id = %record.id, "adopting container from failed attempt");
                self.created.push((record.id.clone(), record.is_running()));
            } else {
                teardown(self.runtime.as_ref(), &record.id, self.stop_grace).await?;
                info!(deployment = %self.desired.deployment, id = %record.id, "surplus container removed");
            }
        }
        Ok(())
    }

    async fn start_and_attach(&self, id: &str, network: &str) -> Result<(), ReconcileError> {
        self.runtime.start_container(id).await?;
        let record = self.runtime.inspect_container(id).await?;
        if !record.networks.iter().any(|n| n == network) {
            self.runtime.connect_network(network, id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Task for CreateContainers {
    type Output = UpReport;
    type Error = ReconcileError;

    fn kind(&self) -> JobKind {
        JobKind::ContainerCreate
    }

    async fn run(&mut self) -> Result<UpReport, ReconcileError> {
        let deployment = self.desired.deployment.clone();
        let retrying = self.previous.is_some();
        let previous = self.snapshot().await?;
        if retrying {
            self.adopt_strays(&previous).await?;
        }

        if self.created.is_empty() && self.desired.is_converged(&previous) {
            info!(%deployment, revision = %self.desired.revision(), "deployment already converged");
            return Ok(UpReport {
                containers: previous.into_iter().map(|c| c.id).collect(),
                removed: Vec::new(),
                unchanged: true,
            });
        }

        if self.pull_image {
            self.runtime.pull_image(&self.desired.image).await?;
        }
        let network = self.desired.network.clone();
        self.runtime.ensure_network(&network).await?;

        // Finish containers a failed attempt left created but not started.
        for index in 0..self.created.len() {
            if !self.created[index].1 {
                let id = self.created[index].0.clone();
                self.start_and_attach(&id, &network).await?;
                self.created[index].1 = true;
            }
        }

        while self.created.len() < self.desired.scale as usize {
            let spec = self.desired.container_spec();
            let id = self.runtime.create_container(&spec).await?;
            info!(%deployment, container = %spec.name, id = %id, "container created");
            self.created.push((id.clone(), false));
            self.start_and_attach(&id, &network).await?;
            if let Some(entry) = self.created.last_mut() {
                entry.1 = true;
            }
        }

        // Teardown only once the new set is serving.
        for old in &previous {
            if self.removed.contains(&old.id) || self.created.iter().any(|(id, _)| *id == old.id) {
                continue;
            }
            teardown(self.runtime.as_ref(), &old.id, self.stop_grace).await?;
            info!(%deployment, id = %old.id, "old container removed");
            self.removed.push(old.id.clone());
        }

        Ok(UpReport {
            containers: self.created.iter().map(|(id, _)| id.clone()).collect(),
            removed: self.removed.clone(),
            unchanged: false,
        })
    }
}

/// Down: remove every container of the deployment.
pub struct DeleteContainers {
    deployment: String,
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace: Duration,
    /// Secrets collection to destroy once the containers are gone.
    purge: Option<SecretsStore>,
    removed: Vec<String>,
}

impl DeleteContainers {
    pub fn new(
        deployment: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            deployment: deployment.into(),
            runtime,
            stop_grace,
            purge: None,
            removed: Vec::new(),
        }
    }

    /// Also delete the deployment's secrets collection once its
    /// containers are removed.
    pub fn with_purge(mut self, secrets: SecretsStore) -> Self {
        self.purge = Some(secrets);
        self
    }
}

#[async_trait]
impl Task for DeleteContainers {
    type Output = DownReport;
    type Error = ReconcileError;

    fn kind(&self) -> JobKind {
        JobKind::ContainerDelete
    }

    async fn run(&mut self) -> Result<DownReport, ReconcileError> {
        let current = self
            .runtime
            .list_by_label(NAMESPACE_LABEL, &self.deployment)
            .await?;

        for container in &current {
            teardown(self.runtime.as_ref(), &container.id, self.stop_grace).await?;
            info!(deployment = %self.deployment, id = %container.id, "container removed");
            if !self.removed.contains(&container.id) {
                self.removed.push(container.id.clone());
            }
        }

        let purged = match &self.purge {
            Some(secrets) => {
                secrets.delete_collection(&self.deployment)?;
                info!(deployment = %self.deployment, "deployment purged");
                true
            }
            None => false,
        };

        Ok(DownReport {
            removed: self.removed.clone(),
            purged,
        })
    }
}

/// Stop then force-remove a container with its anonymous volumes. A
/// container that is already gone counts as removed.
async fn teardown(
    runtime: &dyn ContainerRuntime,
    id: &str,
    grace: Duration,
) -> Result<(), ReconcileError> {
    match runtime.stop_container(id, grace).await {
        Ok(()) => {}
        Err(RuntimeError::NotFound(_)) => return Ok(()),
        Err(e) => warn!(id, error = %e, "stop failed, forcing removal"),
    }
    match runtime.remove_container(id, RemoveOptions::default()).await {
        Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
