//! Desired container state derived from a deployment config.

use std::collections::BTreeMap;

use krane_core::{NAMESPACE_LABEL, REVISION_LABEL};
use krane_deployment::DeploymentConfig;
use krane_proxy::{RoutingIntent, proxy_labels};
use krane_runtime::{ContainerRecord, ContainerSpec};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// What every container of a deployment should look like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredContainer {
    pub deployment: String,
    pub image: String,
    /// Plain env followed by resolved secrets, as `NAME=value`.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: BTreeMap<String, String>,
    pub ports: BTreeMap<String, String>,
    pub network: String,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    pub scale: u32,
}

impl DesiredContainer {
    /// Build from a saved (defaulted) config and its resolved secret env.
    pub fn from_config(config: &DeploymentConfig, secret_env: Vec<String>, network: &str) -> Self {
        let mut env: Vec<String> = config
            .env
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        env.extend(secret_env);

        let mut labels = proxy_labels(&RoutingIntent {
            deployment: &config.name,
            aliases: config.routed_aliases(),
            secure: config.secure,
            ports: &config.ports,
            target_port: config.target_port.as_deref(),
            rate_limit: config.rate_limit,
        });
        labels.insert(NAMESPACE_LABEL.to_string(), config.name.clone());

        let mut desired = Self {
            deployment: config.name.clone(),
            image: config.image_ref(),
            env,
            labels,
            mounts: config.volumes.clone(),
            ports: config.ports.clone(),
            network: network.to_string(),
            command: config.command.clone(),
            entrypoint: config.entrypoint.clone(),
            scale: config.scale.max(1),
        };
        let revision = revision(&desired);
        desired.labels.insert(REVISION_LABEL.to_string(), revision);
        desired
    }

    /// Fingerprint stamped on every container built from this state.
    pub fn revision(&self) -> &str {
        self.labels
            .get(REVISION_LABEL)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Container spec with a freshly generated name.
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: container_name(&self.deployment),
            image: self.image.clone(),
            env: self.env.clone(),
            labels: self.labels.clone(),
            mounts: self.mounts.clone(),
            ports: self.ports.clone(),
            network: Some(self.network.clone()),
            command: self.command.clone(),
            entrypoint: self.entrypoint.clone(),
        }
    }

    /// True when `current` already is exactly this state: `scale` running
    /// containers, all of this revision.
    pub fn is_converged(&self, current: &[ContainerRecord]) -> bool {
        current.len() == self.scale as usize
            && current
                .iter()
                .all(|c| c.is_running() && c.label(REVISION_LABEL) == Some(self.revision()))
    }
}

/// SHA-256 over the canonical JSON of a desired state, excluding any
/// previous revision label.
pub fn revision(desired: &DesiredContainer) -> String {
    let mut unstamped = desired.clone();
    unstamped.labels.remove(REVISION_LABEL);
    // Serializing plain maps and vectors cannot fail.
    let canonical = serde_json::to_vec(&unstamped).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

/// `{deployment}-{8 hex chars}`.
pub fn container_name(deployment: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{deployment}-{}", &suffix[..8])
}
