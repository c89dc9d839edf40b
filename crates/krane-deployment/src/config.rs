//! Deployment configuration records.
//!
//! A `DeploymentConfig` is the declarative description of one deployment:
//! image reference, routing aliases, environment, secret references, volume
//! and port mappings. `ConfigStore::save` replaces the whole record.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use krane_state::StateStore;
use krane_state::collections::DEPLOYMENTS;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DeploymentError, DeploymentResult};

/// Tag applied when a config leaves it empty.
pub const DEFAULT_TAG: &str = "latest";

/// Registry applied when a config leaves it empty.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Container count applied when a config leaves `scale` at zero.
pub const DEFAULT_SCALE: u32 = 1;

/// Deployment names end up in container labels, proxy identifiers and
/// collection names, so they are restricted to a label-safe alphabet.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid name pattern"));

/// Desired state of a single deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Unique deployment name; the namespace key everywhere.
    pub name: String,
    #[serde(default)]
    pub registry: String,
    pub image: String,
    #[serde(default)]
    pub tag: String,
    /// Hostnames routed to this deployment, in rule order.
    #[serde(default)]
    pub alias: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Environment variable name → secret reference (`@ALIAS` or raw key).
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Host path → container path.
    #[serde(default)]
    pub volumes: BTreeMap<String, String>,
    /// Host port → container port.
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    /// Container port the proxy should target. When unset every mapped
    /// container port gets its own proxy service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
    /// Serve over TLS and redirect plain HTTP.
    #[serde(default)]
    pub secure: bool,
    /// Internal deployments are never routed by hostname.
    #[serde(default)]
    pub internal: bool,
    /// Average requests per second allowed by the proxy.
    #[serde(default)]
    pub rate_limit: u32,
    /// Number of containers to run.
    #[serde(default)]
    pub scale: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
}

impl DeploymentConfig {
    /// Minimal config with only the required fields set.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: String::new(),
            image: image.into(),
            tag: String::new(),
            alias: Vec::new(),
            env: BTreeMap::new(),
            secrets: BTreeMap::new(),
            volumes: BTreeMap::new(),
            ports: BTreeMap::new(),
            target_port: None,
            secure: false,
            internal: false,
            rate_limit: 0,
            scale: 0,
            command: Vec::new(),
            entrypoint: Vec::new(),
        }
    }

    /// Check required fields and value formats.
    pub fn validate(&self) -> DeploymentResult<()> {
        if self.name.is_empty() {
            return Err(DeploymentError::Validation("name is required".into()));
        }
        if !NAME_PATTERN.is_match(&self.name) {
            return Err(DeploymentError::Validation(format!(
                "name {:?} must be lowercase alphanumeric with '-' or '_'",
                self.name
            )));
        }
        if self.image.trim().is_empty() {
            return Err(DeploymentError::Validation("image is required".into()));
        }
        for (host, container) in &self.ports {
            parse_port(host)?;
            parse_port(container)?;
        }
        if let Some(port) = &self.target_port {
            parse_port(port)?;
        }
        for (host, container) in &self.volumes {
            if host.is_empty() || container.is_empty() {
                return Err(DeploymentError::Validation(
                    "volume paths must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Fill in defaults for optional fields left empty.
    pub fn apply_defaults(&mut self) {
        if self.tag.is_empty() {
            self.tag = DEFAULT_TAG.to_string();
        }
        if self.registry.is_empty() {
            self.registry = DEFAULT_REGISTRY.to_string();
        }
        if self.scale == 0 {
            self.scale = DEFAULT_SCALE;
        }
        self.alias.retain(|a| !a.trim().is_empty());
    }

    /// Fully qualified image reference, e.g. `docker.io/nginx:latest`.
    pub fn image_ref(&self) -> String {
        let image = if self.registry.is_empty() {
            self.image.clone()
        } else {
            format!("{}/{}", self.registry, self.image)
        };
        if self.tag.is_empty() {
            image
        } else {
            format!("{image}:{}", self.tag)
        }
    }

    /// Hostnames the proxy should route here (none for internal deployments).
    pub fn routed_aliases(&self) -> &[String] {
        if self.internal { &[] } else { &self.alias }
    }
}

fn parse_port(value: &str) -> DeploymentResult<u16> {
    value
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| DeploymentError::Validation(format!("invalid port {value:?}")))
}

/// Persists deployment configurations in the `deployments` collection.
#[derive(Clone)]
pub struct ConfigStore {
    store: StateStore,
}

impl ConfigStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Validate, default and persist a config. Returns the stored record.
    ///
    /// Nothing is written when validation fails.
    pub fn save(&self, mut config: DeploymentConfig) -> DeploymentResult<DeploymentConfig> {
        config.validate()?;
        config.apply_defaults();
        self.store.put_json(DEPLOYMENTS, &config.name, &config)?;
        debug!(deployment = %config.name, image = %config.image_ref(), "deployment config saved");
        Ok(config)
    }

    /// Get a config by deployment name.
    pub fn get(&self, name: &str) -> DeploymentResult<DeploymentConfig> {
        self.store
            .get_json(DEPLOYMENTS, name)?
            .ok_or_else(|| DeploymentError::NotFound(name.to_string()))
    }

    /// Check whether a deployment is registered.
    pub fn exists(&self, name: &str) -> DeploymentResult<bool> {
        Ok(self.store.get(DEPLOYMENTS, name)?.is_some())
    }

    /// List every config. Records that fail to deserialize are skipped.
    pub fn get_all(&self) -> DeploymentResult<Vec<DeploymentConfig>> {
        let mut configs = Vec::new();
        for bytes in self.store.get_all(DEPLOYMENTS)? {
            match serde_json::from_slice::<DeploymentConfig>(&bytes) {
                Ok(config) => configs.push(config),
                Err(e) => warn!(error = %e, "skipping unreadable deployment config"),
            }
        }
        Ok(configs)
    }

    /// Remove a config. Secrets and containers are left alone.
    pub fn delete(&self, name: &str) -> DeploymentResult<bool> {
        let existed = self.store.remove(DEPLOYMENTS, name)?;
        debug!(deployment = name, existed, "deployment config deleted");
        Ok(existed)
    }
}
