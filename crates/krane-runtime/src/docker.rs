//! Docker daemon adapter built on bollard.
//!
//! Every call except log streaming is bounded by the configured call
//! timeout. Containers are created with bind mounts, published TCP ports
//! and the Krane network attached.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerSummary, EndpointSettings, HostConfig, Mount,
    MountTypeEnum, PortBinding,
};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions};
use futures_util::stream::StreamExt;
use tracing::{debug, info};

use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{ContainerRecord, ContainerSpec, LogOptions, LogStream, RemoveOptions};
use crate::{ContainerRuntime, with_timeout};

pub struct DockerRuntime {
    docker: Docker,
    call_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local daemon (unix socket on Linux).
    pub fn connect(call_timeout: Duration) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self {
            docker,
            call_timeout,
        })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> RuntimeResult<()> {
        with_timeout("ping", self.call_timeout, async {
            self.docker
                .ping()
                .await
                .map(|_| ())
                .map_err(|e| RuntimeError::Unavailable(e.to_string()))
        })
        .await
    }

    async fn network_id(&self, name: &str) -> RuntimeResult<Option<String>> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => Ok(Some(network.id.unwrap_or_else(|| name.to_string()))),
            Err(e) => match RuntimeError::from(e) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        with_timeout("pull image", self.call_timeout, async {
            let options = CreateImageOptions {
                from_image: image,
                ..Default::default()
            };
            let mut progress = self.docker.create_image(Some(options), None, None);
            while let Some(update) = progress.next().await {
                let update = update?;
                if let Some(status) = update.status {
                    debug!(image, status = %status, "pull progress");
                }
            }
            info!(image, "image pulled");
            Ok(())
        })
        .await
    }

    async fn ensure_network(&self, name: &str) -> RuntimeResult<String> {
        with_timeout("ensure network", self.call_timeout, async {
            if let Some(id) = self.network_id(name).await? {
                return Ok(id);
            }
            let options = CreateNetworkOptions {
                name,
                driver: "bridge",
                check_duplicate: true,
                ..Default::default()
            };
            match self.docker.create_network(options).await {
                Ok(_) => info!(network = name, "network created"),
                // Lost a creation race; the network exists now.
                Err(e) => match RuntimeError::from(e) {
                    RuntimeError::Conflict(_) => {}
                    other => return Err(other),
                },
            }
            self.network_id(name)
                .await?
                .ok_or_else(|| RuntimeError::NotFound(format!("network {name}")))
        })
        .await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        with_timeout("create container", self.call_timeout, async {
            let options = CreateContainerOptions {
                name: spec.name.clone(),
                platform: None,
            };
            let response = self
                .docker
                .create_container(Some(options), container_config(spec))
                .await?;
            debug!(container = %spec.name, id = %response.id, "container created");
            Ok(response.id)
        })
        .await
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        with_timeout("start container", self.call_timeout, async {
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>)
                .await?;
            Ok(())
        })
        .await
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        // The daemon waits out the grace period itself.
        let limit = self.call_timeout + grace;
        with_timeout("stop container", limit, async {
            let options = StopContainerOptions {
                t: grace.as_secs() as i64,
            };
            match self.docker.stop_container(id, Some(options)).await {
                Ok(()) => Ok(()),
                // 304: already stopped.
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304,
                    ..
                }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        with_timeout("remove container", self.call_timeout, async {
            let options = RemoveContainerOptions {
                force: options.force,
                v: options.volumes,
                ..Default::default()
            };
            self.docker.remove_container(id, Some(options)).await?;
            Ok(())
        })
        .await
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerRecord> {
        with_timeout("inspect container", self.call_timeout, async {
            let detail = self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await?;
            Ok(record_from_inspect(detail))
        })
        .await
    }

    async fn list_by_label(&self, key: &str, value: &str) -> RuntimeResult<Vec<ContainerRecord>> {
        with_timeout("list containers", self.call_timeout, async {
            let filters = HashMap::from([("label".to_string(), vec![format!("{key}={value}")])]);
            let options = ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            };
            let summaries = self.docker.list_containers(Some(options)).await?;
            Ok(summaries.into_iter().map(record_from_summary).collect())
        })
        .await
    }

    async fn connect_network(&self, network: &str, id: &str) -> RuntimeResult<()> {
        with_timeout("connect network", self.call_timeout, async {
            let options = ConnectNetworkOptions {
                container: id,
                endpoint_config: EndpointSettings::default(),
            };
            self.docker.connect_network(network, options).await?;
            Ok(())
        })
        .await
    }

    async fn container_logs(&self, id: &str, options: LogOptions) -> RuntimeResult<LogStream> {
        let options = LogsOptions::<String> {
            follow: options.follow,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: options.tail.to_string(),
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|frame| {
                frame
                    .map(|output| output.into_bytes().to_vec())
                    .map_err(RuntimeError::from)
            })
            .boxed();
        Ok(stream)
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|(host, container)| Mount {
            source: Some(host.clone()),
            target: Some(container.clone()),
            typ: Some(MountTypeEnum::BIND),
            ..Default::default()
        })
        .collect();

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for (host, container) in &spec.ports {
        let key = format!("{container}/tcp");
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings
            .entry(key)
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: None,
                host_port: Some(host.clone()),
            });
    }

    let host_config = HostConfig {
        mounts: (!mounts.is_empty()).then_some(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        network_mode: spec.network.clone(),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
        entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn record_from_summary(summary: ContainerSummary) -> ContainerRecord {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let mut networks: Vec<String> = summary
        .network_settings
        .and_then(|s| s.networks)
        .map(|n| n.into_keys().collect())
        .unwrap_or_default();
    networks.sort();

    ContainerRecord {
        id: summary.id.unwrap_or_default(),
        name,
        image: summary.image.unwrap_or_default(),
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
        networks,
        state: summary.state.unwrap_or_default(),
    }
}

fn record_from_inspect(detail: ContainerInspectResponse) -> ContainerRecord {
    let (image, labels) = detail
        .config
        .map(|c| {
            (
                c.image.unwrap_or_default(),
                c.labels.unwrap_or_default().into_iter().collect(),
            )
        })
        .unwrap_or_default();
    let state = detail
        .state
        .and_then(|s| s.status)
        .map(|s| s.to_string())
        .unwrap_or_default();
    let mut networks: Vec<String> = detail
        .network_settings
        .and_then(|s| s.networks)
        .map(|n| n.into_keys().collect())
        .unwrap_or_default();
    networks.sort();

    ContainerRecord {
        id: detail.id.unwrap_or_default(),
        name: detail
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image,
        labels,
        networks,
        state,
    }
}
