//! In-memory container runtime.
//!
//! Behaves like a tiny Docker: images must be pulled before use, container
//! names are unique, removing a running container needs `force`. Failures
//! can be scripted per operation to exercise retry paths, including calls
//! that take effect but whose reply is lost.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::ContainerRuntime;
use crate::error::{RuntimeError, RuntimeResult};
use crate::types::{ContainerRecord, ContainerSpec, LogOptions, LogStream, RemoveOptions};

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Pull,
    EnsureNetwork,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    List,
    Connect,
    Logs,
}

#[derive(Default)]
struct State {
    images: BTreeSet<String>,
    networks: BTreeMap<String, String>,
    containers: BTreeMap<String, ContainerRecord>,
    logs: HashMap<String, Vec<Vec<u8>>>,
    failures: HashMap<Op, u32>,
    lost_replies: HashMap<Op, u32>,
    calls: Vec<String>,
    next_id: u64,
}

#[derive(Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: Op, times: u32) {
        let mut state = self.state.lock().expect("runtime state lock");
        *state.failures.entry(op).or_default() += times;
    }

    /// Make the next `times` calls of `op` take effect, then report a
    /// timeout as if the reply never arrived.
    pub fn lose_next_reply(&self, op: Op, times: u32) {
        let mut state = self.state.lock().expect("runtime state lock");
        *state.lost_replies.entry(op).or_default() += times;
    }

    /// Every container, in id order.
    pub fn containers(&self) -> Vec<ContainerRecord> {
        let state = self.state.lock().expect("runtime state lock");
        state.containers.values().cloned().collect()
    }

    pub fn networks(&self) -> Vec<String> {
        let state = self.state.lock().expect("runtime state lock");
        state.networks.keys().cloned().collect()
    }

    pub fn has_image(&self, image: &str) -> bool {
        let state = self.state.lock().expect("runtime state lock");
        state.images.contains(image)
    }

    /// Calls made so far, formatted as `op:subject`.
    pub fn calls(&self) -> Vec<String> {
        let state = self.state.lock().expect("runtime state lock");
        state.calls.clone()
    }

    /// Queue log output for a container.
    pub fn push_log(&self, id: &str, line: &str) {
        let mut state = self.state.lock().expect("runtime state lock");
        state
            .logs
            .entry(id.to_string())
            .or_default()
            .push(line.as_bytes().to_vec());
    }

    fn enter(&self, op: Op, subject: &str) -> RuntimeResult<std::sync::MutexGuard<'_, State>> {
        let mut state = self.state.lock().expect("runtime state lock");
        state.calls.push(format!("{op:?}:{subject}").to_lowercase());
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RuntimeError::Docker(format!("injected {op:?} failure")));
            }
        }
        Ok(state)
    }
}

fn lost_reply(state: &mut State, op: Op) -> RuntimeResult<()> {
    match state.lost_replies.get_mut(&op) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            Err(RuntimeError::Timeout {
                operation: format!("{op:?}").to_lowercase(),
                limit: Duration::ZERO,
            })
        }
        _ => Ok(()),
    }
}

fn missing(id: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("container {id}"))
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let mut state = self.enter(Op::Pull, image)?;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> RuntimeResult<String> {
        let mut state = self.enter(Op::EnsureNetwork, name)?;
        let id = format!("net-{name}");
        Ok(state.networks.entry(name.to_string()).or_insert(id).clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut state = self.enter(Op::Create, &spec.name)?;
        if !state.images.contains(&spec.image) {
            return Err(RuntimeError::NotFound(format!("image {}", spec.image)));
        }
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        let record = ContainerRecord {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            labels: spec.labels.clone(),
            networks: spec.network.iter().cloned().collect(),
            state: "created".into(),
        };
        state.containers.insert(id.clone(), record);
        lost_reply(&mut state, Op::Create)?;
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.enter(Op::Start, id)?;
        let record = state.containers.get_mut(id).ok_or_else(|| missing(id))?;
        record.state = "running".into();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> RuntimeResult<()> {
        let mut state = self.enter(Op::Stop, id)?;
        let record = state.containers.get_mut(id).ok_or_else(|| missing(id))?;
        record.state = "exited".into();
        Ok(())
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()> {
        let mut state = self.enter(Op::Remove, id)?;
        let running = state
            .containers
            .get(id)
            .map(ContainerRecord::is_running)
            .ok_or_else(|| missing(id))?;
        if running && !options.force {
            return Err(RuntimeError::Conflict(format!(
                "container {id} is running"
            )));
        }
        state.containers.remove(id);
        state.logs.remove(id);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerRecord> {
        let state = self.enter(Op::Inspect, id)?;
        state.containers.get(id).cloned().ok_or_else(|| missing(id))
    }

    async fn list_by_label(&self, key: &str, value: &str) -> RuntimeResult<Vec<ContainerRecord>> {
        let state = self.enter(Op::List, &format!("{key}={value}"))?;
        Ok(state
            .containers
            .values()
            .filter(|c| c.label(key) == Some(value))
            .cloned()
            .collect())
    }

    async fn connect_network(&self, network: &str, id: &str) -> RuntimeResult<()> {
        let mut state = self.enter(Op::Connect, id)?;
        if !state.networks.contains_key(network) {
            return Err(RuntimeError::NotFound(format!("network {network}")));
        }
        let record = state.containers.get_mut(id).ok_or_else(|| missing(id))?;
        if !record.networks.iter().any(|n| n == network) {
            record.networks.push(network.to_string());
            record.networks.sort();
        }
        Ok(())
    }

    async fn container_logs(&self, id: &str, options: LogOptions) -> RuntimeResult<LogStream> {
        let state = self.enter(Op::Logs, id)?;
        if !state.containers.contains_key(id) {
            return Err(missing(id));
        }
        let lines = state.logs.get(id).cloned().unwrap_or_default();
        let skip = lines.len().saturating_sub(options.tail);
        let frames: Vec<RuntimeResult<Vec<u8>>> = lines.into_iter().skip(skip).map(Ok).collect();
        Ok(stream::iter(frames).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: "docker.io/nginx:latest".into(),
            labels: BTreeMap::from([("krane.deployment.namespace".into(), "api".into())]),
            network: Some("krane".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_requires_pulled_image() {
        let runtime = InMemoryRuntime::new();
        assert!(matches!(
            runtime.create_container(&spec("api-1")).await,
            Err(RuntimeError::NotFound(_))
        ));

        runtime.pull_image("docker.io/nginx:latest").await.unwrap();
        let id = runtime.create_container(&spec("api-1")).await.unwrap();
        assert_eq!(runtime.inspect_container(&id).await.unwrap().state, "created");
    }

    #[tokio::test]
    async fn container_names_are_unique() {
        let runtime = InMemoryRuntime::new();
        runtime.pull_image("docker.io/nginx:latest").await.unwrap();
        runtime.create_container(&spec("api-1")).await.unwrap();
        assert!(matches!(
            runtime.create_container(&spec("api-1")).await,
            Err(RuntimeError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn lifecycle_and_label_listing() {
        let runtime = InMemoryRuntime::new();
        runtime.pull_image("docker.io/nginx:latest").await.unwrap();
        runtime.ensure_network("krane").await.unwrap();
        let id = runtime.create_container(&spec("api-1")).await.unwrap();
        runtime.start_container(&id).await.unwrap();

        let listed = runtime
            .list_by_label("krane.deployment.namespace", "api")
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_running());
        assert!(runtime
            .list_by_label("krane.deployment.namespace", "web")
            .await
            .unwrap()
            .is_empty());

        let unforced = RemoveOptions {
            force: false,
            volumes: true,
        };
        assert!(runtime.remove_container(&id, unforced).await.is_err());
        runtime.stop_container(&id, Duration::from_secs(60)).await.unwrap();
        runtime.remove_container(&id, unforced).await.unwrap();
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn ensure_network_is_idempotent() {
        let runtime = InMemoryRuntime::new();
        let first = runtime.ensure_network("krane").await.unwrap();
        let second = runtime.ensure_network("krane").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runtime.networks(), vec!["krane"]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let runtime = InMemoryRuntime::new();
        runtime.fail_next(Op::Pull, 2);
        assert!(runtime.pull_image("nginx").await.is_err());
        assert!(runtime.pull_image("nginx").await.is_err());
        runtime.pull_image("nginx").await.unwrap();
        assert!(runtime.has_image("nginx"));
        assert_eq!(runtime.calls(), vec!["pull:nginx"; 3]);
    }

    #[tokio::test]
    async fn lost_create_reply_still_creates() {
        let runtime = InMemoryRuntime::new();
        runtime.pull_image("docker.io/nginx:latest").await.unwrap();
        runtime.lose_next_reply(Op::Create, 1);

        assert!(matches!(
            runtime.create_container(&spec("api-1")).await,
            Err(RuntimeError::Timeout { .. })
        ));
        assert_eq!(runtime.containers().len(), 1);
        runtime.create_container(&spec("api-2")).await.unwrap();
        assert_eq!(runtime.containers().len(), 2);
    }

    #[tokio::test]
    async fn logs_respect_tail() {
        let runtime = InMemoryRuntime::new();
        runtime.pull_image("docker.io/nginx:latest").await.unwrap();
        let id = runtime.create_container(&spec("api-1")).await.unwrap();
        for line in ["one", "two", "three"] {
            runtime.push_log(&id, line);
        }

        let frames: Vec<Vec<u8>> = runtime
            .container_logs(&id, LogOptions { follow: false, tail: 2 })
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec![b"two".to_vec(), b"three".to_vec()]);
    }
}
