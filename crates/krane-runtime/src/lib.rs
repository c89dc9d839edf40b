//! krane-runtime: the container engine seen through one trait.
//!
//! [`ContainerRuntime`] is the only way the rest of Krane touches
//! containers. [`DockerRuntime`] talks to the local Docker daemon through
//! bollard; [`InMemoryRuntime`] keeps containers in a map and is what the
//! reconciliation tests run against.

pub mod docker;
pub mod error;
pub mod memory;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::InMemoryRuntime;
pub use types::{ContainerRecord, ContainerSpec, LogOptions, LogStream, RemoveOptions};

/// Operations Krane needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image reference such as `docker.io/nginx:latest`.
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Make sure a bridge network exists and return its id.
    async fn ensure_network(&self, name: &str) -> RuntimeResult<String>;

    /// Create (but do not start) a container. Returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Stop a container, killing it once `grace` has elapsed.
    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerRecord>;

    /// All containers, running or not, carrying `key=value`.
    async fn list_by_label(&self, key: &str, value: &str) -> RuntimeResult<Vec<ContainerRecord>>;

    async fn connect_network(&self, network: &str, id: &str) -> RuntimeResult<()>;

    async fn container_logs(&self, id: &str, options: LogOptions) -> RuntimeResult<LogStream>;
}

/// Bound a runtime call by `limit`.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, call: F) -> RuntimeResult<T>
where
    F: Future<Output = RuntimeResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::Timeout {
            operation: operation.to_string(),
            limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let result: RuntimeResult<()> = with_timeout("pull", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RuntimeError::Timeout { ref operation, .. }) if operation == "pull"));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let result = with_timeout("inspect", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
