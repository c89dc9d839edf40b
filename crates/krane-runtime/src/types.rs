//! Runtime-neutral container descriptions.

use std::collections::BTreeMap;

use futures_util::stream::BoxStream;

use crate::error::RuntimeResult;

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    /// Fully qualified image reference.
    pub image: String,
    /// `NAME=value` pairs.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Host path → container path, bind mounted.
    pub mounts: BTreeMap<String, String>,
    /// Host port → container port (TCP).
    pub ports: BTreeMap<String, String>,
    /// Network joined at creation time.
    pub network: Option<String>,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
}

/// What the runtime reports about an existing container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    /// Names of attached networks.
    pub networks: Vec<String>,
    /// Engine-reported state, e.g. `running` or `exited`.
    pub state: String,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container if it is still running.
    pub force: bool,
    /// Remove anonymous volumes with the container.
    pub volumes: bool,
}

impl Default for RemoveOptions {
    fn default() -> Self {
        Self {
            force: true,
            volumes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    /// Number of trailing lines to start from.
    pub tail: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: true,
            tail: 50,
        }
    }
}

/// Raw log frames, stdout and stderr interleaved.
pub type LogStream = BoxStream<'static, RuntimeResult<Vec<u8>>>;
