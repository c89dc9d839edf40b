//! Subcommand implementations. Every command prints JSON on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use futures_util::StreamExt;
use krane_core::KraneSettings;
use krane_deployment::DeploymentConfig;
use krane_job::JobQueue;
use krane_reconcile::{DeploymentJob, DeploymentService, ReconcileOptions};
use krane_runtime::{ContainerRecord, DockerRuntime, LogOptions};
use krane_state::StateStore;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub struct Daemon {
    store: StateStore,
    service: DeploymentService,
}

impl Daemon {
    /// Load settings, open the store and connect to Docker.
    pub async fn start(config: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut settings = KraneSettings::load(config).context("loading settings")?;
        if let Some(dir) = data_dir {
            settings.data_dir = dir;
        }

        std::fs::create_dir_all(&settings.data_dir)
            .with_context(|| format!("creating {}", settings.data_dir.display()))?;
        let db_path = settings.db_path();
        let store = open_store(
            db_path.clone(),
            Duration::from_secs(settings.store_open_timeout_secs),
        )
        .await?;
        info!(path = ?db_path, "state store opened");

        let runtime = DockerRuntime::connect(Duration::from_secs(settings.runtime.call_timeout_secs))?;
        if let Err(e) = runtime.ping().await {
            warn!(error = %e, "docker daemon not reachable");
        }

        let queue = JobQueue::new(settings.jobs.max_workers);
        let service = DeploymentService::new(
            store.clone(),
            Arc::new(runtime),
            queue,
            ReconcileOptions::from_settings(&settings),
        );
        info!(
            network = %settings.runtime.network,
            retry_policy = settings.jobs.retry_policy,
            "krane ready"
        );
        Ok(Self { store, service })
    }

    pub fn shutdown(&self) {
        self.store.shutdown();
    }

    pub async fn apply(&self, file: &Path, run: bool) -> anyhow::Result<()> {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading {}", file.display()))?;
        let config: DeploymentConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", file.display()))?;
        let saved = self.service.register(config)?;
        print_json(&json!({ "deployment": saved }))?;
        if run {
            self.wait(self.service.run(&saved.name)?).await?;
        }
        Ok(())
    }

    pub async fn up(&self, name: &str) -> anyhow::Result<()> {
        self.wait(self.service.run(name)?).await
    }

    pub async fn down(&self, name: &str) -> anyhow::Result<()> {
        self.wait(self.service.stop(name)?).await
    }

    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        self.wait(self.service.delete(name)?).await
    }

    pub async fn get(&self, name: &str) -> anyhow::Result<()> {
        let config = self.service.get(name)?;
        let containers = self.service.containers(name).await?;
        print_json(&json!({
            "deployment": config,
            "containers": containers.iter().map(container_json).collect::<Vec<_>>(),
        }))
    }

    pub fn list(&self) -> anyhow::Result<()> {
        print_json(&json!({ "deployments": self.service.list()? }))
    }

    pub fn add_secret(&self, name: &str, key: &str, value: &str) -> anyhow::Result<()> {
        let secret = self.service.add_secret(name, key, value)?;
        print_json(&json!({ "secret": secret.redacted() }))
    }

    pub fn list_secrets(&self, name: &str) -> anyhow::Result<()> {
        print_json(&json!({ "secrets": self.service.list_secrets(name)? }))
    }

    pub fn delete_secret(&self, name: &str, key: &str) -> anyhow::Result<()> {
        self.service.delete_secret(name, key)?;
        print_json(&json!({ "deleted": key }))
    }

    pub async fn logs(&self, name: &str, follow: bool, tail: usize) -> anyhow::Result<()> {
        let mut stream = self.service.logs(name, LogOptions { follow, tail }).await?;
        let mut stdout = tokio::io::stdout();
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(frame) => stdout.write_all(&frame?).await?,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        stdout.flush().await?;
        Ok(())
    }

    async fn wait(&self, job: DeploymentJob) -> anyhow::Result<()> {
        let id = job.id().to_string();
        let kind = job.kind();
        info!(job_id = %id, kind = %kind, "waiting for job");
        match job.wait().await {
            Ok(report) => print_json(&json!({ "job": id, "kind": kind.to_string(), "status": "succeeded", "report": report })),
            Err(e) => {
                print_json(&json!({ "job": id, "kind": kind.to_string(), "status": "failed", "error": e.to_string() }))?;
                bail!("job {id} failed: {e}")
            }
        }
    }
}

/// Open the state store on the blocking pool; waiting for a locked file
/// sleeps the calling thread.
async fn open_store(path: PathBuf, timeout: Duration) -> anyhow::Result<StateStore> {
    let store = tokio::task::spawn_blocking(move || StateStore::open_with_timeout(&path, timeout))
        .await
        .context("state store open task")??;
    Ok(store)
}

fn container_json(container: &ContainerRecord) -> serde_json::Value {
    json!({
        "id": container.id,
        "name": container.name,
        "image": container.image,
        "state": container.state,
        "networks": container.networks,
        "labels": container.labels,
    })
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
