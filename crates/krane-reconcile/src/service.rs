//! Deployment service: the operations exposed to the daemon.
//!
//! Lookups and validation happen synchronously and fail fast; container
//! work is handed to the job queue and observed through a
//! [`DeploymentJob`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use krane_core::{KraneSettings, NAMESPACE_LABEL};
use krane_deployment::{ConfigStore, DeploymentConfig, Secret, SecretsStore};
use krane_job::{Job, JobError, JobHandle, JobKind, JobQueue, JobStatus, RetryPolicy};
use krane_runtime::{ContainerRecord, ContainerRuntime, LogOptions, LogStream};
use krane_state::StateStore;
use serde::Serialize;
use tracing::info;

use crate::error::{ReconcileError, ReconcileResult};
use crate::spec::DesiredContainer;
use crate::tasks::{CreateContainers, DeleteContainers, DownReport, UpReport};

/// What a job does to a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create resources.
    Up,
    /// Remove resources.
    Down,
}

/// Knobs of the reconciliation engine.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub retry: RetryPolicy,
    pub network: String,
    pub stop_grace: Duration,
    pub pull_images: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::none(),
            network: "krane".to_string(),
            stop_grace: Duration::from_secs(60),
            pull_images: true,
        }
    }
}

impl ReconcileOptions {
    pub fn from_settings(settings: &KraneSettings) -> Self {
        Self {
            retry: RetryPolicy::new(
                settings.jobs.retry_policy,
                Duration::from_millis(settings.jobs.retry_delay_ms),
            ),
            network: settings.runtime.network.clone(),
            stop_grace: Duration::from_secs(settings.runtime.stop_grace_secs),
            pull_images: settings.runtime.pull_images,
        }
    }
}

/// Terminal result of a deployment job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum JobReport {
    Up(UpReport),
    Down(DownReport),
}

/// A submitted Up or Down job.
#[derive(Debug)]
pub enum DeploymentJob {
    Up(JobHandle<CreateContainers>),
    Down(JobHandle<DeleteContainers>),
}

impl DeploymentJob {
    pub fn id(&self) -> &str {
        match self {
            DeploymentJob::Up(h) => h.id(),
            DeploymentJob::Down(h) => h.id(),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            DeploymentJob::Up(h) => h.kind(),
            DeploymentJob::Down(h) => h.kind(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            DeploymentJob::Up(h) => h.status(),
            DeploymentJob::Down(h) => h.status(),
        }
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Result<JobReport, JobError<ReconcileError>> {
        match self {
            DeploymentJob::Up(h) => h.wait().await.map(JobReport::Up),
            DeploymentJob::Down(h) => h.wait().await.map(JobReport::Down),
        }
    }
}

/// Deployment operations backed by the stores, the runtime and the queue.
#[derive(Clone)]
pub struct DeploymentService {
    configs: ConfigStore,
    secrets: SecretsStore,
    runtime: Arc<dyn ContainerRuntime>,
    queue: JobQueue,
    options: ReconcileOptions,
}

impl DeploymentService {
    pub fn new(
        store: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
        queue: JobQueue,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            configs: ConfigStore::new(store.clone()),
            secrets: SecretsStore::new(store),
            runtime,
            queue,
            options,
        }
    }

    /// Save a new or existing config and provision its secrets collection.
    pub fn register(&self, config: DeploymentConfig) -> ReconcileResult<DeploymentConfig> {
        let saved = self.configs.save(config)?;
        self.secrets.create_collection(&saved.name)?;
        info!(deployment = %saved.name, "deployment registered");
        Ok(saved)
    }

    /// Replace the config of a registered deployment.
    pub fn update(&self, config: DeploymentConfig) -> ReconcileResult<DeploymentConfig> {
        if !self.configs.exists(&config.name)? {
            return Err(ReconcileError::NotFound(format!("deployment {}", config.name)));
        }
        Ok(self.configs.save(config)?)
    }

    pub fn get(&self, name: &str) -> ReconcileResult<DeploymentConfig> {
        Ok(self.configs.get(name)?)
    }

    pub fn list(&self) -> ReconcileResult<Vec<DeploymentConfig>> {
        Ok(self.configs.get_all()?)
    }

    /// Build and submit the job for `action`.
    ///
    /// Unresolvable secret references fail here, before anything is queued.
    pub fn submit(&self, action: Action, config: &DeploymentConfig) -> ReconcileResult<DeploymentJob> {
        let job = match action {
            Action::Up => {
                let secret_env = self.secrets.resolve_env(&config.name, &config.secrets)?;
                let desired = DesiredContainer::from_config(config, secret_env, &self.options.network);
                let task = CreateContainers::new(
                    desired,
                    Arc::clone(&self.runtime),
                    self.options.stop_grace,
                    self.options.pull_images,
                );
                DeploymentJob::Up(self.queue.submit(Job::new(&config.name, self.options.retry, task)))
            }
            Action::Down => DeploymentJob::Down(self.queue.submit(Job::new(
                &config.name,
                self.options.retry,
                self.delete_task(&config.name),
            ))),
        };
        info!(deployment = %config.name, job_id = %job.id(), kind = %job.kind(), "deployment job submitted");
        Ok(job)
    }

    /// Converge the deployment's containers to its config.
    pub fn run(&self, name: &str) -> ReconcileResult<DeploymentJob> {
        let config = self.configs.get(name)?;
        self.submit(Action::Up, &config)
    }

    /// Remove the deployment's containers, keeping config and secrets.
    pub fn stop(&self, name: &str) -> ReconcileResult<DeploymentJob> {
        let config = self.configs.get(name)?;
        self.submit(Action::Down, &config)
    }

    /// Delete the config, then remove the containers and the secrets
    /// collection in a queued job.
    ///
    /// The config goes first so later `run` or `stop` calls fail with
    /// `NotFound` instead of queueing behind the removal.
    pub fn delete(&self, name: &str) -> ReconcileResult<DeploymentJob> {
        let config = self.configs.get(name)?;
        self.configs.delete(&config.name)?;
        let task = self
            .delete_task(&config.name)
            .with_purge(self.secrets.clone());
        let handle = self.queue.submit(Job::new(&config.name, self.options.retry, task));
        info!(deployment = %config.name, job_id = %handle.id(), "deployment delete submitted");
        Ok(DeploymentJob::Down(handle))
    }

    /// Containers currently labelled with the deployment.
    pub async fn containers(&self, name: &str) -> ReconcileResult<Vec<ContainerRecord>> {
        self.configs.get(name)?;
        Ok(self.runtime.list_by_label(NAMESPACE_LABEL, name).await?)
    }

    /// Interleaved logs of every container of the deployment.
    pub async fn logs(&self, name: &str, options: LogOptions) -> ReconcileResult<LogStream> {
        let containers = self.containers(name).await?;
        let mut streams = Vec::with_capacity(containers.len());
        for container in &containers {
            streams.push(self.runtime.container_logs(&container.id, options).await?);
        }
        Ok(stream::select_all(streams).boxed())
    }

    pub fn add_secret(&self, name: &str, key: &str, value: &str) -> ReconcileResult<Secret> {
        self.configs.get(name)?;
        Ok(self.secrets.add(name, key, value)?)
    }

    /// Secrets of a deployment with values redacted.
    pub fn list_secrets(&self, name: &str) -> ReconcileResult<Vec<Secret>> {
        self.configs.get(name)?;
        Ok(self.secrets.get_all_redacted(name)?)
    }

    pub fn delete_secret(&self, name: &str, key: &str) -> ReconcileResult<()> {
        self.configs.get(name)?;
        Ok(self.secrets.delete(name, key)?)
    }

    fn delete_task(&self, name: &str) -> DeleteContainers {
        DeleteContainers::new(name, Arc::clone(&self.runtime), self.options.stop_grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krane_deployment::secrets::REDACTED;
    use krane_runtime::InMemoryRuntime;

    fn service() -> (DeploymentService, Arc<InMemoryRuntime>) {
        let runtime = Arc::new(InMemoryRuntime::new());
        let service = DeploymentService::new(
            StateStore::open_in_memory().unwrap(),
            runtime.clone(),
            JobQueue::new(4),
            ReconcileOptions::default(),
        );
        (service, runtime)
    }

    #[tokio::test]
    async fn run_unknown_deployment_is_rejected_synchronously() {
        let (service, runtime) = service();
        assert!(matches!(service.run("ghost"), Err(ReconcileError::NotFound(_))));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_persisting() {
        let (service, _) = service();
        let err = service.register(DeploymentConfig::new("api", "")).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.is_client_error());
        assert!(service.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unresolved_secret_reference_fails_before_queueing() {
        let (service, runtime) = service();
        let mut config = DeploymentConfig::new("api", "nginx");
        config.secrets.insert("TOKEN".into(), "@API_TOKEN".into());
        service.register(config).unwrap();

        assert!(matches!(service.run("api"), Err(ReconcileError::Validation(_))));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn secrets_are_injected_and_listed_redacted() {
        let (service, runtime) = service();
        let mut config = DeploymentConfig::new("api", "nginx");
        config.secrets.insert("TOKEN".into(), "@API_TOKEN".into());
        service.register(config).unwrap();
        let secret = service.add_secret("api", "api-token", "s3cret").unwrap();
        assert_eq!(secret.alias, "@API_TOKEN");

        service.run("api").unwrap().wait().await.unwrap();
        assert_eq!(runtime.containers().len(), 1);

        let listed = service.list_secrets("api").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, REDACTED);
    }

    #[tokio::test]
    async fn update_requires_registration() {
        let (service, _) = service();
        assert!(matches!(
            service.update(DeploymentConfig::new("api", "nginx")),
            Err(ReconcileError::NotFound(_))
        ));
        service.register(DeploymentConfig::new("api", "nginx")).unwrap();
        let updated = service.update(DeploymentConfig::new("api", "httpd")).unwrap();
        assert_eq!(service.get("api").unwrap(), updated);
    }

    #[test]
    fn options_follow_settings() {
        let mut settings = KraneSettings::default();
        settings.jobs.retry_policy = 4;
        settings.runtime.network = "edge".into();
        let options = ReconcileOptions::from_settings(&settings);
        assert_eq!(options.retry.max_attempts(), 5);
        assert_eq!(options.network, "edge");
        assert_eq!(options.stop_grace, Duration::from_secs(60));
    }
}
