//! Job model: what runs, where it is serialized, and how often it may retry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::JobError;

/// Unique job identifier (UUID v4).
pub type JobId = String;

/// What a job does to a deployment's containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ContainerCreate,
    ContainerDelete,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::ContainerCreate => write!(f, "container-create"),
            JobKind::ContainerDelete => write!(f, "container-delete"),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Observable progress of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// Attempts started so far.
    pub attempts: u32,
}

/// How many times a failed task is re-run, and the pause between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Run once, never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Total attempts: `max_retries + 1`, capped at `u32::MAX`.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// A unit of work executed by the queue.
///
/// The task is borrowed mutably for every attempt, so state gathered by an
/// early attempt (for example a snapshot of the containers to replace) is
/// still available when the job is retried.
#[async_trait]
pub trait Task: Send + 'static {
    type Output: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn kind(&self) -> JobKind;

    async fn run(&mut self) -> Result<Self::Output, Self::Error>;
}

/// A task bound to a namespace and a retry policy.
pub struct Job<T: Task> {
    pub id: JobId,
    pub namespace: String,
    pub kind: JobKind,
    pub retry: RetryPolicy,
    pub task: T,
}

impl<T: Task> Job<T> {
    pub fn new(namespace: impl Into<String>, retry: RetryPolicy, task: T) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            namespace: namespace.into(),
            kind: task.kind(),
            retry,
            task,
        }
    }
}

impl<T: Task> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Run a job's task until it succeeds or its attempts are used up.
pub(crate) async fn run_with_retry<T: Task>(
    mut job: Job<T>,
    progress: Arc<watch::Sender<JobSnapshot>>,
) -> Result<T::Output, JobError<T::Error>> {
    let max_attempts = job.retry.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        progress.send_replace(JobSnapshot {
            status: JobStatus::Running,
            attempts: attempt,
        });
        debug!(
            job_id = %job.id,
            namespace = %job.namespace,
            kind = %job.kind,
            attempt,
            max_attempts,
            "job attempt starting"
        );

        match job.task.run().await {
            Ok(output) => {
                info!(
                    job_id = %job.id,
                    namespace = %job.namespace,
                    kind = %job.kind,
                    attempts = attempt,
                    "job succeeded"
                );
                return Ok(output);
            }
            Err(e) if attempt < max_attempts => {
                warn!(
                    job_id = %job.id,
                    namespace = %job.namespace,
                    kind = %job.kind,
                    attempt,
                    error = %e,
                    "job attempt failed, retrying"
                );
                if !job.retry.delay.is_zero() {
                    tokio::time::sleep(job.retry.delay).await;
                }
            }
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    namespace = %job.namespace,
                    kind = %job.kind,
                    attempts = attempt,
                    error = %e,
                    "job failed"
                );
                return Err(JobError::RetriesExhausted {
                    attempts: attempt,
                    last: e,
                });
            }
        }
    }
}
