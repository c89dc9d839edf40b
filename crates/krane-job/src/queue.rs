//! Per-namespace job queue.
//!
//! Each busy namespace owns a lane: an unbounded FIFO channel drained by a
//! single task. A lane exists only while it has work; the drain task removes
//! it from the lane map (under the map lock) once the channel is empty, so a
//! submission either lands in a live lane or starts a fresh one.
//!
//! Every job runs inside its own spawned task. A panicking job fails that
//! job alone; the lane carries on with the next submission.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tracing::{debug, error};

use crate::error::JobError;
use crate::job::{Job, JobId, JobKind, JobSnapshot, JobStatus, Task, run_with_retry};

type Runnable = Pin<Box<dyn Future<Output = ()> + Send>>;

type Outcome<T> = Result<<T as Task>::Output, JobError<<T as Task>::Error>>;

struct Inner {
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Runnable>>>,
    workers: Arc<Semaphore>,
}

/// Queue of jobs, serialized per namespace and parallel across namespaces.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Create a queue running at most `max_workers` jobs at once.
    ///
    /// Must be called from within a Tokio runtime before the first submit.
    pub fn new(max_workers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(max_workers.max(1))),
            }),
        }
    }

    /// Enqueue a job behind any earlier jobs of the same namespace.
    pub fn submit<T: Task>(&self, job: Job<T>) -> JobHandle<T> {
        let id = job.id.clone();
        let namespace = job.namespace.clone();
        let kind = job.kind;

        let (progress_tx, progress_rx) = watch::channel(JobSnapshot {
            status: JobStatus::Queued,
            attempts: 0,
        });
        let (outcome_tx, outcome_rx) = oneshot::channel::<Outcome<T>>();
        let progress = Arc::new(progress_tx);

        let runnable: Runnable = Box::pin({
            let id = id.clone();
            let namespace = namespace.clone();
            async move {
                let attempt_progress = Arc::clone(&progress);
                let outcome = match tokio::spawn(run_with_retry(job, attempt_progress)).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        error!(job_id = %id, namespace = %namespace, error = %join_err, "job panicked");
                        Err(JobError::Panicked(join_err.to_string()))
                    }
                };
                let status = if outcome.is_ok() {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Failed
                };
                progress.send_modify(|snapshot| snapshot.status = status);
                // The submitter may have dropped its handle.
                let _ = outcome_tx.send(outcome);
            }
        });

        self.enqueue(&namespace, runnable);
        debug!(job_id = %id, namespace = %namespace, kind = %kind, "job queued");

        JobHandle {
            id,
            namespace,
            kind,
            progress: progress_rx,
            outcome: outcome_rx,
        }
    }

    /// Namespaces with queued or running jobs.
    pub fn active_namespaces(&self) -> Vec<String> {
        let lanes = self.inner.lanes.lock().expect("lanes lock");
        let mut namespaces: Vec<String> = lanes.keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Whether a namespace has queued or running jobs.
    pub fn is_busy(&self, namespace: &str) -> bool {
        let lanes = self.inner.lanes.lock().expect("lanes lock");
        lanes.contains_key(namespace)
    }

    fn enqueue(&self, namespace: &str, runnable: Runnable) {
        let mut lanes = self.inner.lanes.lock().expect("lanes lock");
        if let Some(lane) = lanes.get(namespace) {
            // Lanes are removed from the map before their receiver drops,
            // so a lane still in the map always accepts work.
            match lane.send(runnable) {
                Ok(()) => return,
                Err(mpsc::error::SendError(runnable)) => {
                    lanes.remove(namespace);
                    self.open_lane(&mut lanes, namespace, runnable);
                    return;
                }
            }
        }
        self.open_lane(&mut lanes, namespace, runnable);
    }

    fn open_lane(
        &self,
        lanes: &mut HashMap<String, mpsc::UnboundedSender<Runnable>>,
        namespace: &str,
        runnable: Runnable,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Fresh channel with the receiver in hand: cannot fail.
        let _ = tx.send(runnable);
        lanes.insert(namespace.to_string(), tx);
        debug!(namespace, "job lane opened");
        tokio::spawn(drain_lane(
            Arc::clone(&self.inner),
            namespace.to_string(),
            rx,
        ));
    }
}

async fn drain_lane(inner: Arc<Inner>, namespace: String, mut rx: mpsc::UnboundedReceiver<Runnable>) {
    loop {
        let runnable = match rx.try_recv() {
            Ok(runnable) => runnable,
            Err(_) => {
                let mut lanes = inner.lanes.lock().expect("lanes lock");
                // Re-check under the lock so a concurrent submit is not lost.
                match rx.try_recv() {
                    Ok(runnable) => runnable,
                    Err(_) => {
                        lanes.remove(&namespace);
                        debug!(namespace = %namespace, "job lane closed");
                        return;
                    }
                }
            }
        };

        let Ok(_permit) = Arc::clone(&inner.workers).acquire_owned().await else {
            // The semaphore is never closed while the queue is alive.
            return;
        };
        runnable.await;
    }
}

/// Handle to a submitted job.
pub struct JobHandle<T: Task> {
    id: JobId,
    namespace: String,
    kind: JobKind,
    progress: watch::Receiver<JobSnapshot>,
    outcome: oneshot::Receiver<Outcome<T>>,
}

impl<T: Task> JobHandle<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Current status of the job.
    pub fn status(&self) -> JobStatus {
        self.progress.borrow().status
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.progress.borrow().attempts
    }

    /// Subscribe to status changes.
    pub fn watch(&self) -> watch::Receiver<JobSnapshot> {
        self.progress.clone()
    }

    /// Wait for the job to finish and take its result.
    pub async fn wait(self) -> Outcome<T> {
        self.outcome.await.unwrap_or(Err(JobError::Dropped))
    }
}

impl<T: Task> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("progress", &*self.progress.borrow())
            .finish()
    }
}
