//! krane-job: namespaced, retryable units of work.
//!
//! Every mutating operation on a deployment runs as a [`Job`] wrapping a
//! strongly typed [`Task`]. The [`JobQueue`] guarantees that at most one job
//! per namespace executes at any instant, in submission order, while jobs
//! for different namespaces run in parallel on a bounded worker pool.
//!
//! # Architecture
//!
//! ```text
//! JobQueue
//!   ├── lanes: namespace → FIFO channel (one drain task per busy namespace)
//!   ├── workers: semaphore bounding concurrently executing jobs
//!   └── per job
//!       ├── spawned attempt loop (Running ⟲ retry, then Succeeded | Failed)
//!       └── JobHandle (status watch + outcome)
//! ```
//!
//! Jobs are not persisted; a restart loses in-flight history.

pub mod error;
pub mod job;
pub mod queue;

pub use error::JobError;
pub use job::{Job, JobId, JobKind, JobSnapshot, JobStatus, RetryPolicy, Task};
pub use queue::{JobHandle, JobQueue};
