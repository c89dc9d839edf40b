//! krane-reconcile: converge containers to deployment configs.
//!
//! Two actions exist, each compiled into exactly one job:
//!
//! - **Up** ([`CreateContainers`]): snapshot the deployment's current
//!   containers, create and start the new set, then tear the old set down.
//!   New containers always serve before old ones go away.
//! - **Down** ([`DeleteContainers`]): stop and remove every container
//!   carrying the deployment's namespace label, optionally purging the
//!   deployment's secrets afterwards.
//!
//! Containers are matched to deployments purely by label. Names are
//! regenerated on every create.
//!
//! [`DeploymentService`] is the entry point used by the daemon: it performs
//! the synchronous lookups and validation, then submits the job.

pub mod error;
pub mod service;
pub mod spec;
pub mod tasks;

pub use error::{ReconcileError, ReconcileResult};
pub use service::{Action, DeploymentJob, DeploymentService, JobReport, ReconcileOptions};
pub use spec::{DesiredContainer, revision};
pub use tasks::{CreateContainers, DeleteContainers, DownReport, UpReport};
