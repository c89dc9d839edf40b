//! Reconciliation error types.

use krane_deployment::DeploymentError;
use krane_runtime::RuntimeError;
use krane_state::StateError;
use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Deployment(DeploymentError),
}

impl ReconcileError {
    /// Errors a caller can fix by changing the request; never retried.
    pub fn is_client_error(&self) -> bool {
        match self {
            ReconcileError::Validation(_) | ReconcileError::NotFound(_) => true,
            ReconcileError::Deployment(e) => matches!(
                e,
                DeploymentError::InvalidSecretKey(_)
                    | DeploymentError::Conflict { .. }
                    | DeploymentError::SecretNotFound { .. }
            ),
            _ => false,
        }
    }
}

impl From<DeploymentError> for ReconcileError {
    fn from(e: DeploymentError) -> Self {
        match e {
            DeploymentError::Validation(msg) => ReconcileError::Validation(msg),
            DeploymentError::NotFound(name) => ReconcileError::NotFound(format!("deployment {name}")),
            DeploymentError::State(e) => ReconcileError::State(e),
            other => ReconcileError::Deployment(other),
        }
    }
}
