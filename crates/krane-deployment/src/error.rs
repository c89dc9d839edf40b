//! Error types for the configuration and secrets stores.

use krane_state::StateError;
use thiserror::Error;

/// Result type alias for configuration and secrets operations.
pub type DeploymentResult<T> = Result<T, DeploymentError>;

/// Errors raised by the configuration and secrets stores.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("invalid deployment config: {0}")]
    Validation(String),

    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("secret {key} not found for deployment {namespace}")]
    SecretNotFound { namespace: String, key: String },

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("secret alias {alias} is already used by key {existing}")]
    Conflict { alias: String, existing: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
