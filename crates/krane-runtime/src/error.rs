//! Runtime error types.

use std::time::Duration;

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{operation} timed out after {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("docker error: {0}")]
    Docker(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        use bollard::errors::Error as E;
        match e {
            E::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            E::DockerResponseServerError {
                status_code: 409,
                message,
            } => RuntimeError::Conflict(message),
            E::DockerResponseServerError {
                status_code,
                message,
            } => RuntimeError::Docker(format!("{status_code}: {message}")),
            other => RuntimeError::Docker(other.to_string()),
        }
    }
}
