//! Job error types.

use thiserror::Error;

/// Terminal failure of a job.
#[derive(Debug, Error)]
pub enum JobError<E>
where
    E: std::error::Error + 'static,
{
    /// Every allowed attempt failed; carries the last underlying error.
    #[error("job failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error("job panicked: {0}")]
    Panicked(String),

    /// The queue went away before the job reported an outcome.
    #[error("job was dropped before completing")]
    Dropped,
}

impl<E> JobError<E>
where
    E: std::error::Error + 'static,
{
    /// The last task error, if the job failed by exhausting its retries.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            JobError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}
