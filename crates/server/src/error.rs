//! Errors of the stdio host.

/// Failures of the host transport itself.
///
/// Agent errors never surface here; they are written back as error replies.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("ENCODE_FAILED: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("TASK_FAILED: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for HostError {
    fn from(err: tokio::task::JoinError) -> Self {
        HostError::Task(err.to_string())
    }
}
