use thiserror::Error;

/// Shared error type returned by long-running tasks and the supervisor.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] eyre::Error),
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
