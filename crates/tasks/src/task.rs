use async_trait::async_trait;
use blocktasks_core::AppError;
use tokio_util::sync::CancellationToken;

/// A long-running unit of work owned by the [`Supervisor`](crate::Supervisor).
#[async_trait]
pub trait Task: Send {
    fn name(&self) -> &str;

    /// Run until `cancel` fires or the task fails.
    ///
    /// Cancellation is reported as [`AppError::Cancelled`].
    async fn start(&mut self, cancel: CancellationToken) -> Result<(), AppError>;
}
