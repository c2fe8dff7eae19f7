//! Runs a set of long-lived tasks under a shared cancellation token.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use blocktasks_core::AppError;

use crate::task::Task;

/// Starts tasks concurrently and waits for all of them.
///
/// The first task to fail (or panic) cancels the shared token so the rest
/// wind down, and its error is what [`Supervisor::run`] returns. A task
/// that returns `Ok` does not affect the others.
pub struct Supervisor {
    cancel: CancellationToken,
    tasks: Vec<Box<dyn Task>>,
}

impl Supervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
        }
    }

    pub fn add(&mut self, task: Box<dyn Task>) {
        tracing::debug!(task = task.name(), "task registered");
        self.tasks.push(task);
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn run(self) -> Result<(), AppError> {
        let mut set = JoinSet::new();

        for mut task in self.tasks {
            let cancel = self.cancel.clone();
            set.spawn(async move {
                let name = task.name().to_string();
                tracing::info!(task = %name, "task starting");

                let result = match AssertUnwindSafe(task.start(cancel)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".into());
                        Err(AppError::Other(eyre::eyre!("task {name} panicked: {message}")))
                    }
                };
                (name, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let (name, result) = match joined {
                Ok(done) => done,
                Err(e) => (
                    "unknown".to_string(),
                    Err(AppError::Other(eyre::eyre!("task join failed: {e}"))),
                ),
            };

            match result {
                Ok(()) => tracing::info!(task = %name, "task finished"),
                Err(e) if e.is_cancelled() => tracing::info!(task = %name, "task cancelled"),
                Err(e) => {
                    tracing::error!(task = %name, error = %e, "task failed");
                    self.cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if self.cancel.is_cancelled() => Err(AppError::Cancelled),
            None => Ok(()),
        }
    }
}
