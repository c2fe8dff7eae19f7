//! Storage contract used by the ingestion tasks.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::{NewLog, Task};
use crate::repos::{self, MAX_LOGS_PER_INSERT};

/// Checkpoint and log storage.
///
/// Writes that must land together go through [`Repository::begin`].
#[async_trait]
pub trait Repository: Send + Sync {
    /// Returns [`StoreError::NotFound`] when no task has this name.
    async fn get_task(&self, name: &str) -> Result<Task, StoreError>;

    async fn insert_task(&self, task: &Task) -> Result<Task, StoreError>;

    /// Unconditionally overwrite the task's checkpoint.
    async fn update_task(&self, task: &Task) -> Result<Task, StoreError>;

    /// Insert logs; ones already stored are skipped.
    async fn insert_logs(&self, logs: &[NewLog]) -> Result<(), StoreError>;

    /// Open a transaction. It rolls back unless [`RepositoryTx::commit`] is called.
    async fn begin(&self) -> Result<Box<dyn RepositoryTx>, StoreError>;
}

/// A transaction-scoped view of a [`Repository`].
#[async_trait]
pub trait RepositoryTx: Send {
    /// Like [`Repository::get_task`], also locking the row until commit.
    async fn get_task_for_update(&mut self, name: &str) -> Result<Task, StoreError>;

    async fn update_task(&mut self, task: &Task) -> Result<Task, StoreError>;

    async fn insert_logs(&mut self, logs: &[NewLog]) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// [`Repository`] over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_task(&self, name: &str) -> Result<Task, StoreError> {
        repos::get_task(&self.pool, name)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn insert_task(&self, task: &Task) -> Result<Task, StoreError> {
        Ok(repos::insert_task(&self.pool, task).await?)
    }

    async fn update_task(&self, task: &Task) -> Result<Task, StoreError> {
        Ok(repos::update_task(&self.pool, task).await?)
    }

    async fn insert_logs(&self, logs: &[NewLog]) -> Result<(), StoreError> {
        // Chunks of one call are not atomic; use a transaction for that.
        for chunk in logs.chunks(MAX_LOGS_PER_INSERT) {
            repos::insert_logs_batch(&self.pool, chunk).await?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn RepositoryTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRepositoryTx { tx }))
    }
}

struct PgRepositoryTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl RepositoryTx for PgRepositoryTx {
    async fn get_task_for_update(&mut self, name: &str) -> Result<Task, StoreError> {
        repos::get_task_for_update(&mut *self.tx, name)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn update_task(&mut self, task: &Task) -> Result<Task, StoreError> {
        Ok(repos::update_task(&mut *self.tx, task).await?)
    }

    async fn insert_logs(&mut self, logs: &[NewLog]) -> Result<(), StoreError> {
        for chunk in logs.chunks(MAX_LOGS_PER_INSERT) {
            repos::insert_logs_batch(&mut *self.tx, chunk).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.rollback().await?)
    }
}
