use sqlx::{Executor, PgPool, Postgres, QueryBuilder};

use crate::models::*;

/// Postgres allows at most 65535 bind parameters per statement.
pub const MAX_LOGS_PER_INSERT: usize = 1000;

// ─── Task Queries ───────────────────────────────────────────────────────────

/// Get a task's checkpoint by name.
pub async fn get_task<'e, E>(executor: E, name: &str) -> Result<Option<Task>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Task>(
        r#"
        SELECT name, last_processed_block_number, last_processed_block_timestamp
        FROM tasks
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await
}

/// Get a task's checkpoint and lock its row until the transaction ends.
pub async fn get_task_for_update<'e, E>(
    executor: E,
    name: &str,
) -> Result<Option<Task>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Task>(
        r#"
        SELECT name, last_processed_block_number, last_processed_block_timestamp
        FROM tasks
        WHERE name = $1
        FOR UPDATE
        "#,
    )
    .bind(name)
    .fetch_optional(executor)
    .await
}

/// Insert a new task. Fails if a task with the same name exists.
pub async fn insert_task<'e, E>(executor: E, task: &Task) -> Result<Task, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Task>(
        r#"
        INSERT INTO tasks (name, last_processed_block_number, last_processed_block_timestamp)
        VALUES ($1, $2, $3)
        RETURNING name, last_processed_block_number, last_processed_block_timestamp
        "#,
    )
    .bind(&task.name)
    .bind(task.last_processed_block_number)
    .bind(task.last_processed_block_timestamp)
    .fetch_one(executor)
    .await
}

/// Overwrite a task's checkpoint, creating the row if needed.
pub async fn update_task<'e, E>(executor: E, task: &Task) -> Result<Task, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Task>(
        r#"
        INSERT INTO tasks (name, last_processed_block_number, last_processed_block_timestamp)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE
        SET last_processed_block_number = $2,
            last_processed_block_timestamp = $3
        RETURNING name, last_processed_block_number, last_processed_block_timestamp
        "#,
    )
    .bind(&task.name)
    .bind(task.last_processed_block_number)
    .bind(task.last_processed_block_timestamp)
    .fetch_one(executor)
    .await
}

// ─── Log Queries ────────────────────────────────────────────────────────────

/// Insert a batch of logs using a single multi-value INSERT.
/// Skips duplicates on (chain_id, txn_hash, log_index).
///
/// Callers must keep batches at or below [`MAX_LOGS_PER_INSERT`].
pub async fn insert_logs_batch<'e, E>(executor: E, logs: &[NewLog]) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if logs.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO logs (chain_id, block_number, block_hash, address, data, topics, txn_hash, log_index, removed, timestamp) ",
    );

    qb.push_values(logs, |mut b, l| {
        b.push_bind(l.chain_id)
            .push_bind(l.block_number)
            .push_bind(&l.block_hash)
            .push_bind(&l.address)
            .push_bind(&l.data)
            .push_bind(&l.topics)
            .push_bind(&l.txn_hash)
            .push_bind(l.log_index)
            .push_bind(l.removed)
            .push_bind(l.timestamp);
    });

    qb.push(" ON CONFLICT (chain_id, txn_hash, log_index) DO NOTHING");
    qb.build().execute(executor).await?;
    Ok(())
}

/// Get the stored logs of one block, ordered by log index.
pub async fn get_block_logs(
    pool: &PgPool,
    chain_id: i64,
    block_number: i64,
) -> Result<Vec<Log>, sqlx::Error> {
    sqlx::query_as::<_, Log>(
        "SELECT * FROM logs WHERE chain_id = $1 AND block_number = $2 ORDER BY log_index",
    )
    .bind(chain_id)
    .bind(block_number)
    .fetch_all(pool)
    .await
}
