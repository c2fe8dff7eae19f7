//! Log monitor: polls a chain for confirmed blocks and stores their logs.
//!
//! The task owns a single checkpoint row named after itself. Every block is
//! committed in its own transaction together with the checkpoint, so the
//! checkpoint never moves past a block whose logs are not stored, and a
//! restart resumes right after the last committed block.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use blocktasks_chain::{Block, BlockRef, Chain, ChainError, normalize_addresses};
use blocktasks_core::{AppError, MonitorSettings};
use blocktasks_storage::Repository;
use blocktasks_storage::models::{NewLog, Task as TaskRow};

use crate::task::Task;

pub const TASK_BASE_LOG_MONITOR: &str = "base-log-monitor";

/// Lifecycle of a [`LogMonitor`]. `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Initializing,
    Polling,
    Cancelled,
    Failed,
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The safe block is not far enough ahead of the checkpoint.
    Idle { safe_block: u64 },
    /// Blocks `from..=to` were committed.
    Processed { from: u64, to: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    block_number: u64,
    block_timestamp: u64,
}

pub struct LogMonitor {
    name: String,
    settings: MonitorSettings,
    addresses: Vec<String>,
    chain: Arc<dyn Chain>,
    repo: Arc<dyn Repository>,
    state: MonitorState,
    checkpoint: Option<Checkpoint>,
}

impl LogMonitor {
    pub fn new(
        name: impl Into<String>,
        settings: MonitorSettings,
        chain: Arc<dyn Chain>,
        repo: Arc<dyn Repository>,
    ) -> Result<Self, AppError> {
        settings
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;
        let addresses = normalize_addresses(&settings.monitored_contract_addresses)?;

        Ok(Self {
            name: name.into(),
            settings,
            addresses,
            chain,
            repo,
            state: MonitorState::Uninitialized,
            checkpoint: None,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// The last committed block as `(number, timestamp_ms)`, once initialized.
    pub fn checkpoint(&self) -> Option<(u64, u64)> {
        self.checkpoint
            .map(|c| (c.block_number, c.block_timestamp))
    }

    /// Load the checkpoint, seeding it just below the safe block on first run.
    pub async fn initialize(&mut self) -> Result<(), AppError> {
        self.state = MonitorState::Initializing;
        tracing::debug!(task = %self.name, "initializing");

        match self.load_or_seed_checkpoint().await {
            Ok(checkpoint) => {
                self.checkpoint = Some(checkpoint);
                self.state = MonitorState::Polling;
                tracing::info!(
                    task = %self.name,
                    block = checkpoint.block_number,
                    timestamp = checkpoint.block_timestamp,
                    "initialized"
                );
                Ok(())
            }
            Err(e) => {
                self.state = MonitorState::Failed;
                Err(e)
            }
        }
    }

    async fn load_or_seed_checkpoint(&self) -> Result<Checkpoint, AppError> {
        match self.repo.get_task(&self.name).await {
            Ok(task) => {
                tracing::debug!(task = %self.name, ?task, "task found");
                return Ok(Checkpoint {
                    block_number: task.last_processed_block_number.max(0) as u64,
                    block_timestamp: task.last_processed_block_timestamp.max(0) as u64,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let safe = self.chain.get_block_by_number(BlockRef::Safe, false).await?;

        // One below the safe block, so the first poll picks up the safe block itself.
        let checkpoint = Checkpoint {
            block_number: safe.number.saturating_sub(1),
            block_timestamp: safe.timestamp.saturating_sub(1),
        };
        let task = TaskRow::new(
            &self.name,
            checkpoint.block_number as i64,
            checkpoint.block_timestamp as i64,
        );
        self.repo.insert_task(&task).await?;
        tracing::info!(task = %self.name, block = checkpoint.block_number, "task created");

        Ok(checkpoint)
    }

    /// Poll every `poll_interval` seconds until `cancel` fires.
    ///
    /// Tick failures are logged and never end the loop.
    pub async fn run(&mut self, cancel: &CancellationToken) -> AppError {
        let period = Duration::from_secs(self.settings.poll_interval);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.state = MonitorState::Cancelled;
                    tracing::warn!(task = %self.name, "stopped");
                    return AppError::Cancelled;
                }
                _ = ticker.tick() => self.guarded_tick().await,
            }
        }
    }

    /// Run one tick, turning errors and panics into log lines.
    pub(crate) async fn guarded_tick(&mut self) {
        let name = self.name.clone();
        match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(Ok(TickOutcome::Idle { safe_block })) => {
                tracing::trace!(task = %name, safe_block, "nothing to process");
            }
            Ok(Ok(TickOutcome::Processed { from, to })) => {
                tracing::info!(task = %name, from, to, "blocks processed");
            }
            Ok(Err(e)) => {
                tracing::error!(task = %name, error = %e, "poll failed");
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(task = %name, panic = %message, "poll panicked");
            }
        }
    }

    /// Process everything between the checkpoint and the confirmed frontier.
    pub async fn tick(&mut self) -> Result<TickOutcome, AppError> {
        let last = self
            .checkpoint
            .ok_or_else(|| eyre::eyre!("log monitor {} is not initialized", self.name))?
            .block_number;

        let safe = self
            .chain
            .get_block_by_number(BlockRef::Safe, false)
            .await?;
        tracing::debug!(task = %self.name, block = safe.number, "latest confirmed block");

        let distance = self.settings.block_distance;
        if safe.number <= last.saturating_add(distance) {
            return Ok(TickOutcome::Idle {
                safe_block: safe.number,
            });
        }

        let from = last + 1;
        let to = safe.number - distance;
        self.process_blocks(from, to).await?;

        Ok(TickOutcome::Processed { from, to })
    }

    /// Walk `from..=to` in chunks of at most `query_max_blocks`, stopping at
    /// the first chunk that cannot be fetched or block that cannot be stored.
    async fn process_blocks(&mut self, from: u64, to: u64) -> Result<(), AppError> {
        let mut start = from;
        while start <= to {
            let end = start
                .saturating_add(self.settings.query_max_blocks - 1)
                .min(to);

            let blocks = self.fetch_chunk_with_retry(start, end).await?;
            for block in &blocks {
                self.commit_block(block).await?;
            }

            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn fetch_chunk_with_retry(&self, from: u64, to: u64) -> Result<Vec<Block>, ChainError> {
        let attempts = self.settings.max_block_retries;
        let mut attempt = 1;
        loop {
            match self.fetch_chunk(from, to).await {
                Ok(blocks) => {
                    tracing::debug!(task = %self.name, from, to, attempt, "blocks fetched");
                    return Ok(blocks);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(task = %self.name, from, to, attempt, error = %e, "fetching blocks failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(task = %self.name, from, to, attempt, error = %e, "fetching blocks failed");
                    return Err(e);
                }
            }
        }
    }

    /// Fetch a chunk and check it holds exactly one block per number, in order.
    async fn fetch_chunk(&self, from: u64, to: u64) -> Result<Vec<Block>, ChainError> {
        let mut blocks = self
            .chain
            .get_blocks(from, to, false, true, &self.addresses, &[])
            .await?;
        blocks.sort_by_key(|b| b.number);

        let complete = blocks.len() as u64 == to - from + 1
            && blocks
                .iter()
                .zip(from..=to)
                .all(|(block, number)| block.number == number);
        if !complete {
            return Err(ChainError::Decode(format!(
                "incomplete batch for blocks {from}..={to}: got {} blocks",
                blocks.len()
            )));
        }

        Ok(blocks)
    }

    /// Store a block's logs and move the checkpoint to it, atomically.
    async fn commit_block(&mut self, block: &Block) -> Result<(), AppError> {
        let logs: Vec<NewLog> = block
            .logs
            .iter()
            .map(|log| NewLog {
                chain_id: block.chain_id as i64,
                block_number: log.block_number as i64,
                block_hash: log.block_hash.clone(),
                address: log.address.clone(),
                data: log.data.clone(),
                topics: log.topics.clone(),
                txn_hash: log.transaction_hash.clone(),
                log_index: log.log_index as i64,
                removed: log.removed,
                timestamp: block.timestamp as i64,
            })
            .collect();
        let task = TaskRow::new(&self.name, block.number as i64, block.timestamp as i64);

        // Dropping `tx` on an early return rolls it back.
        let mut tx = self.repo.begin().await?;
        if let Err(e) = tx.insert_logs(&logs).await {
            tracing::error!(task = %self.name, block = block.number, error = %e, "failed to insert logs");
            return Err(e.into());
        }
        tracing::debug!(task = %self.name, block = block.number, logs = logs.len(), "logs inserted");
        if let Err(e) = tx.update_task(&task).await {
            tracing::error!(task = %self.name, block = block.number, error = %e, "failed to update task");
            return Err(e.into());
        }
        tx.commit().await?;

        self.checkpoint = Some(Checkpoint {
            block_number: block.number,
            block_timestamp: block.timestamp,
        });
        tracing::debug!(task = %self.name, block = block.number, "checkpoint updated");
        Ok(())
    }
}

#[async_trait]
impl Task for LogMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, cancel: CancellationToken) -> Result<(), AppError> {
        if let Err(e) = self.initialize().await {
            tracing::error!(task = %self.name, error = %e, "failed to initialize");
            return Err(e);
        }

        Err(self.run(&cancel).await)
    }
}
