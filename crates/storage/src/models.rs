use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ─── Task ───────────────────────────────────────────────────────────────────

/// The resume point of a named task: the last block whose logs were committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub name: String,
    pub last_processed_block_number: i64,
    /// Milliseconds since the Unix epoch.
    pub last_processed_block_timestamp: i64,
}

impl Task {
    pub fn new(name: impl Into<String>, block_number: i64, block_timestamp: i64) -> Self {
        Self {
            name: name.into(),
            last_processed_block_number: block_number,
            last_processed_block_timestamp: block_timestamp,
        }
    }
}

// ─── Log ────────────────────────────────────────────────────────────────────

/// A stored contract event. Unique on (chain_id, txn_hash, log_index).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Log {
    pub chain_id: i64,
    pub block_number: i64,
    pub block_hash: String,
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
    pub txn_hash: String,
    pub log_index: i64,
    pub removed: bool,
    /// Timestamp of the owning block, in milliseconds.
    pub timestamp: i64,
    pub created_at: NaiveDateTime,
}

/// Insert-ready log (no `created_at`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLog {
    pub chain_id: i64,
    pub block_number: i64,
    pub block_hash: String,
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
    pub txn_hash: String,
    pub log_index: i64,
    pub removed: bool,
    pub timestamp: i64,
}

