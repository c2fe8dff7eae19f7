use alloy::primitives::{Address, U256};

use crate::error::ChainError;
use crate::hex::to_quantity;

/// Base mainnet (0x2105).
pub const CHAIN_ID_BASE_MAINNET: u64 = 8453;

/// A block to request: a concrete number or one of the provider-maintained tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Latest,
    Finalized,
    /// The latest block the provider considers unlikely to be reorganized.
    Safe,
    Number(u64),
}

impl BlockRef {
    pub const LATEST: i64 = -1;
    pub const FINALIZED: i64 = -2;
    pub const SAFE: i64 = -3;

    /// The value sent as the first `eth_getBlockByNumber` parameter.
    pub fn as_param(&self) -> String {
        match self {
            BlockRef::Latest => "latest".into(),
            BlockRef::Finalized => "finalized".into(),
            BlockRef::Safe => "safe".into(),
            BlockRef::Number(n) => to_quantity(*n),
        }
    }
}

/// Signed block numbers use `-1`, `-2` and `-3` for latest, finalized and safe.
impl TryFrom<i64> for BlockRef {
    type Error = ChainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            Self::LATEST => Ok(BlockRef::Latest),
            Self::FINALIZED => Ok(BlockRef::Finalized),
            Self::SAFE => Ok(BlockRef::Safe),
            n if n >= 0 => Ok(BlockRef::Number(n as u64)),
            n => Err(ChainError::InvalidArgument(format!("invalid block number {n}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub chain_id: u64,
    pub number: u64,
    pub hash: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub transactions: BlockTransactions,
    /// Sorted by log index. Empty unless logs were requested.
    pub logs: Vec<Log>,
}

impl Block {
    /// Full transactions, or an empty slice when only hashes were requested.
    pub fn transactions(&self) -> &[Transaction] {
        match &self.transactions {
            BlockTransactions::Full(txns) => txns,
            BlockTransactions::Hashes(_) => &[],
        }
    }

    /// Transaction hashes, or an empty slice when full transactions were requested.
    pub fn transaction_hashes(&self) -> &[String] {
        match &self.transactions {
            BlockTransactions::Full(_) => &[],
            BlockTransactions::Hashes(hashes) => hashes,
        }
    }
}

/// The transaction list of a block, in the shape the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockTransactions {
    Full(Vec<Transaction>),
    Hashes(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub block_hash: String,
    pub block_number: u64,
    pub hash: String,
    pub tx_type: u64,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub value: U256,
}

/// An event emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: String,
    pub block_number: u64,
    pub block_hash: String,
    pub data: String,
    pub topics: Vec<String>,
    pub transaction_hash: String,
    pub log_index: u64,
    /// Set by the provider when the log was dropped by a reorg.
    pub removed: bool,
}

/// Validate contract addresses and render them as lowercase `0x` hex.
pub fn normalize_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Vec<String>, ChainError> {
    addresses
        .iter()
        .map(|raw| {
            let raw = raw.as_ref();
            raw.parse::<Address>()
                .map(|addr| format!("{addr:#x}"))
                .map_err(|e| ChainError::InvalidArgument(format!("invalid address {raw:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_to_tags() {
        assert_eq!(BlockRef::try_from(-1i64).unwrap(), BlockRef::Latest);
        assert_eq!(BlockRef::try_from(-2i64).unwrap(), BlockRef::Finalized);
        assert_eq!(BlockRef::try_from(-3i64).unwrap(), BlockRef::Safe);
        assert_eq!(BlockRef::try_from(100i64).unwrap(), BlockRef::Number(100));
        assert_eq!(BlockRef::try_from(0i64).unwrap(), BlockRef::Number(0));
    }

    #[test]
    fn other_negatives_are_invalid() {
        assert!(matches!(
            BlockRef::try_from(-4i64),
            Err(ChainError::InvalidArgument(_))
        ));
        assert!(matches!(
            BlockRef::try_from(i64::MIN),
            Err(ChainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn params_are_tags_or_hex() {
        assert_eq!(BlockRef::Safe.as_param(), "safe");
        assert_eq!(BlockRef::Latest.as_param(), "latest");
        assert_eq!(BlockRef::Finalized.as_param(), "finalized");
        assert_eq!(BlockRef::Number(100).as_param(), "0x64");
    }

    #[test]
    fn addresses_are_lowercased() {
        let normalized =
            normalize_addresses(&["0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"]).unwrap();
        assert_eq!(normalized, vec!["0x833589fcd6edb6e08f4c7c32d4f71b54bda02913"]);
    }

    #[test]
    fn malformed_address_is_rejected() {
        assert!(normalize_addresses(&["0x1234"]).is_err());
    }
}
