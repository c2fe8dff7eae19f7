pub mod client;
pub mod error;
pub mod gateway;
pub mod hex;
pub mod jsonrpc;
pub mod types;

pub use client::{Chain, RpcChain};
pub use error::ChainError;
pub use gateway::{HttpGateway, RequestGateway};
pub use types::{
    Block, BlockRef, BlockTransactions, CHAIN_ID_BASE_MAINNET, Log, Transaction,
    normalize_addresses,
};
