//! JSON-RPC chain client.
//!
//! Block ranges are fetched with one batch request holding an optional
//! `eth_getLogs` call followed by one `eth_getBlockByNumber` call per block.
//! Batch results carry no type tag, so each one is decoded as a block first
//! and as a log array second. Results that fit neither shape are dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use blocktasks_core::ChainSettings;

use crate::error::ChainError;
use crate::gateway::RequestGateway;
use crate::hex::{parse_quantity, quantity, seconds_to_millis, to_quantity};
use crate::jsonrpc::{RawResponse, Request, Response};
use crate::types::{Block, BlockRef, BlockTransactions, CHAIN_ID_BASE_MAINNET, Log, Transaction};

const METHOD_GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
const METHOD_GET_LOGS: &str = "eth_getLogs";

/// Read access to a single chain.
#[async_trait]
pub trait Chain: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Fetch one block. Transactions are full objects when `full_txns` is set,
    /// hashes otherwise.
    async fn get_block_by_number(
        &self,
        block: BlockRef,
        full_txns: bool,
    ) -> Result<Block, ChainError>;

    /// Fetch every block in `from..=to` in a single batch request, optionally
    /// with the logs matching `addresses` and `topics` attached to their blocks.
    async fn get_blocks(
        &self,
        from: u64,
        to: u64,
        full_txns: bool,
        include_logs: bool,
        addresses: &[String],
        topics: &[String],
    ) -> Result<Vec<Block>, ChainError>;
}

/// [`Chain`] backed by an Ethereum-compatible JSON-RPC endpoint.
pub struct RpcChain {
    chain_id: u64,
    url: String,
    gateway: Arc<dyn RequestGateway>,
}

impl RpcChain {
    pub fn new(chain_id: u64, settings: &ChainSettings, gateway: Arc<dyn RequestGateway>) -> Self {
        let endpoint = settings.api_endpoint.trim_end_matches('/');
        let url = if settings.api_key.is_empty() {
            endpoint.to_string()
        } else {
            format!("{endpoint}/{}", settings.api_key)
        };
        Self {
            chain_id,
            url,
            gateway,
        }
    }

    pub fn base_mainnet(settings: &ChainSettings, gateway: Arc<dyn RequestGateway>) -> Self {
        Self::new(CHAIN_ID_BASE_MAINNET, settings, gateway)
    }

    async fn post<T: serde::Serialize + ?Sized>(&self, payload: &T) -> Result<Vec<u8>, ChainError> {
        let body = serde_json::to_string(payload)?;
        self.gateway
            .send(Method::POST, &self.url, &HashMap::new(), body)
            .await
    }
}

#[async_trait]
impl Chain for RpcChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_block_by_number(
        &self,
        block: BlockRef,
        full_txns: bool,
    ) -> Result<Block, ChainError> {
        let request = Request::new(
            1,
            METHOD_GET_BLOCK_BY_NUMBER,
            vec![json!(block.as_param()), json!(full_txns)],
        );
        let response = self.post(&request).await?;

        if full_txns {
            let response: Response<RawBlock<RawTransaction>> = serde_json::from_slice(&response)?;
            let raw = response.result;
            let txns = raw
                .transactions
                .iter()
                .map(RawTransaction::to_transaction)
                .collect::<Result<Vec<_>, _>>()?;
            block_from_raw(self.chain_id, &raw, BlockTransactions::Full(txns))
        } else {
            let response: Response<RawBlock<String>> = serde_json::from_slice(&response)?;
            let raw = response.result;
            let hashes = raw.transactions.clone();
            block_from_raw(self.chain_id, &raw, BlockTransactions::Hashes(hashes))
        }
    }

    async fn get_blocks(
        &self,
        from: u64,
        to: u64,
        full_txns: bool,
        include_logs: bool,
        addresses: &[String],
        topics: &[String],
    ) -> Result<Vec<Block>, ChainError> {
        if from > to {
            return Err(ChainError::InvalidArgument(format!(
                "invalid block range {from}..={to}"
            )));
        }

        let batch = build_batch(from, to, full_txns, include_logs, addresses, topics);
        let response = self.post(&batch).await?;
        let entries: Vec<RawResponse> = serde_json::from_slice(&response)?;

        let mut blocks = Vec::with_capacity(entries.len());
        let mut logs = Vec::new();
        // Position, not `id`, pairs a result with its call.
        for entry in &entries {
            match decode_entry(self.chain_id, &entry.result, full_txns) {
                Some(Entry::Block(block)) => blocks.push(block),
                Some(Entry::Logs(mut found)) => logs.append(&mut found),
                None => {
                    tracing::debug!(id = %entry.id, "dropping undecodable batch entry");
                }
            }
        }

        if include_logs {
            attach_logs(&mut blocks, logs);
        }

        Ok(blocks)
    }
}

/// Build the batch payload: the logs call first (when requested), then one
/// block call per number, with ids counting up from 1.
fn build_batch(
    from: u64,
    to: u64,
    full_txns: bool,
    include_logs: bool,
    addresses: &[String],
    topics: &[String],
) -> Vec<Request> {
    let mut batch = Vec::with_capacity((to - from + 2) as usize);
    let mut id = 0;

    if include_logs {
        id += 1;
        batch.push(Request::new(
            id,
            METHOD_GET_LOGS,
            vec![json!({
                "address": addresses,
                "fromBlock": to_quantity(from),
                "toBlock": to_quantity(to),
                "topics": topics,
            })],
        ));
    }

    for number in from..=to {
        id += 1;
        batch.push(Request::new(
            id,
            METHOD_GET_BLOCK_BY_NUMBER,
            vec![json!(to_quantity(number)), json!(full_txns)],
        ));
    }

    batch
}

enum Entry {
    Block(Block),
    Logs(Vec<Log>),
}

/// Decode one batch result as a block of the requested shape, falling back to
/// a log array.
fn decode_entry(chain_id: u64, result: &Value, full_txns: bool) -> Option<Entry> {
    let block = if full_txns {
        RawBlock::<RawTransaction>::deserialize(result)
            .ok()
            .map(|raw| {
                let txns = raw
                    .transactions
                    .iter()
                    .map(RawTransaction::to_transaction)
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?;
                block_from_raw(chain_id, &raw, BlockTransactions::Full(txns)).ok()
            })
    } else {
        RawBlock::<String>::deserialize(result).ok().map(|raw| {
            let hashes = raw.transactions.clone();
            block_from_raw(chain_id, &raw, BlockTransactions::Hashes(hashes)).ok()
        })
    };

    // A result that parsed as a block but carried bad hex is dropped, not
    // retried as logs.
    if let Some(block) = block {
        return block.map(Entry::Block);
    }

    Vec::<RawLog>::deserialize(result)
        .ok()
        .map(|raw| Entry::Logs(raw.iter().filter_map(RawLog::to_log).collect()))
}

/// Group logs by block number, order each group by log index and hand it to
/// its block. Blocks without logs get an empty list.
fn attach_logs(blocks: &mut [Block], logs: Vec<Log>) {
    let mut by_block: BTreeMap<u64, Vec<Log>> = BTreeMap::new();
    for log in logs {
        by_block.entry(log.block_number).or_default().push(log);
    }

    for block in blocks {
        let mut logs = by_block.remove(&block.number).unwrap_or_default();
        logs.sort_by_key(|log| log.log_index);
        block.logs = logs;
    }
}

fn block_from_raw<T>(
    chain_id: u64,
    raw: &RawBlock<T>,
    transactions: BlockTransactions,
) -> Result<Block, ChainError> {
    let number = quantity(&raw.number)?;
    let seconds = quantity(&raw.timestamp)?;
    let timestamp = seconds_to_millis(seconds).ok_or_else(|| {
        ChainError::Decode(format!("timestamp {seconds} out of range"))
    })?;

    Ok(Block {
        chain_id,
        number,
        hash: raw.hash.clone().unwrap_or_default(),
        timestamp,
        transactions,
        logs: Vec::new(),
    })
}

// ─── Wire Shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawBlock<T> {
    number: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default = "Vec::new")]
    transactions: Vec<T>,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
    hash: String,
    #[serde(rename = "type", default)]
    tx_type: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

impl RawTransaction {
    fn to_transaction(&self) -> Result<Transaction, ChainError> {
        let block_number = self.block_number.as_deref().map(quantity).transpose()?;
        let tx_type = self.tx_type.as_deref().map(quantity).transpose()?;
        let value = match self.value.as_deref() {
            Some(raw) => raw.parse::<U256>().map_err(|e| {
                ChainError::Decode(format!("invalid transaction value {raw:?}: {e}"))
            })?,
            None => U256::ZERO,
        };

        Ok(Transaction {
            block_hash: self.block_hash.clone().unwrap_or_default(),
            block_number: block_number.unwrap_or_default(),
            hash: self.hash.clone(),
            tx_type: tx_type.unwrap_or_default(),
            from: self.from.clone().unwrap_or_default(),
            to: self.to.clone(),
            value,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    block_hash: Option<String>,
    block_number: Option<String>,
    #[serde(default)]
    data: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    transaction_hash: Option<String>,
}

impl RawLog {
    /// `None` when the block number or log index is missing or not hex.
    fn to_log(&self) -> Option<Log> {
        let block_number = parse_quantity(self.block_number.as_deref()?).ok()?;
        let log_index = parse_quantity(self.log_index.as_deref()?).ok()?;

        Some(Log {
            address: self.address.clone().unwrap_or_default(),
            block_number,
            block_hash: self.block_hash.clone().unwrap_or_default(),
            data: self.data.clone().unwrap_or_default(),
            topics: self.topics.clone(),
            transaction_hash: self.transaction_hash.clone().unwrap_or_default(),
            log_index,
            removed: self.removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockRequestGateway;
    use mockall::predicate::{always, eq};

    const FULL_WITH_LOGS: &str = include_str!("../tests/fixtures/getblocks_withfulltxns_withlogs.json");
    const HASHES_WITH_LOGS: &str =
        include_str!("../tests/fixtures/getblocks_withoutfulltxns_withlogs.json");
    const FULL_WITHOUT_LOGS: &str =
        include_str!("../tests/fixtures/getblocks_withfulltxns_withoutlogs.json");
    const HASHES_WITHOUT_LOGS: &str =
        include_str!("../tests/fixtures/getblocks_withoutfulltxns_withoutlogs.json");

    const FROM: u64 = 21646720;
    const TO: u64 = 21646723;

    fn settings() -> ChainSettings {
        ChainSettings {
            api_endpoint: "https://base-mainnet.example.com/v2".into(),
            api_key: "key".into(),
            rate_limit: 0,
            http_debug: false,
        }
    }

    fn chain_returning(body: &'static str) -> RpcChain {
        let mut gateway = MockRequestGateway::new();
        gateway
            .expect_send()
            .with(
                eq(Method::POST),
                eq("https://base-mainnet.example.com/v2/key"),
                always(),
                always(),
            )
            .times(1)
            .returning(move |_, _, _, _| Ok(body.as_bytes().to_vec()));
        RpcChain::base_mainnet(&settings(), Arc::new(gateway))
    }

    fn assert_range(blocks: &[Block]) {
        let numbers: Vec<u64> = blocks.iter().map(|b| b.number).collect();
        assert_eq!(numbers, (FROM..=TO).collect::<Vec<_>>());
        for block in blocks {
            assert_eq!(block.chain_id, CHAIN_ID_BASE_MAINNET);
            // Milliseconds, not seconds.
            assert!(block.timestamp > 1_000_000_000_000);
        }
    }

    fn assert_logs_belong(block: &Block) {
        assert!(!block.logs.is_empty());
        assert!(block.logs.iter().all(|l| l.block_number == block.number));
        assert!(block.logs.windows(2).all(|w| w[0].log_index < w[1].log_index));
    }

    #[tokio::test]
    async fn get_blocks_with_full_txns_and_logs() {
        let chain = chain_returning(FULL_WITH_LOGS);
        let blocks = chain
            .get_blocks(FROM, TO, true, true, &[], &[])
            .await
            .unwrap();

        assert_range(&blocks);
        for block in &blocks {
            assert!(!block.transactions().is_empty());
            assert!(block.transaction_hashes().is_empty());
            assert_logs_belong(block);
        }
    }

    #[tokio::test]
    async fn get_blocks_without_full_txns_with_logs() {
        let chain = chain_returning(HASHES_WITH_LOGS);
        let blocks = chain
            .get_blocks(FROM, TO, false, true, &[], &[])
            .await
            .unwrap();

        assert_range(&blocks);
        for block in &blocks {
            assert!(block.transactions().is_empty());
            assert!(!block.transaction_hashes().is_empty());
            assert_logs_belong(block);
        }
    }

    #[tokio::test]
    async fn get_blocks_with_full_txns_without_logs() {
        let chain = chain_returning(FULL_WITHOUT_LOGS);
        let blocks = chain
            .get_blocks(FROM, TO, true, false, &[], &[])
            .await
            .unwrap();

        assert_range(&blocks);
        for block in &blocks {
            assert!(!block.transactions().is_empty());
            assert!(block.transaction_hashes().is_empty());
            assert!(block.logs.is_empty());
        }
    }

    #[tokio::test]
    async fn get_blocks_without_full_txns_or_logs() {
        let chain = chain_returning(HASHES_WITHOUT_LOGS);
        let blocks = chain
            .get_blocks(FROM, TO, false, false, &[], &[])
            .await
            .unwrap();

        assert_range(&blocks);
        for block in &blocks {
            assert!(block.transactions().is_empty());
            assert!(!block.transaction_hashes().is_empty());
            assert!(block.logs.is_empty());
        }
    }

    #[tokio::test]
    async fn full_transactions_are_converted() {
        let chain = chain_returning(FULL_WITH_LOGS);
        let blocks = chain
            .get_blocks(FROM, TO, true, true, &[], &[])
            .await
            .unwrap();

        let txn = &blocks[0].transactions()[0];
        assert_eq!(txn.block_number, FROM);
        assert_eq!(txn.tx_type, 0x7e);
        assert_eq!(txn.value, U256::ZERO);
        assert!(txn.to.is_some());
    }

    #[tokio::test]
    async fn batch_request_layout() {
        let mut gateway = MockRequestGateway::new();
        gateway
            .expect_send()
            .times(1)
            .withf(|_, _, _, body| {
                let batch: Value = serde_json::from_str(body).unwrap();
                let calls = batch.as_array().unwrap();
                calls.len() == 3
                    && calls[0]["method"] == METHOD_GET_LOGS
                    && calls[0]["id"] == 1
                    && calls[0]["jsonrpc"] == "2.0"
                    && calls[0]["params"][0]["fromBlock"] == "0x64"
                    && calls[0]["params"][0]["toBlock"] == "0x65"
                    && calls[0]["params"][0]["address"][0] == "0xabc"
                    && calls[0]["params"][0]["topics"].as_array().unwrap().is_empty()
                    && calls[1]["method"] == METHOD_GET_BLOCK_BY_NUMBER
                    && calls[1]["id"] == 2
                    && calls[1]["params"] == json!(["0x64", false])
                    && calls[2]["id"] == 3
                    && calls[2]["params"] == json!(["0x65", false])
            })
            .returning(|_, _, _, _| Ok(b"[]".to_vec()));
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));

        let blocks = chain
            .get_blocks(100, 101, false, true, &["0xabc".to_string()], &[])
            .await
            .unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn batch_without_logs_starts_at_block_calls() {
        let mut gateway = MockRequestGateway::new();
        gateway
            .expect_send()
            .times(1)
            .withf(|_, _, _, body| {
                let batch: Value = serde_json::from_str(body).unwrap();
                let calls = batch.as_array().unwrap();
                calls.len() == 1
                    && calls[0]["method"] == METHOD_GET_BLOCK_BY_NUMBER
                    && calls[0]["id"] == 1
                    && calls[0]["params"] == json!(["0x64", true])
            })
            .returning(|_, _, _, _| Ok(b"[]".to_vec()));
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));

        chain
            .get_blocks(100, 100, true, false, &[], &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn undecodable_entries_are_dropped() {
        let body = r#"[
            {"jsonrpc":"2.0","id":1,"result":[
                {"address":"0xa","blockHash":"0xb1","blockNumber":"0x1","data":"0x","logIndex":"0x2","removed":false,"topics":[],"transactionHash":"0xt1"},
                {"address":"0xa","blockHash":"0xb1","blockNumber":"0x1","data":"0x","logIndex":"oops","removed":false,"topics":[],"transactionHash":"0xt2"},
                {"address":"0xa","blockHash":"0xb1","blockNumber":"0x1","data":"0x","logIndex":"0x0","removed":false,"topics":["0xf"],"transactionHash":"0xt3"}
            ]},
            {"jsonrpc":"2.0","id":2,"result":{"number":"0x1","hash":"0xb1","timestamp":"0x5","transactions":["0xt1"]}},
            {"jsonrpc":"2.0","id":3,"result":{"number":"0xnothex","hash":"0xb2","timestamp":"0x6","transactions":[]}},
            {"jsonrpc":"2.0","id":4,"result":null},
            {"jsonrpc":"2.0","id":5,"error":{"code":-32000,"message":"header not found"}},
            {"jsonrpc":"2.0","id":6,"result":{"number":"0x4","hash":"0xb4","timestamp":"0x8","transactions":[]}}
        ]"#;
        let chain = chain_returning(body);

        let blocks = chain
            .get_blocks(1, 5, false, true, &[], &[])
            .await
            .unwrap();

        let numbers: Vec<u64> = blocks.iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![1, 4]);
        assert_eq!(blocks[0].timestamp, 5000);
        let indexes: Vec<u64> = blocks[0].logs.iter().map(|l| l.log_index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert!(blocks[1].logs.is_empty());
    }

    #[tokio::test]
    async fn hash_shaped_block_is_dropped_when_full_txns_requested() {
        let body = r#"[{"jsonrpc":"2.0","id":1,"result":{"number":"0x1","hash":"0xb1","timestamp":"0x5","transactions":["0xt1"]}}]"#;
        let chain = chain_returning(body);

        let blocks = chain.get_blocks(1, 1, true, false, &[], &[]).await.unwrap();
        assert!(blocks.is_empty());
    }

    #[tokio::test]
    async fn non_array_batch_response_is_an_error() {
        let chain = chain_returning(r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        let err = chain.get_blocks(1, 2, false, true, &[], &[]).await.unwrap_err();
        assert!(matches!(err, ChainError::Json(_)));
    }

    #[tokio::test]
    async fn reversed_range_is_rejected_without_a_request() {
        let gateway = MockRequestGateway::new();
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));
        let err = chain.get_blocks(10, 9, false, true, &[], &[]).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn gateway_errors_propagate() {
        let mut gateway = MockRequestGateway::new();
        gateway
            .expect_send()
            .returning(|_, _, _, _| Err(ChainError::Status(reqwest::StatusCode::TOO_MANY_REQUESTS)));
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));

        let err = chain.get_blocks(1, 2, false, true, &[], &[]).await.unwrap_err();
        assert!(matches!(err, ChainError::Status(_)));
    }

    #[tokio::test]
    async fn safe_block_is_converted_to_decimal_and_millis() {
        let mut gateway = MockRequestGateway::new();
        gateway
            .expect_send()
            .times(1)
            .withf(|_, _, _, body| {
                let call: Value = serde_json::from_str(body).unwrap();
                call["method"] == METHOD_GET_BLOCK_BY_NUMBER
                    && call["params"] == json!(["safe", false])
            })
            .returning(|_, _, _, _| {
                Ok(br#"{"jsonrpc":"2.0","id":1,"result":{"number":"0x64","hash":"0xabc","timestamp":"0x5","transactions":["0x1","0x2"]}}"#.to_vec())
            });
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));

        let block = chain
            .get_block_by_number(BlockRef::Safe, false)
            .await
            .unwrap();

        assert_eq!(block.number, 100);
        assert_eq!(block.timestamp, 5000);
        assert_eq!(block.hash, "0xabc");
        assert_eq!(block.transaction_hashes(), ["0x1", "0x2"]);
        assert!(block.transactions().is_empty());
        assert!(block.logs.is_empty());
    }

    #[tokio::test]
    async fn block_by_number_with_full_txns() {
        let mut gateway = MockRequestGateway::new();
        gateway.expect_send().times(1).returning(|_, _, _, _| {
            Ok(br#"{"jsonrpc":"2.0","id":1,"result":{"number":"0x10","hash":"0xb","timestamp":"0x1","transactions":[
                {"blockHash":"0xb","blockNumber":"0x10","hash":"0xt","type":"0x2","from":"0xf","to":null,"value":"0xde0b6b3a7640000"}
            ]}}"#.to_vec())
        });
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));

        let block = chain
            .get_block_by_number(BlockRef::Number(16), true)
            .await
            .unwrap();

        let txn = &block.transactions()[0];
        assert_eq!(txn.block_number, 16);
        assert_eq!(txn.tx_type, 2);
        assert_eq!(txn.to, None);
        assert_eq!(txn.value, U256::from(1_000_000_000_000_000_000u64));
        assert!(block.transaction_hashes().is_empty());
    }

    #[tokio::test]
    async fn missing_block_is_a_decode_error() {
        let mut gateway = MockRequestGateway::new();
        gateway
            .expect_send()
            .returning(|_, _, _, _| Ok(br#"{"jsonrpc":"2.0","id":1,"result":null}"#.to_vec()));
        let chain = RpcChain::base_mainnet(&settings(), Arc::new(gateway));

        let err = chain
            .get_block_by_number(BlockRef::Latest, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Json(_)));
    }

    #[test]
    fn url_omits_empty_api_key() {
        let mut settings = settings();
        settings.api_key.clear();
        let chain = RpcChain::base_mainnet(&settings, Arc::new(MockRequestGateway::new()));
        assert_eq!(chain.url, "https://base-mainnet.example.com/v2");
    }
}
