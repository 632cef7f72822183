//! EVM JSON-RPC types and the block/log fetcher.
//!
//! Uses `eth_getBlockByNumber` and `eth_getLogs` with range chunking.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use holonindex_core::error::IndexerError;
use holonindex_core::types::BlockSummary;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: B256,
    #[serde(rename = "transactionHash")]
    pub tx_hash: B256,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RpcLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> Result<u32, IndexerError> {
        let idx = parse_hex_u64(&self.log_index)?;
        u32::try_from(idx).map_err(|_| IndexerError::Rpc(format!("log index {idx} out of range")))
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        alloy_primitives::hex::decode(&self.data)
            .map_err(|e| IndexerError::Rpc(format!("invalid log data hex: {e}")))
    }
}

/// A transaction as embedded in a full `eth_getBlockByNumber` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTransaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract creation.
    #[serde(default)]
    pub to: Option<Address>,
}

/// Block transactions: hashes only, or full objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcTransactions {
    Full(Vec<RpcTransaction>),
    Hashes(Vec<B256>),
}

impl Default for RpcTransactions {
    fn default() -> Self {
        Self::Hashes(vec![])
    }
}

/// A block as returned by `eth_getBlockByNumber`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcBlock {
    pub number: String,
    pub hash: B256,
    #[serde(rename = "parentHash")]
    pub parent_hash: B256,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: RpcTransactions,
}

impl RpcBlock {
    pub fn summary(&self) -> Result<BlockSummary, IndexerError> {
        Ok(BlockSummary {
            number: parse_hex_u64(&self.number)?,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: parse_hex_u64(&self.timestamp)?,
        })
    }

    /// Full transactions, if the block was fetched with them.
    pub fn full_transactions(&self) -> &[RpcTransaction] {
        match &self.transactions {
            RpcTransactions::Full(txs) => txs,
            RpcTransactions::Hashes(_) => &[],
        }
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, IndexerError>;

    async fn get_block(&self, number: u64, full_transactions: bool) -> Result<Option<RpcBlock>, IndexerError>;

    /// Logs in `[from, to]` whose topic0 is one of `topic0s`, from any address.
    async fn get_logs(&self, from: u64, to: u64, topic0s: &[B256]) -> Result<Vec<RpcLog>, IndexerError>;
}

/// Wraps an `EvmRpcClient` and adds range chunking.
pub struct EvmFetcher<C> {
    client: C,
}

impl<C: EvmRpcClient> EvmFetcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch the current chain head block number.
    pub async fn head_block_number(&self) -> Result<u64, IndexerError> {
        self.client.get_block_number().await
    }

    pub async fn block(&self, number: u64, full_transactions: bool) -> Result<Option<RpcBlock>, IndexerError> {
        self.client.get_block(number, full_transactions).await
    }

    /// Fetch all logs in `[from, to]`, split into chunks of at most
    /// `max_range` blocks.
    pub async fn logs(
        &self,
        from: u64,
        to: u64,
        topic0s: &[B256],
        max_range: u64,
    ) -> Result<Vec<RpcLog>, IndexerError> {
        if to < from {
            return Ok(vec![]);
        }
        let max_range = max_range.max(1);
        let mut all_logs = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(max_range - 1).min(to);
            let chunk = self.client.get_logs(start, end, topic0s).await?;
            all_logs.extend(chunk);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(all_logs)
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|e| IndexerError::Rpc(format!("invalid quantity '{s}': {e}")))
}
