//! `ChainClient` over an EVM JSON-RPC provider.

use std::collections::{BTreeMap, HashMap};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use holonindex_core::error::IndexerError;
use holonindex_core::types::{ChainBlock, RawLog};
use holonindex_core::ChainClient;

use crate::fetcher::{EvmFetcher, EvmRpcClient, RpcLog};

/// Tuning for [`EvmChainClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvmClientConfig {
    /// Maximum blocks returned by one `blocks_since` call.
    pub batch_size: u64,
    /// Maximum block span of a single `eth_getLogs` request.
    pub max_log_range: u64,
    pub confirmation_depth: u64,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_log_range: 2_000,
            confirmation_depth: 12,
        }
    }
}

/// Delivers contiguous blocks with every log whose topic0 is a known event
/// signature. Address filtering happens in the pipeline, so holons
/// registered mid-batch still have their logs delivered.
pub struct EvmChainClient<C> {
    fetcher: EvmFetcher<C>,
    topics: Vec<B256>,
    config: EvmClientConfig,
}

impl<C: EvmRpcClient> EvmChainClient<C> {
    pub fn new(rpc: C, topics: Vec<B256>, config: EvmClientConfig) -> Self {
        Self {
            fetcher: EvmFetcher::new(rpc),
            topics,
            config,
        }
    }

    pub fn config(&self) -> &EvmClientConfig {
        &self.config
    }

    fn group_logs(logs: Vec<RpcLog>) -> Result<BTreeMap<u64, Vec<RpcLog>>, IndexerError> {
        let mut by_block: BTreeMap<u64, Vec<RpcLog>> = BTreeMap::new();
        for log in logs {
            if log.is_removed() {
                continue;
            }
            by_block.entry(log.block_number_u64()?).or_default().push(log);
        }
        Ok(by_block)
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainClient for EvmChainClient<C> {
    async fn blocks_since(&self, last_processed: Option<u64>) -> Result<Vec<ChainBlock>, IndexerError> {
        let head = self.fetcher.head_block_number().await?;
        let from = match last_processed {
            Some(n) => n + 1,
            None => 0,
        };
        if from > head {
            return Ok(vec![]);
        }
        let to = from
            .saturating_add(self.config.batch_size.max(1) - 1)
            .min(head);

        let logs = self
            .fetcher
            .logs(from, to, &self.topics, self.config.max_log_range)
            .await?;
        let mut by_block = Self::group_logs(logs)?;

        let mut blocks = Vec::with_capacity((to - from + 1) as usize);
        for number in from..=to {
            let logs = by_block.remove(&number).unwrap_or_default();
            let Some(block) = self.fetcher.block(number, !logs.is_empty()).await? else {
                // Head moved backwards under us; deliver what is contiguous.
                tracing::debug!(number, "block not yet available");
                break;
            };
            let summary = block.summary()?;

            let senders: HashMap<B256, (Address, Option<Address>)> = block
                .full_transactions()
                .iter()
                .map(|tx| (tx.hash, (tx.from, tx.to)))
                .collect();

            let mut raw = Vec::with_capacity(logs.len());
            for log in logs {
                if log.block_hash != summary.hash {
                    return Err(IndexerError::Rpc(format!(
                        "log in block {number} has hash {:#x}, block has {:#x}",
                        log.block_hash, summary.hash
                    )));
                }
                let (tx_from, tx_to) = match senders.get(&log.tx_hash) {
                    Some((from, to)) => (Some(*from), *to),
                    None => (None, None),
                };
                raw.push(RawLog {
                    address: log.address,
                    log_index: log.log_index_u32()?,
                    data: log.data_bytes()?,
                    topics: log.topics,
                    tx_hash: log.tx_hash,
                    tx_from,
                    tx_to,
                    removed: false,
                });
            }

            blocks.push(ChainBlock { summary, logs: raw });
        }

        tracing::debug!(from, to, delivered = blocks.len(), "fetched blocks");
        Ok(blocks)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, IndexerError> {
        Ok(self.fetcher.block(number, false).await?.map(|b| b.hash))
    }

    async fn head_number(&self) -> Result<u64, IndexerError> {
        self.fetcher.head_block_number().await
    }

    fn confirmation_depth(&self) -> u64 {
        self.config.confirmation_depth
    }
}
