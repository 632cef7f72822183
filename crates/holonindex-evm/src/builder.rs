//! Fluent builder API for holon indexing pipelines.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use holonindex_evm::IndexerBuilder;
//! use holonindex_storage::InMemoryStorage;
//!
//! # async fn run() -> Result<(), holonindex_core::IndexerError> {
//! let builder = IndexerBuilder::new()
//!     .chain("ethereum")
//!     .from_block(19_000_000)
//!     .confirmation_depth(12)
//!     .factory("0x5fbdb2315678afecb367f032d93f642f64180aa3".parse().unwrap());
//! let client = Arc::new(builder.connect("http://127.0.0.1:8545")?);
//! let mut pipeline = builder.build(client, Arc::new(InMemoryStorage::new()));
//! pipeline.resume().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use alloy_primitives::Address;

use holonindex_core::checkpoint::CheckpointStore;
use holonindex_core::error::IndexerError;
use holonindex_core::indexer::IndexerConfig;
use holonindex_core::retry::RetryConfig;
use holonindex_core::store::EntityStore;
use holonindex_core::{ChainClient, Pipeline};

use crate::client::{EvmChainClient, EvmClientConfig};
use crate::decoder::AbiEventDecoder;
use crate::http::{HttpClientConfig, HttpRpcClient};

/// Fluent builder for `IndexerConfig` and the pieces wired from it.
#[derive(Debug, Clone, Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    client: EvmClientConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config.
    pub fn from_config(config: IndexerConfig) -> Self {
        let client = EvmClientConfig {
            confirmation_depth: config.confirmation_depth,
            ..EvmClientConfig::default()
        };
        Self { config, client }
    }

    /// Set the indexer ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the chain to index.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the start block.
    pub fn from_block(mut self, block: u64) -> Self {
        self.config.from_block = block;
        self
    }

    /// Set the end block (for bounded backfill).
    pub fn to_block(mut self, block: u64) -> Self {
        self.config.to_block = Some(block);
        self
    }

    /// Set confirmation depth (blocks behind head before entities are visible).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self.client.confirmation_depth = depth;
        self
    }

    /// Set the number of block hashes kept for ancestor search.
    pub fn reorg_window(mut self, blocks: usize) -> Self {
        self.config.reorg_window = blocks;
        self
    }

    /// Set the number of blocks fetched per round.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.client.batch_size = size;
        self
    }

    /// Set the maximum span of one `eth_getLogs` request.
    pub fn max_log_range(mut self, blocks: u64) -> Self {
        self.client.max_log_range = blocks;
        self
    }

    /// Set checkpoint save interval (every N blocks).
    pub fn checkpoint_interval(mut self, n: u64) -> Self {
        self.config.checkpoint_interval = n;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Add a statically configured holon factory.
    pub fn factory(mut self, address: Address) -> Self {
        if !self.config.factory_addresses.contains(&address) {
            self.config.factory_addresses.push(address);
        }
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(&self) -> IndexerConfig {
        self.config.clone()
    }

    pub fn client_config(&self) -> EvmClientConfig {
        self.client.clone()
    }

    /// Connect a JSON-RPC chain client filtered to the holon event signatures.
    pub fn connect(&self, url: &str) -> Result<EvmChainClient<HttpRpcClient>, IndexerError> {
        let rpc = HttpRpcClient::new(url, HttpClientConfig::default())?;
        Ok(EvmChainClient::new(
            rpc,
            AbiEventDecoder::new().topics(),
            self.client.clone(),
        ))
    }

    /// Wire a pipeline over `client`, storing entities and checkpoints in `store`.
    pub fn build<S>(&self, client: Arc<dyn ChainClient>, store: Arc<S>) -> Pipeline
    where
        S: EntityStore + CheckpointStore + 'static,
    {
        let checkpoints: Box<dyn CheckpointStore> = Box::new(store.clone());
        Pipeline::new(
            self.build_config(),
            client,
            Arc::new(AbiEventDecoder::new()),
            store,
            checkpoints,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let b = IndexerBuilder::new();
        let cfg = b.build_config();
        assert_eq!(cfg.chain, "ethereum");
        assert_eq!(cfg.confirmation_depth, 12);
        assert_eq!(b.client_config().batch_size, 100);
    }

    #[test]
    fn builder_custom() {
        let factory = Address::repeat_byte(0xfa);
        let b = IndexerBuilder::new()
            .id("holons-polygon")
            .chain("polygon")
            .from_block(50_000_000)
            .confirmation_depth(32)
            .reorg_window(256)
            .batch_size(500)
            .factory(factory)
            .factory(factory);

        let cfg = b.build_config();
        assert_eq!(cfg.id, "holons-polygon");
        assert_eq!(cfg.chain, "polygon");
        assert_eq!(cfg.from_block, 50_000_000);
        assert_eq!(cfg.confirmation_depth, 32);
        assert_eq!(cfg.reorg_window, 256);
        assert_eq!(cfg.factory_addresses, vec![factory]);
        assert_eq!(b.client_config().confirmation_depth, 32);
        assert_eq!(b.client_config().batch_size, 500);
    }

    #[test]
    fn from_config_carries_depth_to_client() {
        let cfg = IndexerConfig {
            confirmation_depth: 5,
            ..IndexerConfig::default()
        };
        let b = IndexerBuilder::from_config(cfg);
        assert_eq!(b.client_config().confirmation_depth, 5);
    }
}
