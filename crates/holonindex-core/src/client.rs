//! Ports to the outside world: the chain client and the event decoder.
//!
//! `holonindex-evm` provides the JSON-RPC and ABI implementations; tests
//! provide scripted ones.

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::entity::TemplateKind;
use crate::error::IndexerError;
use crate::event::EventRecord;
use crate::types::{BlockSummary, ChainBlock, RawLog};

/// Source of ordered blocks with their candidate logs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Blocks strictly after `last_processed` (from genesis when `None`),
    /// ascending and contiguous. May return fewer blocks than are available;
    /// an empty vector means the client has nothing newer.
    async fn blocks_since(
        &self,
        last_processed: Option<u64>,
    ) -> Result<Vec<ChainBlock>, IndexerError>;

    /// The canonical hash at `number`, or `None` if the chain is shorter.
    async fn block_hash(&self, number: u64) -> Result<Option<B256>, IndexerError>;

    /// The current chain head number.
    async fn head_number(&self) -> Result<u64, IndexerError>;

    /// Blocks behind the head after which a block is considered confirmed.
    fn confirmation_depth(&self) -> u64;
}

/// Turns raw logs into typed event records.
pub trait EventDecoder: Send + Sync {
    /// Decode `log` with the schema of `template`.
    ///
    /// `Ok(None)` means the log's signature is not part of that schema.
    /// Undecodable data for a known signature is `IndexerError::Decode`.
    fn decode(
        &self,
        log: &RawLog,
        block: &BlockSummary,
        template: TemplateKind,
    ) -> Result<Option<EventRecord>, IndexerError>;
}
