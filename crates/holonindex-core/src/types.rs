//! Shared chain types for the indexing pipeline.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A minimal summary of a block, enough to track progress and detect reorgs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: u64,
}

impl BlockSummary {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockSummary) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// An undecoded log together with the transaction context the mappers need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    /// Contract address that emitted the log.
    pub address: Address,
    /// topics[0] is the event signature hash; the rest are indexed params.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed params.
    pub data: Vec<u8>,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
    /// Log index within the block.
    pub log_index: u32,
    /// Sender of the emitting transaction.
    pub tx_from: Option<Address>,
    /// Recipient of the emitting transaction (`None` for contract creation).
    pub tx_to: Option<Address>,
    /// Set by the node when the log was removed by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// The event signature hash, if present.
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}

// ─── ChainBlock ───────────────────────────────────────────────────────────────

/// A block as delivered by the chain client: header plus every candidate log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub summary: BlockSummary,
    pub logs: Vec<RawLog>,
}

impl ChainBlock {
    pub fn number(&self) -> u64 {
        self.summary.number
    }

    /// Logs that were not removed, sorted by log index.
    pub fn ordered_logs(&self) -> Vec<&RawLog> {
        let mut logs: Vec<&RawLog> = self.logs.iter().filter(|l| !l.removed).collect();
        logs.sort_by_key(|l| l.log_index);
        logs
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
