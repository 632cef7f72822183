//! Indexer cursor: the pipeline's position in the chain.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// Where the pipeline continues from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// The next block to process.
    pub next_block: u64,
    /// Hash of the last fully processed block, if any was processed.
    pub last_hash: Option<B256>,
}

impl Cursor {
    /// Nothing processed yet; start at `from_block`.
    pub fn start_at(from_block: u64) -> Self {
        Self {
            next_block: from_block,
            last_hash: None,
        }
    }

    /// Resume after a processed block.
    pub fn after(block_number: u64, block_hash: B256) -> Self {
        Self {
            next_block: block_number + 1,
            last_hash: Some(block_hash),
        }
    }

    pub fn advance(&mut self, block_number: u64, block_hash: B256) {
        self.next_block = block_number + 1;
        self.last_hash = Some(block_hash);
    }

    /// The block before `next_block`; `None` when starting from genesis.
    pub fn last_processed(&self) -> Option<u64> {
        self.next_block.checked_sub(1)
    }

    /// `true` once `to_block` has been processed.
    pub fn reached(&self, to_block: Option<u64>) -> bool {
        match (to_block, self.last_processed()) {
            (Some(end), Some(last)) => last >= end,
            _ => false,
        }
    }
}
