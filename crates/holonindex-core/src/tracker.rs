//! Block tracker: a sliding window of recently processed block headers,
//! used for parent-hash verification and common-ancestor search.

use std::collections::VecDeque;

use alloy_primitives::B256;

use crate::types::BlockSummary;

/// How an incoming block relates to the tracked chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    /// The window is empty or the block is the direct child of the head.
    Extends,
    /// The block is at an already processed height with the recorded hash.
    AlreadyProcessed,
    /// Parent hash mismatch, or a different hash at a processed height.
    Fork,
    /// The block skips heights after the head.
    Gap { expected: u64 },
}

/// Tracks the last N processed block headers (oldest first).
pub struct BlockTracker {
    window: VecDeque<BlockSummary>,
    window_size: usize,
}

impl BlockTracker {
    /// A window of 128 covers deep reorgs for all major EVM chains.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Rebuild the window from persisted `(number, hash)` pairs.
    ///
    /// Only hashes are persisted, so restored entries carry a zero parent
    /// hash and timestamp; [`BlockTracker::check`] compares against `hash`
    /// only.
    pub fn restore(&mut self, hashes: impl IntoIterator<Item = (u64, B256)>) {
        self.window.clear();
        for (number, hash) in hashes {
            self.append(BlockSummary {
                number,
                hash,
                parent_hash: B256::ZERO,
                timestamp: 0,
            });
        }
    }

    pub fn check(&self, block: &BlockSummary) -> BlockCheck {
        let Some(head) = self.window.back() else {
            return BlockCheck::Extends;
        };
        if block.number <= head.number {
            return match self.hash_at(block.number) {
                Some(h) if h == block.hash => BlockCheck::AlreadyProcessed,
                // Older than the window: nothing to compare against.
                None => BlockCheck::AlreadyProcessed,
                Some(_) => BlockCheck::Fork,
            };
        }
        if block.number > head.number + 1 {
            return BlockCheck::Gap {
                expected: head.number + 1,
            };
        }
        if block.parent_hash == head.hash {
            BlockCheck::Extends
        } else {
            BlockCheck::Fork
        }
    }

    /// Add a processed block. The caller must have checked it extends the head.
    pub fn push(&mut self, block: BlockSummary) {
        self.append(block);
    }

    fn append(&mut self, block: BlockSummary) {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(block);
    }

    /// The most recently processed block.
    pub fn head(&self) -> Option<&BlockSummary> {
        self.window.back()
    }

    pub fn hash_at(&self, number: u64) -> Option<B256> {
        self.window.iter().find(|b| b.number == number).map(|b| b.hash)
    }

    /// Tracked `(number, hash)` pairs, newest first.
    pub fn newest_first(&self) -> Vec<(u64, B256)> {
        self.window.iter().rev().map(|b| (b.number, b.hash)).collect()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Discard every block above `block_number`.
    pub fn rewind_to(&mut self, block_number: u64) {
        while let Some(back) = self.window.back() {
            if back.number > block_number {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }
}
