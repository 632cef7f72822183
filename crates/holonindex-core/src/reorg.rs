//! Reorg coordination.
//!
//! The coordinator owns the block tracker and moves through three states:
//!
//! ```text
//! Following ──fork──▶ Reconciling ──ancestor found──▶ Replaying ──head reached──▶ Following
//!                          │
//!                          └── no ancestor in window ──▶ ReorgDepthExceeded (fatal)
//! ```
//!
//! Rollback is two-phase: entities, watched sources and block hashes above
//! the ancestor are deleted from the store, then the in-memory registry and
//! tracker are rewound to match. Replay re-feeds blocks from `ancestor + 1`
//! through the normal pipeline.

use alloy_primitives::B256;

use crate::client::ChainClient;
use crate::error::IndexerError;
use crate::registry::SourceRegistry;
use crate::store::{EntityStore, RollbackSummary};
use crate::tracker::{BlockCheck, BlockTracker};
use crate::types::BlockSummary;

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Appending blocks that extend the tracked head.
    Following,
    /// A fork was observed at `detected_at`; rollback in progress.
    Reconciling { detected_at: u64 },
    /// Re-feeding blocks after a rollback to `ancestor` until `target`.
    Replaying { ancestor: u64, target: u64 },
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Following => write!(f, "following"),
            Self::Reconciling { .. } => write!(f, "reconciling"),
            Self::Replaying { .. } => write!(f, "replaying"),
        }
    }
}

/// Outcome of a completed reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgOutcome {
    /// Highest block both the old and the canonical chain agree on.
    pub ancestor: u64,
    pub ancestor_hash: B256,
    /// Block at which the fork was detected.
    pub detected_at: u64,
    /// Number of processed blocks that were discarded.
    pub depth: u64,
    pub removed: RollbackSummary,
}

pub struct ReorgCoordinator {
    state: CoordinatorState,
    tracker: BlockTracker,
    confirmation_depth: u64,
    watermark: Option<u64>,
}

impl ReorgCoordinator {
    pub fn new(reorg_window: usize, confirmation_depth: u64) -> Self {
        Self {
            state: CoordinatorState::Following,
            tracker: BlockTracker::new(reorg_window),
            confirmation_depth,
            watermark: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    pub fn tracker(&self) -> &BlockTracker {
        &self.tracker
    }

    /// Restore the tracked window and watermark after a restart.
    pub fn restore(&mut self, hashes: Vec<(u64, B256)>, watermark: Option<u64>) {
        self.tracker.restore(hashes);
        self.watermark = watermark;
        self.state = CoordinatorState::Following;
    }

    /// The last processed block.
    pub fn head(&self) -> Option<&BlockSummary> {
        self.tracker.head()
    }

    /// Classify an incoming block. A fork moves the coordinator to
    /// `Reconciling`.
    pub fn observe(&mut self, block: &BlockSummary) -> BlockCheck {
        let check = self.tracker.check(block);
        if check == BlockCheck::Fork {
            tracing::warn!(
                block = block.number,
                hash = %block.hash,
                parent = %block.parent_hash,
                tracked_head = self.tracker.head().map(|h| h.number),
                "fork detected"
            );
            self.state = CoordinatorState::Reconciling {
                detected_at: block.number,
            };
        }
        check
    }

    /// Compare the tracked head against the canonical chain. Catches reorgs
    /// to a chain that is not (yet) longer than ours.
    pub async fn verify_head(&mut self, client: &dyn ChainClient) -> Result<bool, IndexerError> {
        let Some(head) = self.tracker.head().cloned() else {
            return Ok(true);
        };
        let canonical = client.block_hash(head.number).await?;
        if canonical == Some(head.hash) {
            return Ok(true);
        }
        tracing::warn!(
            block = head.number,
            recorded = %head.hash,
            canonical = ?canonical,
            "processed block no longer canonical"
        );
        self.state = CoordinatorState::Reconciling {
            detected_at: head.number,
        };
        Ok(false)
    }

    /// Walk the tracked window newest to oldest until the chain client agrees
    /// on a recorded hash.
    pub async fn find_common_ancestor(
        &self,
        client: &dyn ChainClient,
    ) -> Result<(u64, B256), IndexerError> {
        for (number, recorded) in self.tracker.newest_first() {
            if client.block_hash(number).await? == Some(recorded) {
                return Ok((number, recorded));
            }
        }
        let block_number = match self.state {
            CoordinatorState::Reconciling { detected_at } => detected_at,
            _ => self.tracker.head().map(|h| h.number).unwrap_or_default(),
        };
        Err(IndexerError::ReorgDepthExceeded {
            block_number,
            retained: self.tracker.len(),
        })
    }

    /// Find the common ancestor, roll the store and registry back to it and
    /// switch to `Replaying`.
    pub async fn reconcile(
        &mut self,
        client: &dyn ChainClient,
        store: &dyn EntityStore,
        registry: &mut SourceRegistry,
    ) -> Result<ReorgOutcome, IndexerError> {
        let detected_at = match self.state {
            CoordinatorState::Reconciling { detected_at } => detected_at,
            other => {
                return Err(IndexerError::Other(format!(
                    "reconcile called while {other}"
                )))
            }
        };
        let old_head = self.tracker.head().map(|h| h.number).unwrap_or_default();
        let (ancestor, ancestor_hash) = self.find_common_ancestor(client).await?;

        let removed = store.delete_after(ancestor).await?;
        let reverted = registry.revert_after(ancestor);
        self.tracker.rewind_to(ancestor);
        if let Some(w) = self.watermark {
            if w > ancestor {
                store.set_confirmed_block(ancestor).await?;
                self.watermark = Some(ancestor);
            }
        }

        let target = client.head_number().await?;
        self.state = CoordinatorState::Replaying { ancestor, target };
        let depth = old_head.saturating_sub(ancestor);
        tracing::warn!(
            ancestor,
            detected_at,
            depth,
            entities = removed.entities,
            sources = reverted.len(),
            replay_to = target,
            "rolled back to common ancestor"
        );
        Ok(ReorgOutcome {
            ancestor,
            ancestor_hash,
            detected_at,
            depth,
            removed,
        })
    }

    /// Record a fully processed block.
    pub fn record(&mut self, block: BlockSummary) {
        let number = block.number;
        self.tracker.push(block);
        if let CoordinatorState::Replaying { ancestor, target } = self.state {
            if number >= target {
                tracing::info!(ancestor, head = number, "replay complete");
                self.state = CoordinatorState::Following;
            }
        }
    }

    /// Finish replaying when the client has nothing newer to offer.
    pub fn caught_up(&mut self) {
        if let CoordinatorState::Replaying { ancestor, .. } = self.state {
            let head = self.tracker.head().map(|h| h.number);
            tracing::info!(ancestor, head, "replay complete");
            self.state = CoordinatorState::Following;
        }
    }

    /// The confirmed watermark: `head − confirmation_depth`, never above the
    /// last processed block.
    pub fn confirmed_for(&self, chain_head: u64) -> Option<u64> {
        let processed = self.tracker.head()?.number;
        let confirmed = chain_head.checked_sub(self.confirmation_depth)?;
        Some(confirmed.min(processed))
    }

    /// Advance the watermark. Returns the new value if it moved forward.
    pub fn advance_watermark(&mut self, chain_head: u64) -> Option<u64> {
        let candidate = self.confirmed_for(chain_head)?;
        if self.watermark.is_some_and(|w| w >= candidate) {
            return None;
        }
        self.watermark = Some(candidate);
        Some(candidate)
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{
        Entity, EntityId, EntityKind, QuarantinedSource, TemplateKind, WatchedSource,
    };
    use crate::store::{CommitSummary, EntityReader, WriteBatch};
    use alloy_primitives::Address;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn h(n: u64) -> B256 {
        B256::left_padding_from(&n.to_be_bytes())
    }

    fn block(number: u64, hash: u64, parent: u64) -> BlockSummary {
        BlockSummary {
            number,
            hash: h(hash),
            parent_hash: h(parent),
            timestamp: number * 12,
        }
    }

    /// Canonical hashes by height.
    struct Canon(BTreeMap<u64, B256>);

    #[async_trait]
    impl ChainClient for Canon {
        async fn blocks_since(&self, _: Option<u64>) -> Result<Vec<crate::types::ChainBlock>, IndexerError> {
            Ok(vec![])
        }
        async fn block_hash(&self, number: u64) -> Result<Option<B256>, IndexerError> {
            Ok(self.0.get(&number).copied())
        }
        async fn head_number(&self) -> Result<u64, IndexerError> {
            Ok(self.0.keys().next_back().copied().unwrap_or_default())
        }
        fn confirmation_depth(&self) -> u64 {
            2
        }
    }

    /// Records the rollback height only.
    #[derive(Default)]
    struct RollbackRecorder(Mutex<Vec<u64>>);

    #[async_trait]
    impl EntityReader for RollbackRecorder {
        async fn get(&self, _: EntityKind, _: &EntityId) -> Result<Option<Entity>, IndexerError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl EntityStore for RollbackRecorder {
        async fn upsert_transaction(&self, _: WriteBatch) -> Result<CommitSummary, IndexerError> {
            Ok(CommitSummary::default())
        }
        async fn delete_after(&self, block_number: u64) -> Result<RollbackSummary, IndexerError> {
            self.0.lock().unwrap().push(block_number);
            Ok(RollbackSummary::default())
        }
        async fn entities_in_range(&self, _: EntityKind, _: u64, _: u64) -> Result<Vec<Entity>, IndexerError> {
            Ok(vec![])
        }
        async fn watched_sources(&self) -> Result<Vec<WatchedSource>, IndexerError> {
            Ok(vec![])
        }
        async fn clear(&self) -> Result<RollbackSummary, IndexerError> {
            Ok(RollbackSummary::default())
        }
        async fn quarantine_source(&self, _: QuarantinedSource) -> Result<(), IndexerError> {
            Ok(())
        }
        async fn quarantined_sources(&self) -> Result<Vec<QuarantinedSource>, IndexerError> {
            Ok(vec![])
        }
        async fn insert_block_hash(&self, _: u64, _: B256) -> Result<(), IndexerError> {
            Ok(())
        }
        async fn block_hash(&self, _: u64) -> Result<Option<B256>, IndexerError> {
            Ok(None)
        }
        async fn block_hashes_since(&self, _: u64) -> Result<Vec<(u64, B256)>, IndexerError> {
            Ok(vec![])
        }
        async fn confirmed_block(&self) -> Result<Option<u64>, IndexerError> {
            Ok(None)
        }
        async fn set_confirmed_block(&self, _: u64) -> Result<(), IndexerError> {
            Ok(())
        }
    }

    fn following(range: std::ops::RangeInclusive<u64>) -> ReorgCoordinator {
        let mut coord = ReorgCoordinator::new(16, 2);
        for i in range {
            let b = block(i, i, i - 1);
            assert_eq!(coord.observe(&b), BlockCheck::Extends);
            coord.record(b);
        }
        coord
    }

    #[tokio::test]
    async fn reconcile_rolls_back_to_ancestor() {
        let mut coord = following(100..=103);
        let mut registry = SourceRegistry::default();
        registry.register(Address::repeat_byte(1), TemplateKind::ManagedHolon, 102).unwrap();
        registry.quarantine(Address::repeat_byte(2), 101);

        // Canonical chain diverges after 100.
        let canon = Canon(
            [(100, h(100)), (101, h(9101)), (102, h(9102)), (103, h(9103)), (104, h(9104))]
                .into_iter()
                .collect(),
        );
        let fork = block(104, 9104, 9103);
        assert_eq!(coord.observe(&fork), BlockCheck::Fork);
        assert_eq!(coord.state(), CoordinatorState::Reconciling { detected_at: 104 });

        let store = RollbackRecorder::default();
        let outcome = coord.reconcile(&canon, &store, &mut registry).await.unwrap();
        assert_eq!(outcome.ancestor, 100);
        assert_eq!(outcome.depth, 3);
        assert_eq!(*store.0.lock().unwrap(), vec![100]);
        assert!(registry.is_empty());
        assert!(!registry.is_quarantined(&Address::repeat_byte(2)));
        assert_eq!(coord.head().unwrap().number, 100);
        assert_eq!(coord.state(), CoordinatorState::Replaying { ancestor: 100, target: 104 });

        for i in 101..=104 {
            let b = block(i, 9000 + i, if i == 101 { 100 } else { 9000 + i - 1 });
            assert_eq!(coord.observe(&b), BlockCheck::Extends);
            coord.record(b);
        }
        assert_eq!(coord.state(), CoordinatorState::Following);
    }

    #[tokio::test]
    async fn no_ancestor_in_window_is_fatal() {
        let mut coord = following(100..=102);
        let canon = Canon([(100, h(1)), (101, h(2)), (102, h(3))].into_iter().collect());
        assert!(!coord.verify_head(&canon).await.unwrap());
        let store = RollbackRecorder::default();
        let mut registry = SourceRegistry::default();
        let err = coord.reconcile(&canon, &store, &mut registry).await.unwrap_err();
        assert!(matches!(err, IndexerError::ReorgDepthExceeded { retained: 3, .. }));
        assert!(store.0.lock().unwrap().is_empty());
    }

    #[test]
    fn watermark_trails_head() {
        let mut coord = following(1..=10);
        assert_eq!(coord.advance_watermark(10), Some(8));
        assert_eq!(coord.advance_watermark(10), None);
        // Never ahead of what was processed.
        assert_eq!(coord.advance_watermark(50), Some(10));
        assert_eq!(coord.watermark(), Some(10));
    }

    #[test]
    fn watermark_waits_for_depth() {
        let mut coord = following(1..=1);
        assert_eq!(coord.advance_watermark(1), None);
        assert_eq!(coord.watermark(), None);
    }
}
