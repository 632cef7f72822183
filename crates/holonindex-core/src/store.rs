//! Entity store traits.
//!
//! Backends live in `holonindex-storage`. Every backend must apply a
//! [`WriteBatch`] atomically and enforce the same write rules, which are
//! centralised in [`resolve_write`].

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::entity::{Entity, EntityId, EntityKind, QuarantinedSource, WatchedSource};
use crate::error::IndexerError;

/// Point lookups. The only store access mappers get.
#[async_trait]
pub trait EntityReader: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>, IndexerError>;
}

/// Read-only view of an [`EntityStore`], handed to mappers.
pub struct ReadView<'a>(pub &'a dyn EntityStore);

#[async_trait]
impl EntityReader for ReadView<'_> {
    async fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        self.0.get(kind, id).await
    }
}

/// Every write produced by mapping a single event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub entities: Vec<Entity>,
    pub sources: Vec<WatchedSource>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.sources.is_empty()
    }
}

/// What a committed batch actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    /// Identical re-deliveries and already-present aggregates.
    pub unchanged: usize,
}

/// What a rollback removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    pub entities: usize,
    pub sources: usize,
    pub block_hashes: usize,
}

/// What to do with one entity of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Insert,
    Skip,
}

/// Decide how `new` is written given what is stored under its key.
///
/// - absent → insert
/// - aggregate already present → skip (create-if-absent)
/// - write-once with identical payload → skip (idempotent re-delivery)
/// - write-once with different payload → `DuplicateKeyConflict`
pub fn resolve_write(existing: Option<&Entity>, new: &Entity) -> Result<WriteAction, IndexerError> {
    match existing {
        None => Ok(WriteAction::Insert),
        Some(_) if !new.kind().is_write_once() => Ok(WriteAction::Skip),
        Some(old) if old == new => Ok(WriteAction::Skip),
        Some(_) => Err(IndexerError::DuplicateKeyConflict {
            kind: new.kind().to_string(),
            id: new.id().to_hex(),
        }),
    }
}

/// Transactional entity store.
#[async_trait]
pub trait EntityStore: EntityReader {
    /// Apply every write of a batch atomically: all or nothing.
    async fn upsert_transaction(&self, batch: WriteBatch) -> Result<CommitSummary, IndexerError>;

    /// Delete every entity, watched source, quarantine and block hash above
    /// `block_number`, and clamp the confirmed watermark to it.
    async fn delete_after(&self, block_number: u64) -> Result<RollbackSummary, IndexerError>;

    /// Delete everything but checkpoints, including the confirmed watermark.
    async fn clear(&self) -> Result<RollbackSummary, IndexerError>;

    /// Entities of `kind` with `from <= block_number <= to`, ordered by block then id.
    async fn entities_in_range(
        &self,
        kind: EntityKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<Entity>, IndexerError>;

    /// All persisted watched sources, ordered by registration block.
    async fn watched_sources(&self) -> Result<Vec<WatchedSource>, IndexerError>;

    /// Persist a quarantine. An address already quarantined keeps its block.
    async fn quarantine_source(&self, source: QuarantinedSource) -> Result<(), IndexerError>;

    /// All persisted quarantines, ordered by block.
    async fn quarantined_sources(&self) -> Result<Vec<QuarantinedSource>, IndexerError>;

    /// Record the hash of a processed block.
    async fn insert_block_hash(&self, block_number: u64, hash: B256) -> Result<(), IndexerError>;

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>, IndexerError>;

    /// Recorded `(number, hash)` pairs at or above `from`, ascending.
    async fn block_hashes_since(&self, from: u64) -> Result<Vec<(u64, B256)>, IndexerError>;

    /// Highest block whose entities are confirmed (queryable).
    async fn confirmed_block(&self) -> Result<Option<u64>, IndexerError>;

    async fn set_confirmed_block(&self, block_number: u64) -> Result<(), IndexerError>;
}
