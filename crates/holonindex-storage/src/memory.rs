//! In-memory storage backend.
//!
//! Stores entities, watched sources, block hashes and checkpoints in RAM.
//! Useful for tests and short-lived indexers that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use holonindex_core::checkpoint::{Checkpoint, CheckpointStore};
use holonindex_core::entity::{Entity, EntityId, EntityKind, QuarantinedSource, WatchedSource};
use holonindex_core::error::IndexerError;
use holonindex_core::store::{
    resolve_write, CommitSummary, EntityReader, EntityStore, RollbackSummary, WriteAction,
    WriteBatch,
};

#[derive(Default)]
struct Tables {
    entities: BTreeMap<(EntityKind, EntityId), Entity>,
    sources: BTreeMap<Address, WatchedSource>,
    quarantined: BTreeMap<Address, u64>,
    block_hashes: BTreeMap<u64, B256>,
    confirmed: Option<u64>,
}

/// A deterministic dump of everything the store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub entities: Vec<Entity>,
    pub sources: Vec<WatchedSource>,
    pub quarantined: Vec<QuarantinedSource>,
    pub block_hashes: Vec<(u64, B256)>,
    pub confirmed: Option<u64>,
}

/// In-memory entity store for one chain.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> IndexerError {
    IndexerError::Storage(format!("store lock poisoned: {e}"))
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, IndexerError> {
        self.tables.lock().map_err(poisoned)
    }

    /// Number of stored entities of `kind`.
    pub fn count(&self, kind: EntityKind) -> Result<usize, IndexerError> {
        Ok(self.tables()?.entities.keys().filter(|(k, _)| *k == kind).count())
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, IndexerError> {
        let t = self.tables()?;
        Ok(StoreSnapshot {
            entities: t.entities.values().cloned().collect(),
            sources: t.sources.values().cloned().collect(),
            quarantined: t
                .quarantined
                .iter()
                .map(|(address, block)| QuarantinedSource {
                    address: *address,
                    quarantined_at_block: *block,
                })
                .collect(),
            block_hashes: t.block_hashes.iter().map(|(n, h)| (*n, *h)).collect(),
            confirmed: t.confirmed,
        })
    }
}

#[async_trait]
impl EntityReader for InMemoryStorage {
    async fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        Ok(self.tables()?.entities.get(&(kind, id.clone())).cloned())
    }
}

#[async_trait]
impl EntityStore for InMemoryStorage {
    async fn upsert_transaction(&self, batch: WriteBatch) -> Result<CommitSummary, IndexerError> {
        let mut t = self.tables()?;

        // Validate the whole batch before touching the tables.
        let mut staged: BTreeMap<(EntityKind, EntityId), Entity> = BTreeMap::new();
        let mut summary = CommitSummary::default();
        for entity in batch.entities {
            let key = (entity.kind(), entity.id());
            let existing = staged.get(&key).or_else(|| t.entities.get(&key));
            match resolve_write(existing, &entity)? {
                WriteAction::Insert => {
                    staged.insert(key, entity);
                    summary.inserted += 1;
                }
                WriteAction::Skip => summary.unchanged += 1,
            }
        }

        t.entities.extend(staged);
        for source in batch.sources {
            t.sources.entry(source.address).or_insert(source);
        }
        Ok(summary)
    }

    async fn delete_after(&self, block_number: u64) -> Result<RollbackSummary, IndexerError> {
        let mut t = self.tables()?;
        let before = (t.entities.len(), t.sources.len(), t.block_hashes.len());
        t.entities.retain(|_, e| e.block_number() <= block_number);
        t.sources.retain(|_, s| s.registered_at_block <= block_number);
        t.quarantined.retain(|_, at| *at <= block_number);
        t.block_hashes.retain(|n, _| *n <= block_number);
        if t.confirmed.is_some_and(|c| c > block_number) {
            t.confirmed = Some(block_number);
        }
        let summary = RollbackSummary {
            entities: before.0 - t.entities.len(),
            sources: before.1 - t.sources.len(),
            block_hashes: before.2 - t.block_hashes.len(),
        };
        tracing::debug!(block_number, ?summary, "rolled back storage");
        Ok(summary)
    }

    async fn clear(&self) -> Result<RollbackSummary, IndexerError> {
        let mut t = self.tables()?;
        let summary = RollbackSummary {
            entities: t.entities.len(),
            sources: t.sources.len(),
            block_hashes: t.block_hashes.len(),
        };
        *t = Tables::default();
        tracing::debug!(?summary, "cleared storage");
        Ok(summary)
    }

    async fn entities_in_range(
        &self,
        kind: EntityKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<Entity>, IndexerError> {
        let t = self.tables()?;
        let mut out: Vec<Entity> = t
            .entities
            .iter()
            .filter(|((k, _), e)| *k == kind && (from..=to).contains(&e.block_number()))
            .map(|(_, e)| e.clone())
            .collect();
        out.sort_by_key(|e| (e.block_number(), e.id()));
        Ok(out)
    }

    async fn watched_sources(&self) -> Result<Vec<WatchedSource>, IndexerError> {
        let mut out: Vec<_> = self.tables()?.sources.values().cloned().collect();
        out.sort_by_key(|s| (s.registered_at_block, s.address));
        Ok(out)
    }

    async fn quarantine_source(&self, source: QuarantinedSource) -> Result<(), IndexerError> {
        self.tables()?
            .quarantined
            .entry(source.address)
            .or_insert(source.quarantined_at_block);
        Ok(())
    }

    async fn quarantined_sources(&self) -> Result<Vec<QuarantinedSource>, IndexerError> {
        let mut out: Vec<_> = self
            .tables()?
            .quarantined
            .iter()
            .map(|(address, block)| QuarantinedSource {
                address: *address,
                quarantined_at_block: *block,
            })
            .collect();
        out.sort_by_key(|q| (q.quarantined_at_block, q.address));
        Ok(out)
    }

    async fn insert_block_hash(&self, block_number: u64, hash: B256) -> Result<(), IndexerError> {
        self.tables()?.block_hashes.insert(block_number, hash);
        Ok(())
    }

    async fn block_hash(&self, block_number: u64) -> Result<Option<B256>, IndexerError> {
        Ok(self.tables()?.block_hashes.get(&block_number).copied())
    }

    async fn block_hashes_since(&self, from: u64) -> Result<Vec<(u64, B256)>, IndexerError> {
        Ok(self
            .tables()?
            .block_hashes
            .range(from..)
            .map(|(n, h)| (*n, *h))
            .collect())
    }

    async fn confirmed_block(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.tables()?.confirmed)
    }

    async fn set_confirmed_block(&self, block_number: u64) -> Result<(), IndexerError> {
        self.tables()?.confirmed = Some(block_number);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let key = format!("{chain_id}:{indexer_id}");
        Ok(self.checkpoints.lock().map_err(poisoned)?.get(&key).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let key = format!("{}:{}", checkpoint.chain_id, checkpoint.indexer_id);
        self.checkpoints.lock().map_err(poisoned)?.insert(key, checkpoint);
        Ok(())
    }
}
