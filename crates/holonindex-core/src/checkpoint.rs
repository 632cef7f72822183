//! Checkpoint manager: persists the pipeline's position for crash recovery.
//!
//! A checkpoint stores the last fully processed block number and hash. On
//! restart the pipeline resumes from it rather than re-indexing from
//! `from_block`.

use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// A persisted checkpoint for an indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// Last fully processed block number.
    pub block_number: u64,
    /// Last fully processed block hash.
    pub block_hash: B256,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Storage for checkpoints. Implemented by the backends in
/// `holonindex-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        (**self).load(chain_id, indexer_id).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        (**self).save(checkpoint).await
    }
}

/// Manages checkpoint reads and writes for one pipeline.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    chain_id: String,
    indexer_id: String,
    /// Save every N blocks.
    save_interval: u64,
    /// Blocks since the last save.
    counter: u64,
}

impl CheckpointManager {
    pub fn new(
        store: Box<dyn CheckpointStore>,
        chain_id: impl Into<String>,
        indexer_id: impl Into<String>,
        save_interval: u64,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            indexer_id: indexer_id.into(),
            save_interval: save_interval.max(1),
            counter: 0,
        }
    }

    pub async fn load(&self) -> Result<Option<Checkpoint>, IndexerError> {
        self.store.load(&self.chain_id, &self.indexer_id).await
    }

    /// Save every `save_interval` blocks. Call after each processed block.
    pub async fn maybe_save(
        &mut self,
        block_number: u64,
        block_hash: B256,
    ) -> Result<(), IndexerError> {
        self.counter += 1;
        if self.counter >= self.save_interval {
            self.force_save(block_number, block_hash).await?;
        }
        Ok(())
    }

    /// Save immediately (shutdown, reorg recovery).
    pub async fn force_save(
        &mut self,
        block_number: u64,
        block_hash: B256,
    ) -> Result<(), IndexerError> {
        let cp = Checkpoint {
            chain_id: self.chain_id.clone(),
            indexer_id: self.indexer_id.clone(),
            block_number,
            block_hash,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await?;
        self.counter = 0;
        tracing::debug!(chain = %self.chain_id, block = block_number, "checkpoint saved");
        Ok(())
    }
}
