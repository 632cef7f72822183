//! The per-chain indexing pipeline.
//!
//! One pipeline owns one chain's registry, reorg coordinator, cursor and
//! checkpoint manager, and processes logs strictly in
//! `(block_number, log_index)` order:
//!
//! ```text
//! ChainClient::blocks_since ─▶ ReorgCoordinator::observe
//!                                 │ Extends
//!                                 ▼
//!             for each log: SourceRegistry::template_of ─▶ EventDecoder::decode
//!                                 ─▶ HandlerDispatcher::dispatch ─▶ EntityStore::upsert_transaction
//!                                 ─▶ SourceRegistry::register
//!                                 │
//!                                 ▼
//!             record block hash ─▶ CheckpointManager::maybe_save
//! ```
//!
//! Shutdown is observed between blocks.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use futures::Stream;
use tokio::sync::watch;

use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::client::{ChainClient, EventDecoder};
use crate::cursor::Cursor;
use crate::dispatcher::HandlerDispatcher;
use crate::entity::{QuarantinedSource, WatchedSource};
use crate::error::IndexerError;
use crate::indexer::{IndexerConfig, IndexerState};
use crate::mapper::MappingOutput;
use crate::registry::SourceRegistry;
use crate::reorg::{CoordinatorState, ReorgCoordinator, ReorgOutcome};
use crate::retry::RetryPolicy;
use crate::store::{EntityStore, ReadView};
use crate::tracker::BlockCheck;
use crate::types::{BlockSummary, ChainBlock, RawLog};

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub blocks: u64,
    /// Logs that decoded to a routed event and were committed.
    pub events: u64,
    pub entities_written: u64,
    /// Logs from addresses that are not watched.
    pub unwatched_logs: u64,
    pub malformed_events: u64,
    pub conflicting_registrations: u64,
    pub reorgs: u64,
}

/// What one call to [`Pipeline::sync_once`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncProgress {
    /// Processed this many new blocks.
    Advanced { blocks: usize },
    /// The client had nothing newer.
    CaughtUp,
    /// Rolled back to `ancestor`; replay follows on the next call.
    Reorged { ancestor: u64 },
    /// `to_block` has been processed.
    Finished,
}

/// What processing one block did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Processed,
    /// Already processed with the same hash.
    Skipped,
    Reorged { ancestor: u64 },
}

pub struct Pipeline {
    config: IndexerConfig,
    client: Arc<dyn ChainClient>,
    decoder: Arc<dyn EventDecoder>,
    store: Arc<dyn EntityStore>,
    checkpoint: CheckpointManager,
    registry: SourceRegistry,
    dispatcher: HandlerDispatcher,
    coordinator: ReorgCoordinator,
    cursor: Cursor,
    retry: RetryPolicy,
    state: IndexerState,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        config: IndexerConfig,
        client: Arc<dyn ChainClient>,
        decoder: Arc<dyn EventDecoder>,
        store: Arc<dyn EntityStore>,
        checkpoints: Box<dyn CheckpointStore>,
    ) -> Self {
        let checkpoint = CheckpointManager::new(
            checkpoints,
            &config.chain,
            &config.id,
            config.checkpoint_interval,
        );
        let depth = client.confirmation_depth();
        if depth != config.confirmation_depth {
            tracing::warn!(
                chain = %config.chain,
                client_depth = depth,
                config_depth = config.confirmation_depth,
                "confirmation depth differs from config; using the client's"
            );
        }
        Self {
            coordinator: ReorgCoordinator::new(config.reorg_window, depth),
            cursor: Cursor::start_at(config.from_block),
            retry: RetryPolicy::new(config.retry.clone()),
            registry: SourceRegistry::default(),
            dispatcher: HandlerDispatcher::with_holon_mappers(),
            state: IndexerState::Idle,
            stats: PipelineStats::default(),
            checkpoint,
            client,
            decoder,
            store,
            config,
        }
    }

    /// Replace the routing table.
    pub fn with_dispatcher(mut self, dispatcher: HandlerDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn coordinator_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn watermark(&self) -> Option<u64> {
        self.coordinator.watermark()
    }

    /// Blocks behind the head before entities are confirmed. Owned by the
    /// chain client.
    pub fn confirmation_depth(&self) -> u64 {
        self.coordinator.confirmation_depth()
    }

    /// Notifications for every newly watched source.
    pub fn registrations(&self) -> impl Stream<Item = WatchedSource> + Send + 'static {
        self.registry.registrations()
    }

    // ─── Startup ─────────────────────────────────────────────────────────────

    /// Load the checkpoint and rebuild in-memory state from the store.
    ///
    /// Anything the store holds above the checkpoint belongs to a block that
    /// was not checkpointed and is discarded; it is re-derived on replay.
    /// Without a checkpoint the whole store is discarded.
    pub async fn resume(&mut self) -> Result<(), IndexerError> {
        let store = self.store.clone();
        let (cursor, removed) = match self.checkpoint.load().await? {
            Some(cp) => {
                tracing::info!(
                    chain = %self.config.chain,
                    block = cp.block_number,
                    hash = %cp.block_hash,
                    "resuming from checkpoint"
                );
                let last = cp.block_number;
                let removed = self
                    .retry
                    .retry("delete_after", || store.delete_after(last))
                    .await?;
                (Cursor::after(cp.block_number, cp.block_hash), removed)
            }
            None => {
                let removed = self.retry.retry("clear", || store.clear()).await?;
                (Cursor::start_at(self.config.from_block), removed)
            }
        };
        self.cursor = cursor;
        if removed.entities + removed.sources + removed.block_hashes > 0 {
            tracing::info!(
                chain = %self.config.chain,
                next_block = self.cursor.next_block,
                entities = removed.entities,
                sources = removed.sources,
                "discarded writes past checkpoint"
            );
        }

        let sources = self
            .retry
            .retry("watched_sources", || store.watched_sources())
            .await?;
        let quarantined = self
            .retry
            .retry("quarantined_sources", || store.quarantined_sources())
            .await?;
        self.registry.clear();
        self.registry.restore(sources)?;
        self.registry.restore_quarantined(quarantined);
        self.registry.seed_factories(&self.config.factory_addresses)?;

        let (hashes, watermark) = match (self.cursor.last_processed(), self.cursor.last_hash) {
            (Some(last), Some(_)) => {
                let from = (last + 1).saturating_sub(self.config.reorg_window as u64);
                let hashes = self
                    .retry
                    .retry("block_hashes_since", || store.block_hashes_since(from))
                    .await?;
                let mut watermark = store.confirmed_block().await?;
                if watermark.is_some_and(|w| w > last) {
                    store.set_confirmed_block(last).await?;
                    watermark = Some(last);
                }
                (hashes, watermark)
            }
            _ => (vec![], None),
        };
        self.coordinator.restore(hashes, watermark);

        tracing::info!(
            chain = %self.config.chain,
            next_block = self.cursor.next_block,
            sources = self.registry.len(),
            tracked = self.coordinator.tracker().len(),
            "pipeline ready"
        );
        Ok(())
    }

    // ─── Main loop ───────────────────────────────────────────────────────────

    /// Run until `to_block` is processed, `shutdown` flips to `true`, or a
    /// fatal error occurs. A checkpoint is saved at the last fully processed
    /// block on exit.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
        self.resume().await?;
        self.state = IndexerState::Backfilling;
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        let result = loop {
            if *shutdown.borrow() {
                tracing::info!(chain = %self.config.chain, "shutdown requested");
                break Ok(());
            }
            match self.sync_batch(Some(&shutdown)).await {
                Ok(SyncProgress::Finished) => break Ok(()),
                Ok(SyncProgress::CaughtUp) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        Ok(()) = shutdown.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };

        self.state = IndexerState::Stopping;
        let saved = self.save_position().await;
        match result {
            Ok(()) => {
                saved?;
                self.state = IndexerState::Stopped;
                tracing::info!(
                    chain = %self.config.chain,
                    next_block = self.cursor.next_block,
                    blocks = self.stats.blocks,
                    events = self.stats.events,
                    "pipeline stopped"
                );
                Ok(())
            }
            Err(e) => {
                if let Err(save_err) = saved {
                    tracing::error!(error = %save_err, "failed to save checkpoint after fatal error");
                }
                self.state = IndexerState::Error;
                tracing::error!(chain = %self.config.chain, error = %e, "pipeline halted");
                Err(e)
            }
        }
    }

    /// One poll: fetch what the client has and process it.
    pub async fn sync_once(&mut self) -> Result<SyncProgress, IndexerError> {
        self.sync_batch(None).await
    }

    /// Like [`Pipeline::sync_once`], stopping before the next block once
    /// `shutdown` reads `true`.
    async fn sync_batch(
        &mut self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<SyncProgress, IndexerError> {
        if self.cursor.reached(self.config.to_block) {
            return Ok(SyncProgress::Finished);
        }
        if matches!(self.coordinator.state(), CoordinatorState::Reconciling { .. }) {
            let outcome = self.recover().await?;
            return Ok(SyncProgress::Reorged {
                ancestor: outcome.ancestor,
            });
        }

        let client = self.client.clone();
        let last = self.cursor.last_processed();
        let blocks = self
            .retry
            .retry("blocks_since", || client.blocks_since(last))
            .await?;

        if blocks.is_empty() {
            let canonical = match self.coordinator.head().map(|h| (h.number, h.hash)) {
                Some((number, hash)) => {
                    let c = client.as_ref();
                    self.retry
                        .retry("block_hash", || async move {
                            Ok(c.block_hash(number).await? == Some(hash))
                        })
                        .await?
                }
                None => true,
            };
            // The second check moves the coordinator into Reconciling.
            if !canonical && !self.coordinator.verify_head(client.as_ref()).await? {
                let outcome = self.recover().await?;
                return Ok(SyncProgress::Reorged {
                    ancestor: outcome.ancestor,
                });
            }
            self.coordinator.caught_up();
            self.state = IndexerState::Live;
            self.refresh_watermark().await?;
            return Ok(SyncProgress::CaughtUp);
        }

        let mut processed = 0usize;
        for block in blocks {
            if shutdown.is_some_and(|s| *s.borrow()) {
                tracing::debug!(block = block.number(), "shutdown requested mid-batch");
                break;
            }
            if self
                .config
                .to_block
                .is_some_and(|end| block.number() > end)
            {
                break;
            }
            match self.process_block(block).await? {
                BlockOutcome::Processed => processed += 1,
                BlockOutcome::Skipped => {}
                BlockOutcome::Reorged { ancestor } => {
                    return Ok(SyncProgress::Reorged { ancestor });
                }
            }
        }
        self.refresh_watermark().await?;

        if self.cursor.reached(self.config.to_block) {
            return Ok(SyncProgress::Finished);
        }
        Ok(SyncProgress::Advanced { blocks: processed })
    }

    // ─── Blocks ──────────────────────────────────────────────────────────────

    /// Process every log of `block` in log-index order, then record the block.
    pub async fn process_block(&mut self, block: ChainBlock) -> Result<BlockOutcome, IndexerError> {
        match self.coordinator.observe(&block.summary) {
            BlockCheck::Extends => {}
            BlockCheck::AlreadyProcessed => {
                tracing::debug!(block = block.number(), "block already processed");
                return Ok(BlockOutcome::Skipped);
            }
            BlockCheck::Fork => {
                let outcome = self.recover().await?;
                return Ok(BlockOutcome::Reorged {
                    ancestor: outcome.ancestor,
                });
            }
            BlockCheck::Gap { expected } => {
                return Err(IndexerError::Other(format!(
                    "chain client skipped blocks: expected {expected}, got {}",
                    block.number()
                )));
            }
        }

        let logs = block.ordered_logs();
        let log_count = logs.len();
        for log in logs {
            self.process_log(log, &block.summary).await?;
        }

        let summary = block.summary;
        let store = self.store.clone();
        self.retry
            .retry("insert_block_hash", || {
                store.insert_block_hash(summary.number, summary.hash)
            })
            .await?;
        self.coordinator.record(summary.clone());
        self.cursor.advance(summary.number, summary.hash);
        self.checkpoint.maybe_save(summary.number, summary.hash).await?;
        self.stats.blocks += 1;

        tracing::debug!(block = summary.number, logs = log_count, "block processed");
        if summary.number % 1_000 == 0 {
            tracing::info!(
                chain = %self.config.chain,
                block = summary.number,
                events = self.stats.events,
                sources = self.registry.len(),
                "indexing progress"
            );
        }
        Ok(BlockOutcome::Processed)
    }

    /// Decode, map and commit one log. Only errors that must halt the
    /// pipeline are returned.
    async fn process_log(&mut self, log: &RawLog, header: &BlockSummary) -> Result<(), IndexerError> {
        let Some(template) = self.registry.template_of(&log.address) else {
            self.stats.unwatched_logs += 1;
            if self.registry.is_quarantined(&log.address) {
                tracing::error!(
                    address = %log.address,
                    block = header.number,
                    log_index = log.log_index,
                    "dropping event from quarantined source"
                );
            }
            return Ok(());
        };

        let decoder = self.decoder.as_ref();
        let decoded = self
            .retry
            .retry("decode", || async move { decoder.decode(log, header, template) })
            .await?;
        let Some(event) = decoded else {
            tracing::debug!(
                address = %log.address,
                block = header.number,
                log_index = log.log_index,
                template = %template,
                "log signature not in template schema"
            );
            return Ok(());
        };

        let store = self.store.clone();
        let view = ReadView(store.as_ref());
        let dispatcher = &self.dispatcher;
        let mapped = self
            .retry
            .retry("map", || dispatcher.dispatch(&event, template, &view))
            .await;
        let mut output: MappingOutput = match mapped {
            Ok(Some(output)) => output,
            Ok(None) => return Ok(()),
            Err(e @ IndexerError::MalformedEvent { .. }) => {
                self.stats.malformed_events += 1;
                tracing::warn!(
                    block = header.number,
                    tx = %log.tx_hash,
                    log_index = log.log_index,
                    error = %e,
                    "dropping malformed event"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut fresh = Vec::with_capacity(output.registrations.len());
        for source in output.registrations.drain(..) {
            match self.registry.check(source.address, source.template_kind) {
                Ok(true) => fresh.push(source),
                Ok(false) => {}
                Err(e) => {
                    self.stats.conflicting_registrations += 1;
                    tracing::error!(
                        address = %source.address,
                        block = header.number,
                        tx = %log.tx_hash,
                        log_index = log.log_index,
                        error = %e,
                        "conflicting registration; event dropped"
                    );
                    let quarantined = QuarantinedSource {
                        address: source.address,
                        quarantined_at_block: header.number,
                    };
                    self.retry
                        .retry("quarantine_source", || store.quarantine_source(quarantined))
                        .await?;
                    self.registry.quarantine(source.address, header.number);
                    return Ok(());
                }
            }
        }
        output.registrations = fresh;

        let batch = output.into_batch();
        let summary = self
            .retry
            .retry("upsert_transaction", || store.upsert_transaction(batch.clone()))
            .await?;
        if summary.unchanged > 0 {
            tracing::debug!(
                block = header.number,
                log_index = log.log_index,
                unchanged = summary.unchanged,
                "upsert was a no-op"
            );
        }

        for source in batch.sources {
            self.registry
                .register(source.address, source.template_kind, source.registered_at_block)?;
        }
        self.stats.events += 1;
        self.stats.entities_written += summary.inserted as u64;
        Ok(())
    }

    // ─── Reorgs ──────────────────────────────────────────────────────────────

    async fn recover(&mut self) -> Result<ReorgOutcome, IndexerError> {
        self.state = IndexerState::ReorgRecovery;
        let mut attempt = 0u32;
        let outcome = loop {
            match self
                .coordinator
                .reconcile(self.client.as_ref(), self.store.as_ref(), &mut self.registry)
                .await
            {
                Ok(outcome) => break outcome,
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        return Err(e);
                    };
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying reorg recovery");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };
        self.cursor = Cursor::after(outcome.ancestor, outcome.ancestor_hash);
        self.checkpoint
            .force_save(outcome.ancestor, outcome.ancestor_hash)
            .await?;
        self.stats.reorgs += 1;
        self.state = IndexerState::Backfilling;
        Ok(outcome)
    }

    // ─── Watermark & checkpoints ─────────────────────────────────────────────

    async fn refresh_watermark(&mut self) -> Result<(), IndexerError> {
        let client = self.client.clone();
        let head = self
            .retry
            .retry("head_number", || client.head_number())
            .await?;
        if let Some(confirmed) = self.coordinator.advance_watermark(head) {
            let store = self.store.clone();
            self.retry
                .retry("set_confirmed_block", || store.set_confirmed_block(confirmed))
                .await?;
            tracing::debug!(confirmed, head, "confirmed watermark advanced");
        }
        Ok(())
    }

    async fn save_position(&mut self) -> Result<(), IndexerError> {
        if let (Some(last), Some(hash)) = (self.cursor.last_processed(), self.cursor.last_hash) {
            self.checkpoint.force_save(last, hash).await?;
        }
        Ok(())
    }

    /// The last fully processed block, if any.
    pub fn last_processed(&self) -> Option<(u64, B256)> {
        self.cursor
            .last_hash
            .and_then(|h| self.cursor.last_processed().map(|n| (n, h)))
    }
}
