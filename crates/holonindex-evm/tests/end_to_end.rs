//! Pipeline runs over a scripted chain with the real ABI decoder and the
//! in-memory store.

use std::sync::{Arc, Mutex};

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::watch;

use holonindex_core::entity::{Entity, EntityKind, QuarantinedSource, TemplateKind, WatchedSource};
use holonindex_core::error::IndexerError;
use holonindex_core::event::EventKind;
use holonindex_core::pipeline::{Pipeline, SyncProgress};
use holonindex_core::retry::RetryConfig;
use holonindex_core::types::{BlockSummary, ChainBlock, RawLog};
use holonindex_core::{ChainClient, CoordinatorState, IndexQuery, IndexerState};
use holonindex_evm::{AbiEventDecoder, IndexerBuilder};
use holonindex_storage::{InMemoryStorage, StoreSnapshot};

// ─── Actors ───────────────────────────────────────────────────────────────────

fn factory() -> Address {
    Address::repeat_byte(0xfa)
}
fn flavor() -> Address {
    Address::repeat_byte(0xf1)
}
fn creator() -> Address {
    Address::repeat_byte(0xc0)
}
fn holon() -> Address {
    Address::repeat_byte(0x40)
}
fn member() -> Address {
    Address::repeat_byte(0x33)
}

// ─── Log construction ─────────────────────────────────────────────────────────

fn tx(n: u8) -> B256 {
    B256::repeat_byte(n)
}

fn log(
    emitter: Address,
    kind: EventKind,
    values: Vec<DynSolValue>,
    tx_hash: B256,
    log_index: u32,
    tx_to: Option<Address>,
) -> RawLog {
    let decoder = AbiEventDecoder::new();
    let topic0 = decoder.schema(kind).map(|s| s.topic0).unwrap();
    RawLog {
        address: emitter,
        topics: vec![topic0],
        data: DynSolValue::Tuple(values).abi_encode_params(),
        tx_hash,
        log_index,
        tx_from: Some(creator()),
        tx_to,
        removed: false,
    }
}

fn new_flavor(tx_hash: B256, log_index: u32) -> RawLog {
    log(
        factory(),
        EventKind::NewFlavor,
        vec![
            DynSolValue::Address(flavor()),
            DynSolValue::String("Stewards".into()),
        ],
        tx_hash,
        log_index,
        Some(factory()),
    )
}

fn new_holon(tx_hash: B256, log_index: u32, tx_to: Option<Address>) -> RawLog {
    new_holon_at(holon(), tx_hash, log_index, tx_to)
}

fn new_holon_at(
    address: Address,
    tx_hash: B256,
    log_index: u32,
    tx_to: Option<Address>,
) -> RawLog {
    log(
        factory(),
        EventKind::NewHolon,
        vec![
            DynSolValue::String("Alpha".into()),
            DynSolValue::Address(address),
        ],
        tx_hash,
        log_index,
        tx_to,
    )
}

fn reward_distributed(tx_hash: B256, log_index: u32) -> RawLog {
    log(
        holon(),
        EventKind::RewardDistributed,
        vec![
            DynSolValue::Address(Address::repeat_byte(0x77)),
            DynSolValue::Uint(U256::from(1_000u64), 256),
            DynSolValue::Uint(U256::from(3u64), 256),
            DynSolValue::String("appreciation".into()),
        ],
        tx_hash,
        log_index,
        Some(holon()),
    )
}

fn member_rewarded(tx_hash: B256, log_index: u32) -> RawLog {
    log(
        holon(),
        EventKind::MemberRewarded,
        vec![
            DynSolValue::Address(holon()),
            DynSolValue::Address(member()),
            DynSolValue::Uint(U256::from(300u64), 256),
            DynSolValue::Bool(false),
            DynSolValue::String("appreciation".into()),
        ],
        tx_hash,
        log_index,
        Some(holon()),
    )
}

// ─── Scripted chain ───────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct ChainScript {
    blocks: Vec<ChainBlock>,
}

impl ChainScript {
    fn hash(number: u64, fork: u8) -> B256 {
        keccak256([number.to_be_bytes().as_slice(), &[fork]].concat())
    }

    /// Append a block on `fork` carrying `logs`.
    fn push(mut self, fork: u8, logs: Vec<RawLog>) -> Self {
        let number = self.blocks.len() as u64;
        let parent_hash = self
            .blocks
            .last()
            .map(|b| b.summary.hash)
            .unwrap_or(B256::ZERO);
        self.blocks.push(ChainBlock {
            summary: BlockSummary {
                number,
                hash: Self::hash(number, fork),
                parent_hash,
                timestamp: 1_700_000_000 + number * 12,
            },
            logs,
        });
        self
    }

    fn empty(mut self, fork: u8, count: usize) -> Self {
        for _ in 0..count {
            self = self.push(fork, vec![]);
        }
        self
    }

    /// Keep blocks `0..=last`.
    fn keep_through(mut self, last: u64) -> Self {
        self.blocks.truncate(last as usize + 1);
        self
    }

    fn timestamp(&self, number: u64) -> u64 {
        self.blocks[number as usize].summary.timestamp
    }
}

/// The factory announces itself as a holon at 1, then emits a flavor at 2.
fn self_registering_factory(fork: u8) -> ChainScript {
    ChainScript::default()
        .push(0, vec![])
        .push(fork, vec![new_holon_at(factory(), tx(0x02), 0, Some(flavor()))])
        .push(fork, vec![new_flavor(tx(0x03), 0)])
}

/// Flavor at 1, holon at 2, rewards at 3 and 4, then an empty block.
fn holon_chain(fork: u8) -> ChainScript {
    ChainScript::default()
        .push(fork, vec![])
        .push(fork, vec![new_flavor(tx(0x01), 0)])
        .push(fork, vec![new_holon(tx(0x02), 0, Some(flavor()))])
        .push(fork, vec![reward_distributed(tx(0x03), 0)])
        .push(fork, vec![member_rewarded(tx(0x04), 2)])
        .push(fork, vec![])
}

struct ScriptedChain {
    blocks: Mutex<Vec<ChainBlock>>,
    batch: usize,
    depth: u64,
}

impl ScriptedChain {
    fn new(script: ChainScript, batch: usize, depth: u64) -> Arc<Self> {
        Arc::new(Self {
            blocks: Mutex::new(script.blocks),
            batch,
            depth,
        })
    }

    fn replace(&self, script: ChainScript) {
        *self.blocks.lock().unwrap() = script.blocks;
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn blocks_since(&self, last_processed: Option<u64>) -> Result<Vec<ChainBlock>, IndexerError> {
        let blocks = self.blocks.lock().unwrap();
        let start = last_processed.map(|n| n as usize + 1).unwrap_or(0);
        let end = (start + self.batch).min(blocks.len());
        Ok(blocks.get(start..end).map(|s| s.to_vec()).unwrap_or_default())
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, IndexerError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(number as usize)
            .map(|b| b.summary.hash))
    }

    async fn head_number(&self) -> Result<u64, IndexerError> {
        Ok(self.blocks.lock().unwrap().len().saturating_sub(1) as u64)
    }

    fn confirmation_depth(&self) -> u64 {
        self.depth
    }
}

/// Flips the shutdown signal as soon as a batch is fetched.
struct StopOnFetch {
    inner: Arc<ScriptedChain>,
    stop: watch::Sender<bool>,
    fetches: Mutex<u32>,
}

#[async_trait]
impl ChainClient for StopOnFetch {
    async fn blocks_since(&self, last_processed: Option<u64>) -> Result<Vec<ChainBlock>, IndexerError> {
        *self.fetches.lock().unwrap() += 1;
        self.stop.send_replace(true);
        self.inner.blocks_since(last_processed).await
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>, IndexerError> {
        self.inner.block_hash(number).await
    }

    async fn head_number(&self) -> Result<u64, IndexerError> {
        self.inner.head_number().await
    }

    fn confirmation_depth(&self) -> u64 {
        self.inner.confirmation_depth()
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        multiplier: 1.0,
    }
}

fn builder() -> IndexerBuilder {
    IndexerBuilder::new()
        .id("holons")
        .chain("testnet")
        .factory(factory())
        .checkpoint_interval(1_000)
        .poll_interval_ms(1)
        .retry(fast_retry())
}

fn pipeline(b: &IndexerBuilder, chain: &Arc<ScriptedChain>, store: &Arc<InMemoryStorage>) -> Pipeline {
    let client: Arc<dyn ChainClient> = chain.clone();
    b.build(client, store.clone())
}

async fn sync_to_tip(p: &mut Pipeline) -> Vec<SyncProgress> {
    let mut seen = vec![];
    for _ in 0..100 {
        let progress = p.sync_once().await.unwrap();
        seen.push(progress);
        if matches!(progress, SyncProgress::CaughtUp | SyncProgress::Finished) {
            return seen;
        }
    }
    panic!("pipeline never caught up: {seen:?}");
}

/// Index `script` from scratch and return the final store contents.
async fn fresh_run(script: ChainScript, batch: usize) -> StoreSnapshot {
    let chain = ScriptedChain::new(script, batch, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;
    store.snapshot().unwrap()
}

fn kinds(snapshot: &StoreSnapshot, kind: EntityKind) -> Vec<&Entity> {
    snapshot.entities.iter().filter(|e| e.kind() == kind).collect()
}

// ─── Mapping ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn indexes_factory_and_holon_events() {
    let script = holon_chain(0);
    let chain = ScriptedChain::new(script.clone(), 2, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    let progress = sync_to_tip(&mut p).await;
    assert_eq!(progress.last(), Some(&SyncProgress::CaughtUp));
    assert_eq!(p.state(), IndexerState::Live);

    let query = IndexQuery::new(store.clone());
    assert_eq!(query.confirmed_block().await.unwrap(), Some(5));

    let flavors = query.flavors().await.unwrap();
    assert_eq!(flavors.len(), 1);
    assert_eq!(flavors[0].flavor_address, flavor());
    assert_eq!(flavors[0].name, "Stewards");

    let created = query.holons_of_flavor(flavor()).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "Alpha");
    assert_eq!(created[0].address, holon());
    assert_eq!(created[0].creator_address, creator());
    assert_eq!(created[0].block_number, 2);

    let contract = query.holon(holon()).await.unwrap().unwrap();
    assert_eq!(contract.name, "Alpha");
    assert_eq!(contract.creator_address, creator());
    assert_eq!(contract.created_at, script.timestamp(2));
    assert_eq!(contract.created_at_block, 2);

    let rewards = query.reward_distributions(holon()).await.unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].amount, U256::from(1_000u64));
    assert_eq!(rewards[0].total_members, U256::from(3u64));

    let member_rewards = query.member_rewards(holon()).await.unwrap();
    assert_eq!(member_rewards.len(), 1);
    assert_eq!(member_rewards[0].to_address, member());
    assert!(!member_rewards[0].is_contract);

    let sources = query.watched_sources().await.unwrap();
    assert!(sources.contains(&WatchedSource {
        address: holon(),
        template_kind: TemplateKind::ManagedHolon,
        registered_at_block: 2,
    }));
    assert_eq!(p.registry().template_of(&holon()), Some(TemplateKind::ManagedHolon));
    assert_eq!(p.registry().template_of(&factory()), Some(TemplateKind::HolonFactory));

    let stats = p.stats();
    assert_eq!(stats.blocks, 6);
    assert_eq!(stats.events, 4);
    assert_eq!(stats.reorgs, 0);
}

#[tokio::test]
async fn holon_logs_before_registration_are_ignored() {
    let script = ChainScript::default()
        .push(0, vec![])
        .push(0, vec![reward_distributed(tx(0x09), 0)])
        .push(0, vec![new_holon(tx(0x02), 0, Some(flavor()))]);
    let chain = ScriptedChain::new(script, 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    let snapshot = store.snapshot().unwrap();
    assert!(kinds(&snapshot, EntityKind::RewardDistribution).is_empty());
    assert_eq!(kinds(&snapshot, EntityKind::HolonContract).len(), 1);
    assert_eq!(p.stats().unwatched_logs, 1);
}

#[tokio::test]
async fn registration_applies_to_later_logs_in_same_block() {
    let script = ChainScript::default().push(
        0,
        vec![
            reward_distributed(tx(0x05), 1),
            new_holon(tx(0x05), 0, Some(flavor())),
        ],
    );
    let chain = ScriptedChain::new(script, 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    // Logs are processed by index, so the holon is watched by log 1.
    let snapshot = store.snapshot().unwrap();
    assert_eq!(kinds(&snapshot, EntityKind::RewardDistribution).len(), 1);
}

#[tokio::test]
async fn new_holon_without_recipient_is_dropped() {
    let script = ChainScript::default()
        .push(0, vec![new_holon(tx(0x02), 0, None)])
        .push(0, vec![new_flavor(tx(0x03), 0)]);
    let chain = ScriptedChain::new(script, 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    let snapshot = store.snapshot().unwrap();
    assert!(kinds(&snapshot, EntityKind::HolonCreation).is_empty());
    assert!(kinds(&snapshot, EntityKind::HolonContract).is_empty());
    assert_eq!(kinds(&snapshot, EntityKind::FlavorCreation).len(), 1);
    assert_eq!(p.registry().template_of(&holon()), None);
    assert_eq!(p.stats().malformed_events, 1);
}

#[tokio::test]
async fn conflicting_registration_quarantines_the_address() {
    let chain = ScriptedChain::new(self_registering_factory(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    assert_eq!(p.state(), IndexerState::Live);
    assert_eq!(p.stats().conflicting_registrations, 1);
    assert!(p.registry().is_quarantined(&factory()));
    assert_eq!(p.registry().template_of(&factory()), None);

    let snapshot = store.snapshot().unwrap();
    // Neither the conflicting event nor later events from the factory are indexed.
    assert!(kinds(&snapshot, EntityKind::HolonCreation).is_empty());
    assert!(kinds(&snapshot, EntityKind::HolonContract).is_empty());
    assert!(kinds(&snapshot, EntityKind::FlavorCreation).is_empty());
    assert_eq!(
        snapshot.quarantined,
        vec![QuarantinedSource {
            address: factory(),
            quarantined_at_block: 1,
        }]
    );
}

#[tokio::test]
async fn duplicate_key_conflict_halts_run() {
    // The same (tx, log index) reappears in a later block with a different payload.
    let script = ChainScript::default()
        .push(0, vec![])
        .push(0, vec![new_flavor(tx(0x01), 0)])
        .push(0, vec![new_flavor(tx(0x01), 0)])
        .push(0, vec![reward_distributed(tx(0x04), 0)]);
    let chain = ScriptedChain::new(script, 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let (_tx, rx) = watch::channel(false);

    let mut p = pipeline(&builder(), &chain, &store);
    let err = p.run(rx).await.unwrap_err();
    assert!(matches!(err, IndexerError::DuplicateKeyConflict { .. }));
    assert_eq!(p.state(), IndexerState::Error);
    assert_eq!(p.last_processed().map(|(n, _)| n), Some(1));

    let snapshot = store.snapshot().unwrap();
    let flavors = kinds(&snapshot, EntityKind::FlavorCreation);
    assert_eq!(flavors.len(), 1);
    assert_eq!(flavors[0].block_number(), 1);
    assert_eq!(snapshot.block_hashes.len(), 2);
}

#[tokio::test]
async fn output_does_not_depend_on_batch_size() {
    let one = fresh_run(holon_chain(0), 1).await;
    let many = fresh_run(holon_chain(0), 100).await;
    assert_eq!(one, many);
    assert_eq!(one.entities.len(), 5);
}

#[tokio::test]
async fn redelivered_block_is_skipped() {
    let script = holon_chain(0);
    let chain = ScriptedChain::new(script.clone(), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;
    let before = store.snapshot().unwrap();

    let outcome = p.process_block(script.blocks[3].clone()).await.unwrap();
    assert_eq!(outcome, holonindex_core::pipeline::BlockOutcome::Skipped);
    assert_eq!(store.snapshot().unwrap(), before);
}

// ─── Reorgs ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reorg_with_identical_recreation_matches_fresh_run() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    // Blocks 3..=5 are replaced by a sibling fork carrying the same logs.
    let original = holon_chain(0);
    let mut forked = original.clone().keep_through(2);
    for block in &original.blocks[3..] {
        forked = forked.push(1, block.logs.clone());
    }
    chain.replace(forked.clone());

    let progress = sync_to_tip(&mut p).await;
    assert!(progress.contains(&SyncProgress::Reorged { ancestor: 2 }));
    assert_eq!(p.coordinator_state(), CoordinatorState::Following);
    assert_eq!(p.stats().reorgs, 1);
    assert_eq!(p.last_processed(), Some((5, ChainScript::hash(5, 1))));

    assert_eq!(store.snapshot().unwrap(), fresh_run(forked, 10).await);
}

#[tokio::test]
async fn holon_created_inside_reorged_range_is_recreated() {
    // N = 1; the holon is created at N+2 and blocks [N+1, N+3] are replaced.
    let logs = |fork: u8| {
        ChainScript::default()
            .push(0, vec![])
            .push(0, vec![new_flavor(tx(0x01), 0)])
            .push(fork, vec![])
            .push(fork, vec![new_holon(tx(0x02), 0, Some(flavor()))])
            .push(fork, vec![reward_distributed(tx(0x03), 0)])
    };
    let chain = ScriptedChain::new(logs(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    let contract_key = holonindex_core::EntityId::for_address(holon());
    let original = store.snapshot().unwrap();
    let contract = |snapshot: &StoreSnapshot| {
        snapshot
            .entities
            .iter()
            .find(|e| e.kind() == EntityKind::HolonContract && e.id() == contract_key)
            .cloned()
    };
    let watched = |snapshot: &StoreSnapshot| {
        snapshot.sources.iter().find(|s| s.address == holon()).cloned()
    };
    assert!(contract(&original).is_some());
    assert!(watched(&original).is_some());

    chain.replace(logs(1));
    assert_eq!(p.sync_once().await.unwrap(), SyncProgress::Reorged { ancestor: 1 });

    let rolled_back = store.snapshot().unwrap();
    assert!(contract(&rolled_back).is_none());
    assert!(watched(&rolled_back).is_none());
    assert_eq!(p.registry().template_of(&holon()), None);

    sync_to_tip(&mut p).await;
    let replayed = store.snapshot().unwrap();
    assert_eq!(contract(&replayed), contract(&original));
    assert_eq!(watched(&replayed), watched(&original));
    assert_eq!(kinds(&replayed, EntityKind::RewardDistribution).len(), 1);
}

#[tokio::test]
async fn longer_fork_without_holon_rolls_back_registration() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;
    assert_eq!(p.registry().template_of(&holon()), Some(TemplateKind::ManagedHolon));

    // The fork drops the holon creation and is one block longer.
    let forked = holon_chain(0)
        .keep_through(1)
        .empty(1, 1)
        .push(1, vec![reward_distributed(tx(0x03), 0)])
        .empty(1, 3);
    chain.replace(forked.clone());

    let progress = sync_to_tip(&mut p).await;
    assert!(progress.contains(&SyncProgress::Reorged { ancestor: 1 }));
    assert_eq!(p.registry().template_of(&holon()), None);

    let snapshot = store.snapshot().unwrap();
    assert_eq!(kinds(&snapshot, EntityKind::FlavorCreation).len(), 1);
    assert!(kinds(&snapshot, EntityKind::HolonContract).is_empty());
    assert!(kinds(&snapshot, EntityKind::RewardDistribution).is_empty());
    assert!(!snapshot.sources.iter().any(|s| s.address == holon()));
    assert_eq!(snapshot, fresh_run(forked, 10).await);
}

#[tokio::test]
async fn reorg_lifts_quarantine_imposed_in_dropped_block() {
    let chain = ScriptedChain::new(self_registering_factory(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;
    assert!(p.registry().is_quarantined(&factory()));

    // The fork drops the self-registration and keeps the flavor.
    let forked = ChainScript::default()
        .push(0, vec![])
        .push(1, vec![])
        .push(1, vec![new_flavor(tx(0x03), 0)]);
    chain.replace(forked.clone());

    let progress = sync_to_tip(&mut p).await;
    assert!(progress.contains(&SyncProgress::Reorged { ancestor: 0 }));
    assert!(!p.registry().is_quarantined(&factory()));

    let snapshot = store.snapshot().unwrap();
    assert_eq!(kinds(&snapshot, EntityKind::FlavorCreation).len(), 1);
    assert!(snapshot.quarantined.is_empty());
    assert_eq!(snapshot, fresh_run(forked, 10).await);
}

#[tokio::test]
async fn reorg_deeper_than_window_halts() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder().reorg_window(2), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    chain.replace(holon_chain(0).keep_through(1).empty(1, 5));
    let err = loop {
        match p.sync_once().await {
            Ok(SyncProgress::CaughtUp) => panic!("reorg went unnoticed"),
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert!(matches!(err, IndexerError::ReorgDepthExceeded { retained: 2, .. }));
}

// ─── Confirmation watermark ───────────────────────────────────────────────────

#[tokio::test]
async fn confirmation_depth_comes_from_client() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 2);
    let store = Arc::new(InMemoryStorage::new());
    let p = pipeline(&builder().confirmation_depth(12), &chain, &store);
    assert_eq!(p.config().confirmation_depth, 12);
    assert_eq!(p.confirmation_depth(), 2);
}

#[tokio::test]
async fn queries_only_see_confirmed_blocks() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 2);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;

    let query = IndexQuery::new(store.clone());
    assert_eq!(p.watermark(), Some(3));
    assert!(query.holon(holon()).await.unwrap().is_some());
    assert_eq!(query.reward_distributions(holon()).await.unwrap().len(), 1);
    assert!(query.member_rewards(holon()).await.unwrap().is_empty());

    // Unconfirmed data is still stored.
    assert_eq!(store.count(EntityKind::MemberReward).unwrap(), 1);

    chain.replace(holon_chain(0).empty(0, 2));
    sync_to_tip(&mut p).await;
    assert_eq!(query.confirmed_block().await.unwrap(), Some(5));
    assert_eq!(query.member_rewards(holon()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reorg_lowers_watermark() {
    let chain = ScriptedChain::new(holon_chain(0).empty(0, 4), 10, 1);
    let store = Arc::new(InMemoryStorage::new());
    let mut p = pipeline(&builder(), &chain, &store);
    p.resume().await.unwrap();
    sync_to_tip(&mut p).await;
    assert_eq!(p.watermark(), Some(8));

    // Shorter fork: found by re-checking the head hash once caught up.
    chain.replace(holon_chain(0).keep_through(2).empty(1, 4));
    let progress = p.sync_once().await.unwrap();
    assert_eq!(progress, SyncProgress::Reorged { ancestor: 2 });
    assert_eq!(p.watermark(), Some(2));
    assert_eq!(store.snapshot().unwrap().confirmed, Some(2));

    sync_to_tip(&mut p).await;
    assert_eq!(p.watermark(), Some(5));
}

// ─── Checkpoints ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn resumes_from_checkpoint_after_bounded_run() {
    let chain = ScriptedChain::new(holon_chain(0), 2, 0);
    let store = Arc::new(InMemoryStorage::new());

    let (_tx, rx) = watch::channel(false);
    let mut first = pipeline(&builder().to_block(3), &chain, &store);
    first.run(rx).await.unwrap();
    assert_eq!(first.state(), IndexerState::Stopped);
    assert_eq!(first.last_processed().map(|(n, _)| n), Some(3));

    let mut second = pipeline(&builder(), &chain, &store);
    second.resume().await.unwrap();
    assert_eq!(second.cursor().next_block, 4);
    assert_eq!(second.registry().template_of(&holon()), Some(TemplateKind::ManagedHolon));
    sync_to_tip(&mut second).await;
    assert_eq!(second.stats().blocks, 2);

    assert_eq!(store.snapshot().unwrap(), fresh_run(holon_chain(0), 2).await);
}

#[tokio::test]
async fn writes_past_checkpoint_are_replayed_after_crash() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());

    let mut crashed = pipeline(&builder().checkpoint_interval(4), &chain, &store);
    crashed.resume().await.unwrap();
    sync_to_tip(&mut crashed).await;
    // Dropped without a final checkpoint: the saved position is block 3.
    drop(crashed);

    let mut restarted = pipeline(&builder(), &chain, &store);
    restarted.resume().await.unwrap();
    assert_eq!(restarted.cursor().next_block, 4);
    assert_eq!(store.count(EntityKind::MemberReward).unwrap(), 0);

    sync_to_tip(&mut restarted).await;
    assert_eq!(store.snapshot().unwrap(), fresh_run(holon_chain(0), 10).await);
}

#[tokio::test]
async fn quarantine_survives_restart() {
    let script = self_registering_factory(0);
    let chain = ScriptedChain::new(script.clone(), 10, 0);
    let store = Arc::new(InMemoryStorage::new());

    // Stop right after the conflicting registration.
    let (_tx, rx) = watch::channel(false);
    let mut first = pipeline(&builder().to_block(1), &chain, &store);
    first.run(rx).await.unwrap();
    assert!(first.registry().is_quarantined(&factory()));

    let mut second = pipeline(&builder(), &chain, &store);
    second.resume().await.unwrap();
    assert!(second.registry().is_quarantined(&factory()));
    sync_to_tip(&mut second).await;

    let snapshot = store.snapshot().unwrap();
    assert!(kinds(&snapshot, EntityKind::FlavorCreation).is_empty());
    assert_eq!(snapshot, fresh_run(script, 10).await);
}

#[tokio::test]
async fn restart_without_checkpoint_discards_stale_writes() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());

    let mut crashed = pipeline(&builder(), &chain, &store);
    crashed.resume().await.unwrap();
    sync_to_tip(&mut crashed).await;
    // No checkpoint was ever saved.
    drop(crashed);
    assert_eq!(store.count(EntityKind::RewardDistribution).unwrap(), 1);

    // While the indexer was down, blocks 3..=5 were replaced.
    let forked = holon_chain(0).keep_through(2).empty(1, 3);
    chain.replace(forked.clone());

    let mut restarted = pipeline(&builder(), &chain, &store);
    restarted.resume().await.unwrap();
    assert_eq!(restarted.cursor().next_block, 0);
    let wiped = store.snapshot().unwrap();
    assert!(wiped.entities.is_empty());
    assert!(wiped.sources.is_empty());
    assert!(wiped.block_hashes.is_empty());
    assert_eq!(wiped.confirmed, None);
    let query = IndexQuery::new(store.clone());
    assert!(query.reward_distributions(holon()).await.unwrap().is_empty());

    sync_to_tip(&mut restarted).await;
    let snapshot = store.snapshot().unwrap();
    assert!(kinds(&snapshot, EntityKind::RewardDistribution).is_empty());
    assert!(kinds(&snapshot, EntityKind::MemberReward).is_empty());
    assert_eq!(snapshot, fresh_run(forked, 10).await);
}

#[tokio::test]
async fn shutdown_is_honoured_between_blocks_of_a_batch() {
    let scripted = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let (stop, rx) = watch::channel(false);
    let client = Arc::new(StopOnFetch {
        inner: scripted.clone(),
        stop,
        fetches: Mutex::new(0),
    });

    let mut p = builder().build(client.clone(), store.clone());
    p.run(rx).await.unwrap();
    assert_eq!(p.state(), IndexerState::Stopped);
    // A full batch of six blocks was fetched, none was processed.
    assert_eq!(*client.fetches.lock().unwrap(), 1);
    assert_eq!(p.stats().blocks, 0);
    assert!(store.snapshot().unwrap().entities.is_empty());

    let mut resumed = pipeline(&builder(), &scripted, &store);
    resumed.resume().await.unwrap();
    sync_to_tip(&mut resumed).await;
    assert_eq!(store.snapshot().unwrap(), fresh_run(holon_chain(0), 10).await);
}

#[tokio::test]
async fn run_stops_on_shutdown_signal() {
    let chain = ScriptedChain::new(holon_chain(0), 10, 0);
    let store = Arc::new(InMemoryStorage::new());
    let (_tx, rx) = watch::channel(true);

    let mut p = pipeline(&builder(), &chain, &store);
    p.run(rx).await.unwrap();
    assert_eq!(p.state(), IndexerState::Stopped);
    assert_eq!(p.stats().blocks, 0);
    assert!(store.snapshot().unwrap().entities.is_empty());
}
