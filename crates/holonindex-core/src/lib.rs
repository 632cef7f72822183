//! holonindex-core: event-to-entity mapping for holon factories and the
//! holons they create, with reorg-safe rollback and replay.
//!
//! # Architecture
//!
//! ```text
//! Pipeline (one per chain)
//!     ├── ChainClient        (ordered blocks + logs, canonical hashes)
//!     ├── SourceRegistry     (watched addresses → template kind)
//!     ├── EventDecoder       (raw log + template → EventRecord)
//!     ├── HandlerDispatcher  ((template, event) → EntityMapper)
//!     ├── EntityStore        (atomic per-event commits, rollback)
//!     ├── ReorgCoordinator   (Following / Reconciling / Replaying, watermark)
//!     └── CheckpointManager  (crash recovery)
//!
//! IndexQuery → confirmed entities only
//! ```

pub mod checkpoint;
pub mod client;
pub mod cursor;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod event;
pub mod indexer;
pub mod mapper;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod reorg;
pub mod retry;
pub mod store;
pub mod tracker;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
pub use client::{ChainClient, EventDecoder};
pub use cursor::Cursor;
pub use dispatcher::HandlerDispatcher;
pub use entity::{
    Entity, EntityId, EntityKind, FlavorCreationRecord, HolonContract, HolonCreationRecord,
    MemberRewardRecord, QuarantinedSource, RewardDistributionRecord, TemplateKind, WatchedSource,
};
pub use error::IndexerError;
pub use event::{EventKind, EventRecord, ParamValue};
pub use indexer::{IndexerConfig, IndexerState};
pub use mapper::{EntityMapper, MappingOutput};
pub use pipeline::{Pipeline, PipelineStats, SyncProgress};
pub use query::IndexQuery;
pub use registry::SourceRegistry;
pub use reorg::{CoordinatorState, ReorgCoordinator, ReorgOutcome};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{EntityReader, EntityStore, WriteBatch};
pub use tracker::BlockTracker;
pub use types::{BlockSummary, ChainBlock, RawLog};
