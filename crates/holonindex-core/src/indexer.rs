//! Indexer configuration and state types.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Configuration for one chain's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used for checkpoint keys).
    pub id: String,
    /// Chain to index (e.g. `"ethereum"`).
    pub chain: String,
    /// First block to index.
    pub from_block: u64,
    /// Optional end block (bounded backfill). `None` = follow the chain forever.
    pub to_block: Option<u64>,
    /// Blocks behind the head before entities become queryable. The pipeline
    /// reads the value from `ChainClient::confirmation_depth`; this field
    /// configures the client and must agree with it.
    pub confirmation_depth: u64,
    /// Number of processed block hashes retained for ancestor search.
    pub reorg_window: usize,
    /// Save a checkpoint every N blocks.
    pub checkpoint_interval: u64,
    /// Head polling interval once caught up (milliseconds).
    pub poll_interval_ms: u64,
    /// Statically configured holon factories.
    pub factory_addresses: Vec<Address>,
    pub retry: RetryConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "holons".into(),
            chain: "ethereum".into(),
            from_block: 0,
            to_block: None,
            confirmation_depth: 12,
            reorg_window: 128,
            checkpoint_interval: 100,
            poll_interval_ms: 2000,
            factory_addresses: vec![],
            retry: RetryConfig::default(),
        }
    }
}

/// Runtime state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Syncing historical blocks up to the current head.
    Backfilling,
    /// Following the chain tip.
    Live,
    /// Rolling back and replaying after a reorg.
    ReorgRecovery,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}
