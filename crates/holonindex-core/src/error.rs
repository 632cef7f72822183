//! Error types for the holonindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// A required field is missing from an event; the event is dropped.
    #[error("Malformed '{event}' event in tx {tx_hash} (log {log_index}): {reason}")]
    MalformedEvent {
        event: String,
        tx_hash: String,
        log_index: u32,
        reason: String,
    },

    /// The same address was claimed under two different template kinds.
    #[error("Address {address} already registered as {existing}, cannot register as {requested}")]
    ConflictingRegistration {
        address: String,
        existing: String,
        requested: String,
    },

    /// A write-once key was written twice with different payloads.
    #[error("Conflicting write for {kind} {id}: existing payload differs from new payload")]
    DuplicateKeyConflict { kind: String, id: String },

    #[error("Reorg at block {block_number} is deeper than the retained window of {retained} blocks")]
    ReorgDepthExceeded { block_number: u64, retained: usize },

    #[error("Reorg detected at block {block_number}: expected hash {expected}, got {actual}")]
    ReorgDetected {
        block_number: u64,
        expected: String,
        actual: String,
    },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error is a reorg (recoverable).
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDetected { .. })
    }

    /// Returns `true` if the operation may succeed when retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_) | Self::Decode(_))
    }

    /// Returns `true` if the error must halt the pipeline.
    ///
    /// Malformed events and conflicting registrations only affect a single
    /// event or source; everything else stops the chain.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::MalformedEvent { .. } | Self::ConflictingRegistration { .. } | Self::ReorgDetected { .. }
        )
    }
}
