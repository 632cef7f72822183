//! Decoded event records: the decoder's output and the mappers' input.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// The event kinds the mappers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    NewFlavor,
    NewHolon,
    RewardDistributed,
    MemberRewarded,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::NewFlavor,
        EventKind::NewHolon,
        EventKind::RewardDistributed,
        EventKind::MemberRewarded,
    ];

    /// The event name as it appears in the contract ABI.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewFlavor => "NewFlavor",
            Self::NewHolon => "NewHolon",
            Self::RewardDistributed => "RewardDistributed",
            Self::MemberRewarded => "MemberRewarded",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded event parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    Address(Address),
    Uint(U256),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

/// A typed event produced by the decoder. Consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// ABI event name (e.g. `"NewHolon"`).
    pub name: String,
    /// Address that emitted the log.
    pub source_address: Address,
    /// Decoded parameters keyed by ABI name.
    pub params: BTreeMap<String, ParamValue>,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
    pub log_index: u32,
    /// Sender of the originating transaction.
    pub transaction_from: Option<Address>,
    /// Recipient of the originating transaction.
    pub transaction_to: Option<Address>,
}

impl EventRecord {
    /// The event kind, if the name is one the mappers know.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.name)
    }

    /// Build a `MalformedEvent` error for this record.
    pub fn malformed(&self, reason: impl Into<String>) -> IndexerError {
        IndexerError::MalformedEvent {
            event: self.name.clone(),
            tx_hash: format!("{:#x}", self.transaction_hash),
            log_index: self.log_index,
            reason: reason.into(),
        }
    }

    fn param(&self, name: &str) -> Result<&ParamValue, IndexerError> {
        self.params
            .get(name)
            .ok_or_else(|| self.malformed(format!("missing param '{name}'")))
    }

    pub fn address_param(&self, name: &str) -> Result<Address, IndexerError> {
        match self.param(name)? {
            ParamValue::Address(a) => Ok(*a),
            other => Err(self.malformed(format!("param '{name}' is not an address: {other:?}"))),
        }
    }

    pub fn uint_param(&self, name: &str) -> Result<U256, IndexerError> {
        match self.param(name)? {
            ParamValue::Uint(u) => Ok(*u),
            other => Err(self.malformed(format!("param '{name}' is not a uint: {other:?}"))),
        }
    }

    pub fn bool_param(&self, name: &str) -> Result<bool, IndexerError> {
        match self.param(name)? {
            ParamValue::Bool(b) => Ok(*b),
            other => Err(self.malformed(format!("param '{name}' is not a bool: {other:?}"))),
        }
    }

    pub fn str_param(&self, name: &str) -> Result<String, IndexerError> {
        match self.param(name)? {
            ParamValue::Str(s) => Ok(s.clone()),
            other => Err(self.malformed(format!("param '{name}' is not a string: {other:?}"))),
        }
    }
}
