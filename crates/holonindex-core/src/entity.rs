//! Persisted entity types and their identity keys.
//!
//! Every per-event record is keyed by `transaction_hash ‖ log_index`
//! (32 hash bytes followed by the big-endian `u32` log index), which is
//! globally unique and sorts in chain order within a transaction.
//! `HolonContract` is the only aggregate and is keyed by contract address.

use alloy_primitives::{hex, Address, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ─── EntityId ─────────────────────────────────────────────────────────────────

/// Binary entity key. Serialized as a `0x`-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(Vec<u8>);

impl EntityId {
    /// Identity key of a per-event entity.
    pub fn for_event(tx_hash: B256, log_index: u32) -> Self {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(tx_hash.as_slice());
        key.extend_from_slice(&log_index.to_be_bytes());
        Self(key)
    }

    /// Key of an address-keyed aggregate.
    pub fn for_address(address: Address) -> Self {
        Self(address.to_vec())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_prefixed(&self.0)
    }

    /// Parse a `0x`-prefixed (or bare) hex key.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(Self)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ─── Kinds ────────────────────────────────────────────────────────────────────

/// The five persisted entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    FlavorCreation,
    HolonCreation,
    HolonContract,
    RewardDistribution,
    MemberReward,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::FlavorCreation,
        EntityKind::HolonCreation,
        EntityKind::HolonContract,
        EntityKind::RewardDistribution,
        EntityKind::MemberReward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlavorCreation => "FlavorCreation",
            Self::HolonCreation => "HolonCreation",
            Self::HolonContract => "HolonContract",
            Self::RewardDistribution => "RewardDistribution",
            Self::MemberReward => "MemberReward",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
    }

    /// `true` for per-event records, `false` for the create-if-absent aggregate.
    pub fn is_write_once(&self) -> bool {
        !matches!(self, Self::HolonContract)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which event schema applies to a watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TemplateKind {
    /// The statically configured factory emitting `NewFlavor` / `NewHolon`.
    HolonFactory,
    /// A holon contract discovered through `NewHolon`.
    ManagedHolon,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HolonFactory => "HolonFactory",
            Self::ManagedHolon => "ManagedHolon",
        }
    }

    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "HolonFactory" => Some(Self::HolonFactory),
            "ManagedHolon" => Some(Self::ManagedHolon),
            _ => None,
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlavorCreationRecord {
    pub id: EntityId,
    pub flavor_address: Address,
    pub name: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolonCreationRecord {
    pub id: EntityId,
    pub name: String,
    /// Address of the created holon contract.
    pub address: Address,
    /// The factory/flavor the creating transaction was sent to.
    pub flavor_address: Address,
    pub creator_address: Address,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
}

/// The long-lived holon aggregate, created once per contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolonContract {
    pub address: Address,
    pub name: String,
    pub creator_address: Address,
    /// Block timestamp of the creating event.
    pub created_at: u64,
    /// Block number of the creating event; used for reorg rollback.
    pub created_at_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardDistributionRecord {
    pub id: EntityId,
    pub holon_address: Address,
    pub contract_address: Address,
    pub amount: U256,
    pub total_members: U256,
    pub reward_type: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRewardRecord {
    pub id: EntityId,
    pub holon_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    pub amount: U256,
    pub is_contract: bool,
    pub reward_type: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: B256,
}

/// A watched contract address and the schema its logs are decoded with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedSource {
    pub address: Address,
    pub template_kind: TemplateKind,
    pub registered_at_block: u64,
}

/// An address whose events are dropped after a conflicting registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedSource {
    pub address: Address,
    /// Block of the event that tried to re-register the address.
    pub quarantined_at_block: u64,
}

// ─── Entity ───────────────────────────────────────────────────────────────────

/// Any persisted entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Entity {
    FlavorCreation(FlavorCreationRecord),
    HolonCreation(HolonCreationRecord),
    HolonContract(HolonContract),
    RewardDistribution(RewardDistributionRecord),
    MemberReward(MemberRewardRecord),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::FlavorCreation(_) => EntityKind::FlavorCreation,
            Self::HolonCreation(_) => EntityKind::HolonCreation,
            Self::HolonContract(_) => EntityKind::HolonContract,
            Self::RewardDistribution(_) => EntityKind::RewardDistribution,
            Self::MemberReward(_) => EntityKind::MemberReward,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Self::FlavorCreation(r) => r.id.clone(),
            Self::HolonCreation(r) => r.id.clone(),
            Self::HolonContract(c) => EntityId::for_address(c.address),
            Self::RewardDistribution(r) => r.id.clone(),
            Self::MemberReward(r) => r.id.clone(),
        }
    }

    /// The block whose rollback removes this entity.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::FlavorCreation(r) => r.block_number,
            Self::HolonCreation(r) => r.block_number,
            Self::HolonContract(c) => c.created_at_block,
            Self::RewardDistribution(r) => r.block_number,
            Self::MemberReward(r) => r.block_number,
        }
    }

    /// The holon this entity belongs to, if any.
    pub fn holon_address(&self) -> Option<Address> {
        match self {
            Self::FlavorCreation(_) => None,
            Self::HolonCreation(r) => Some(r.address),
            Self::HolonContract(c) => Some(c.address),
            Self::RewardDistribution(r) => Some(r.holon_address),
            Self::MemberReward(r) => Some(r.holon_address),
        }
    }

    /// The flavor this entity belongs to, if any.
    pub fn flavor_address(&self) -> Option<Address> {
        match self {
            Self::FlavorCreation(r) => Some(r.flavor_address),
            Self::HolonCreation(r) => Some(r.flavor_address),
            _ => None,
        }
    }
}
