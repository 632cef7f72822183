//! Entity mappers, one per event kind.
//!
//! A mapper turns a decoded event plus a read-only view of the store into the
//! writes that event implies. Mappers never write themselves; the pipeline
//! commits their [`MappingOutput`] as one transaction.

use async_trait::async_trait;

use crate::entity::{
    Entity, EntityId, EntityKind, FlavorCreationRecord, HolonContract, HolonCreationRecord,
    MemberRewardRecord, RewardDistributionRecord, TemplateKind, WatchedSource,
};
use crate::error::IndexerError;
use crate::event::{EventKind, EventRecord};
use crate::store::{EntityReader, WriteBatch};

/// The writes and registrations produced by one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingOutput {
    pub entities: Vec<Entity>,
    pub registrations: Vec<WatchedSource>,
}

impl MappingOutput {
    pub fn into_batch(self) -> WriteBatch {
        WriteBatch {
            entities: self.entities,
            sources: self.registrations,
        }
    }
}

/// Maps one event kind to entities.
#[async_trait]
pub trait EntityMapper: Send + Sync {
    /// The event kind this mapper handles.
    fn event_kind(&self) -> EventKind;

    async fn map(
        &self,
        event: &EventRecord,
        store: &dyn EntityReader,
    ) -> Result<MappingOutput, IndexerError>;
}

// ─── Factory events ───────────────────────────────────────────────────────────

/// `NewFlavor(address flavor, string name)` → `FlavorCreationRecord`.
pub struct NewFlavorMapper;

#[async_trait]
impl EntityMapper for NewFlavorMapper {
    fn event_kind(&self) -> EventKind {
        EventKind::NewFlavor
    }

    async fn map(
        &self,
        event: &EventRecord,
        _store: &dyn EntityReader,
    ) -> Result<MappingOutput, IndexerError> {
        map_new_flavor(event)
    }
}

pub fn map_new_flavor(event: &EventRecord) -> Result<MappingOutput, IndexerError> {
    let id = EntityId::for_event(event.transaction_hash, event.log_index);
    let record = FlavorCreationRecord {
        id,
        flavor_address: event.address_param("flavor")?,
        name: event.str_param("name")?,
        block_number: event.block_number,
        block_timestamp: event.block_timestamp,
        transaction_hash: event.transaction_hash,
    };
    Ok(MappingOutput {
        entities: vec![Entity::FlavorCreation(record)],
        registrations: vec![],
    })
}

/// `NewHolon(string name, address addr)` → `HolonCreationRecord`, a
/// create-if-absent `HolonContract`, and a managed-holon registration.
pub struct NewHolonMapper;

#[async_trait]
impl EntityMapper for NewHolonMapper {
    fn event_kind(&self) -> EventKind {
        EventKind::NewHolon
    }

    async fn map(
        &self,
        event: &EventRecord,
        store: &dyn EntityReader,
    ) -> Result<MappingOutput, IndexerError> {
        let id = EntityId::for_event(event.transaction_hash, event.log_index);
        let flavor_address = event
            .transaction_to
            .ok_or_else(|| event.malformed("transaction has no 'to' address"))?;
        let creator_address = event
            .transaction_from
            .ok_or_else(|| event.malformed("transaction has no 'from' address"))?;
        let name = event.str_param("name")?;
        let address = event.address_param("addr")?;

        let mut entities = vec![Entity::HolonCreation(HolonCreationRecord {
            id,
            name: name.clone(),
            address,
            flavor_address,
            creator_address,
            block_number: event.block_number,
            block_timestamp: event.block_timestamp,
            transaction_hash: event.transaction_hash,
        })];

        let existing = store
            .get(EntityKind::HolonContract, &EntityId::for_address(address))
            .await?;
        if existing.is_some() {
            tracing::debug!(holon = %address, "holon contract already exists; keeping first observation");
        } else {
            entities.push(Entity::HolonContract(HolonContract {
                address,
                name,
                creator_address,
                created_at: event.block_timestamp,
                created_at_block: event.block_number,
            }));
        }

        Ok(MappingOutput {
            entities,
            registrations: vec![WatchedSource {
                address,
                template_kind: TemplateKind::ManagedHolon,
                registered_at_block: event.block_number,
            }],
        })
    }
}

// ─── Managed-holon events ─────────────────────────────────────────────────────

/// `RewardDistributed(address contractAddress, uint256 amount, uint256 totalMembers, string rewardType)`.
pub struct RewardDistributedMapper;

#[async_trait]
impl EntityMapper for RewardDistributedMapper {
    fn event_kind(&self) -> EventKind {
        EventKind::RewardDistributed
    }

    async fn map(
        &self,
        event: &EventRecord,
        _store: &dyn EntityReader,
    ) -> Result<MappingOutput, IndexerError> {
        map_reward_distributed(event)
    }
}

pub fn map_reward_distributed(event: &EventRecord) -> Result<MappingOutput, IndexerError> {
    let record = RewardDistributionRecord {
        id: EntityId::for_event(event.transaction_hash, event.log_index),
        holon_address: event.source_address,
        contract_address: event.address_param("contractAddress")?,
        amount: event.uint_param("amount")?,
        total_members: event.uint_param("totalMembers")?,
        reward_type: event.str_param("rewardType")?,
        block_number: event.block_number,
        block_timestamp: event.block_timestamp,
        transaction_hash: event.transaction_hash,
    };
    tracing::info!(
        holon = %record.holon_address,
        amount = %record.amount,
        members = %record.total_members,
        reward_type = %record.reward_type,
        block = record.block_number,
        "reward distributed"
    );
    Ok(MappingOutput {
        entities: vec![Entity::RewardDistribution(record)],
        registrations: vec![],
    })
}

/// `MemberRewarded(address from, address to, uint256 amount, bool isContract, string rewardType)`.
pub struct MemberRewardedMapper;

#[async_trait]
impl EntityMapper for MemberRewardedMapper {
    fn event_kind(&self) -> EventKind {
        EventKind::MemberRewarded
    }

    async fn map(
        &self,
        event: &EventRecord,
        _store: &dyn EntityReader,
    ) -> Result<MappingOutput, IndexerError> {
        map_member_rewarded(event)
    }
}

pub fn map_member_rewarded(event: &EventRecord) -> Result<MappingOutput, IndexerError> {
    let record = MemberRewardRecord {
        id: EntityId::for_event(event.transaction_hash, event.log_index),
        holon_address: event.source_address,
        from_address: event.address_param("from")?,
        to_address: event.address_param("to")?,
        amount: event.uint_param("amount")?,
        is_contract: event.bool_param("isContract")?,
        reward_type: event.str_param("rewardType")?,
        block_number: event.block_number,
        block_timestamp: event.block_timestamp,
        transaction_hash: event.transaction_hash,
    };
    tracing::info!(
        holon = %record.holon_address,
        to = %record.to_address,
        amount = %record.amount,
        block = record.block_number,
        "member rewarded"
    );
    Ok(MappingOutput {
        entities: vec![Entity::MemberReward(record)],
        registrations: vec![],
    })
}
