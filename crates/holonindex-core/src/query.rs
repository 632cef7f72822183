//! Read-only query surface.
//!
//! Every lookup is filtered by the confirmed watermark: entities from blocks
//! above it may still be rolled back and are never returned.

use std::sync::Arc;

use alloy_primitives::Address;

use crate::entity::{
    Entity, EntityId, EntityKind, FlavorCreationRecord, HolonContract, HolonCreationRecord,
    MemberRewardRecord, RewardDistributionRecord, WatchedSource,
};
use crate::error::IndexerError;
use crate::store::EntityStore;

#[derive(Clone)]
pub struct IndexQuery {
    store: Arc<dyn EntityStore>,
}

impl IndexQuery {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// The highest confirmed block, or `None` if nothing is confirmed yet.
    pub async fn confirmed_block(&self) -> Result<Option<u64>, IndexerError> {
        self.store.confirmed_block().await
    }

    pub async fn get(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Entity>, IndexerError> {
        let Some(confirmed) = self.confirmed_block().await? else {
            return Ok(None);
        };
        Ok(self
            .store
            .get(kind, id)
            .await?
            .filter(|e| e.block_number() <= confirmed))
    }

    /// Entities of `kind` in `[from, to]`, clamped to the watermark.
    pub async fn range(&self, kind: EntityKind, from: u64, to: u64) -> Result<Vec<Entity>, IndexerError> {
        let Some(confirmed) = self.confirmed_block().await? else {
            return Ok(vec![]);
        };
        let to = to.min(confirmed);
        if from > to {
            return Ok(vec![]);
        }
        self.store.entities_in_range(kind, from, to).await
    }

    async fn all(&self, kind: EntityKind) -> Result<Vec<Entity>, IndexerError> {
        self.range(kind, 0, u64::MAX).await
    }

    pub async fn holon(&self, address: Address) -> Result<Option<HolonContract>, IndexerError> {
        match self.get(EntityKind::HolonContract, &EntityId::for_address(address)).await? {
            Some(Entity::HolonContract(c)) => Ok(Some(c)),
            _ => Ok(None),
        }
    }

    pub async fn holons(&self) -> Result<Vec<HolonContract>, IndexerError> {
        Ok(self
            .all(EntityKind::HolonContract)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                Entity::HolonContract(c) => Some(c),
                _ => None,
            })
            .collect())
    }

    pub async fn flavors(&self) -> Result<Vec<FlavorCreationRecord>, IndexerError> {
        Ok(self
            .all(EntityKind::FlavorCreation)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                Entity::FlavorCreation(r) => Some(r),
                _ => None,
            })
            .collect())
    }

    /// Holons created through `flavor`.
    pub async fn holons_of_flavor(&self, flavor: Address) -> Result<Vec<HolonCreationRecord>, IndexerError> {
        Ok(self
            .all(EntityKind::HolonCreation)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                Entity::HolonCreation(r) if r.flavor_address == flavor => Some(r),
                _ => None,
            })
            .collect())
    }

    pub async fn reward_distributions(&self, holon: Address) -> Result<Vec<RewardDistributionRecord>, IndexerError> {
        Ok(self
            .all(EntityKind::RewardDistribution)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                Entity::RewardDistribution(r) if r.holon_address == holon => Some(r),
                _ => None,
            })
            .collect())
    }

    pub async fn member_rewards(&self, holon: Address) -> Result<Vec<MemberRewardRecord>, IndexerError> {
        Ok(self
            .all(EntityKind::MemberReward)
            .await?
            .into_iter()
            .filter_map(|e| match e {
                Entity::MemberReward(r) if r.holon_address == holon => Some(r),
                _ => None,
            })
            .collect())
    }

    /// Entities of `kind` in `[from, to]` that belong to `holon`.
    pub async fn by_holon(
        &self,
        kind: EntityKind,
        holon: Address,
        from: u64,
        to: u64,
    ) -> Result<Vec<Entity>, IndexerError> {
        Ok(self
            .range(kind, from, to)
            .await?
            .into_iter()
            .filter(|e| e.holon_address() == Some(holon))
            .collect())
    }

    /// Watched sources registered at or below the watermark.
    pub async fn watched_sources(&self) -> Result<Vec<WatchedSource>, IndexerError> {
        let Some(confirmed) = self.confirmed_block().await? else {
            return Ok(vec![]);
        };
        Ok(self
            .store
            .watched_sources()
            .await?
            .into_iter()
            .filter(|s| s.registered_at_block <= confirmed)
            .collect())
    }
}
