//! Handler dispatcher: routes decoded events to entity mappers.
//!
//! Routing is a static table keyed by `(TemplateKind, EventKind)`. An event
//! with no entry is dropped without side effects.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::TemplateKind;
use crate::error::IndexerError;
use crate::event::{EventKind, EventRecord};
use crate::mapper::{
    EntityMapper, MappingOutput, MemberRewardedMapper, NewFlavorMapper, NewHolonMapper,
    RewardDistributedMapper,
};
use crate::store::EntityReader;

pub struct HandlerDispatcher {
    mappers: HashMap<(TemplateKind, EventKind), Arc<dyn EntityMapper>>,
}

impl HandlerDispatcher {
    pub fn new() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    /// The routing table for holon factories and managed holons.
    pub fn with_holon_mappers() -> Self {
        let mut d = Self::new();
        d.on_event(TemplateKind::HolonFactory, Arc::new(NewFlavorMapper));
        d.on_event(TemplateKind::HolonFactory, Arc::new(NewHolonMapper));
        d.on_event(TemplateKind::ManagedHolon, Arc::new(RewardDistributedMapper));
        d.on_event(TemplateKind::ManagedHolon, Arc::new(MemberRewardedMapper));
        d
    }

    /// Register `mapper` for its event kind under `template`. Replaces any
    /// previous mapper for the same pair.
    pub fn on_event(&mut self, template: TemplateKind, mapper: Arc<dyn EntityMapper>) {
        self.mappers.insert((template, mapper.event_kind()), mapper);
    }

    pub fn handles(&self, template: TemplateKind, kind: EventKind) -> bool {
        self.mappers.contains_key(&(template, kind))
    }

    /// Map one event. `Ok(None)` means no mapper is registered for the pair.
    pub async fn dispatch(
        &self,
        event: &EventRecord,
        template: TemplateKind,
        store: &dyn EntityReader,
    ) -> Result<Option<MappingOutput>, IndexerError> {
        let Some(kind) = event.kind() else {
            tracing::debug!(event = %event.name, "no mapper for unknown event");
            return Ok(None);
        };
        let Some(mapper) = self.mappers.get(&(template, kind)) else {
            tracing::debug!(
                event = %kind,
                template = %template,
                source = %event.source_address,
                "event not routed for template"
            );
            return Ok(None);
        };
        mapper.map(event, store).await.map(Some)
    }
}

impl Default for HandlerDispatcher {
    fn default() -> Self {
        Self::with_holon_mappers()
    }
}
