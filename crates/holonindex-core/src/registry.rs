//! Source registry: which addresses are watched, and under which template.
//!
//! The registry is owned by a single chain's pipeline and mutated only between
//! events, so a registration is visible to every later log of the same block.

use std::collections::HashMap;

use alloy_primitives::Address;
use futures::Stream;
use tokio::sync::broadcast;

use crate::entity::{QuarantinedSource, TemplateKind, WatchedSource};
use crate::error::IndexerError;

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The address is now watched.
    Added(WatchedSource),
    /// The address was already watched under the same template.
    AlreadyWatched,
}

/// The set of watched sources for one chain.
pub struct SourceRegistry {
    sources: HashMap<Address, WatchedSource>,
    /// Quarantined address → block of the conflicting registration.
    quarantined: HashMap<Address, u64>,
    notify: broadcast::Sender<WatchedSource>,
}

impl SourceRegistry {
    pub fn new(channel_capacity: usize) -> Self {
        let (notify, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sources: HashMap::new(),
            quarantined: HashMap::new(),
            notify,
        }
    }

    /// Seed statically configured factories. They are registered at block 0
    /// and therefore survive every rollback.
    pub fn seed_factories(&mut self, factories: &[Address]) -> Result<(), IndexerError> {
        for addr in factories {
            self.register(*addr, TemplateKind::HolonFactory, 0)?;
        }
        Ok(())
    }

    /// Forget every source and quarantine entry. Subscribers stay attached.
    pub fn clear(&mut self) {
        self.sources.clear();
        self.quarantined.clear();
    }

    /// Restore previously persisted sources without notifying subscribers.
    pub fn restore(&mut self, sources: Vec<WatchedSource>) -> Result<(), IndexerError> {
        for source in sources {
            self.check(source.address, source.template_kind)?;
            self.sources.insert(source.address, source);
        }
        Ok(())
    }

    /// Restore previously persisted quarantines.
    pub fn restore_quarantined(&mut self, quarantined: Vec<QuarantinedSource>) {
        for q in quarantined {
            self.quarantined
                .entry(q.address)
                .or_insert(q.quarantined_at_block);
        }
    }

    /// Validate a registration without applying it.
    ///
    /// Returns `true` if the address is new, `false` if it is already watched
    /// under `kind`.
    pub fn check(&self, address: Address, kind: TemplateKind) -> Result<bool, IndexerError> {
        match self.sources.get(&address) {
            None => Ok(true),
            Some(existing) if existing.template_kind == kind => Ok(false),
            Some(existing) => Err(IndexerError::ConflictingRegistration {
                address: format!("{address:#x}"),
                existing: existing.template_kind.to_string(),
                requested: kind.to_string(),
            }),
        }
    }

    /// Watch `address` under `kind` from `at_block` on.
    pub fn register(
        &mut self,
        address: Address,
        kind: TemplateKind,
        at_block: u64,
    ) -> Result<Registration, IndexerError> {
        if !self.check(address, kind)? {
            return Ok(Registration::AlreadyWatched);
        }
        let source = WatchedSource {
            address,
            template_kind: kind,
            registered_at_block: at_block,
        };
        self.sources.insert(address, source.clone());
        tracing::info!(address = %address, kind = %kind, block = at_block, "source registered");
        // No subscribers is fine.
        let _ = self.notify.send(source.clone());
        Ok(Registration::Added(source))
    }

    /// The template whose schema applies to logs from `address`.
    ///
    /// Quarantined addresses are reported as unwatched.
    pub fn template_of(&self, address: &Address) -> Option<TemplateKind> {
        if self.quarantined.contains_key(address) {
            return None;
        }
        self.sources.get(address).map(|s| s.template_kind)
    }

    /// Stop processing events from `address` after a conflicting registration
    /// seen at `at_block`. Returns `false` if it was already quarantined.
    pub fn quarantine(&mut self, address: Address, at_block: u64) -> bool {
        if self.quarantined.contains_key(&address) {
            return false;
        }
        self.quarantined.insert(address, at_block);
        tracing::error!(
            address = %address,
            block = at_block,
            "source quarantined; its events will be dropped"
        );
        true
    }

    pub fn is_quarantined(&self, address: &Address) -> bool {
        self.quarantined.contains_key(address)
    }

    /// Quarantined addresses, ordered by block then address.
    pub fn quarantined(&self) -> Vec<QuarantinedSource> {
        let mut all: Vec<_> = self
            .quarantined
            .iter()
            .map(|(address, block)| QuarantinedSource {
                address: *address,
                quarantined_at_block: *block,
            })
            .collect();
        all.sort_by_key(|q| (q.quarantined_at_block, q.address));
        all
    }

    /// Remove every registration made after `block_number` and lift every
    /// quarantine imposed after it.
    pub fn revert_after(&mut self, block_number: u64) -> Vec<WatchedSource> {
        self.quarantined.retain(|address, at| {
            let keep = *at <= block_number;
            if !keep {
                tracing::info!(address = %address, block = *at, "quarantine lifted by rollback");
            }
            keep
        });
        let mut removed: Vec<WatchedSource> = self
            .sources
            .values()
            .filter(|s| s.registered_at_block > block_number)
            .cloned()
            .collect();
        for source in &removed {
            self.sources.remove(&source.address);
        }
        removed.sort_by_key(|s| (s.registered_at_block, s.address));
        removed
    }

    /// All watched sources, ordered by registration block then address.
    pub fn sources(&self) -> Vec<WatchedSource> {
        let mut all: Vec<_> = self.sources.values().cloned().collect();
        all.sort_by_key(|s| (s.registered_at_block, s.address));
        all
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Raw receiver for registration notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchedSource> {
        self.notify.subscribe()
    }

    /// Registration notifications as a stream. Lagging subscribers skip ahead.
    pub fn registrations(&self) -> impl Stream<Item = WatchedSource> + Send + 'static {
        let rx = self.notify.subscribe();
        futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(source) => return Some((source, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "registration subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(1_024)
    }
}
