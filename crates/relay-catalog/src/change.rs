//! Admin -> core invalidation signals (spec §6 "Admin -> core signals").
//! A local publish/subscribe bus, not HTTP — the admin surface (external,
//! out of scope per spec §1) calls [`CatalogStore`](crate::store::CatalogStore)
//! mutation methods, which publish one of these onto the bus every
//! subscriber (chiefly the Model Resolver's cache) listens on.

use relay_common::{GlobalModelId, ProviderId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    GlobalModelChanged { name: String },
    ModelMappingChanged {
        source_model: String,
        provider_id: Option<ProviderId>,
    },
    ModelChanged {
        provider_id: ProviderId,
        global_model_id: GlobalModelId,
    },
}

/// Thin wrapper around a `tokio::sync::broadcast` channel, matching the
/// teacher's `EventHub` pattern (SPEC_FULL §C, Model Resolver).
#[derive(Debug, Clone)]
pub struct CatalogChangeBus {
    sender: tokio::sync::broadcast::Sender<CatalogChange>,
}

impl CatalogChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CatalogChange> {
        self.sender.subscribe()
    }

    /// Publishing is fire-and-forget: with no subscribers the send fails
    /// harmlessly (nothing needs to react yet).
    pub fn publish(&self, change: CatalogChange) {
        let _ = self.sender.send(change);
    }
}

impl Default for CatalogChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}
