//! The admin-facing, in-memory reference catalog store. Persistence (SQL vs
//! KV) is an external storage-layer choice (spec §1); this is the in-memory
//! stand-in the core's own tests and the demo binary use, fronted by an
//! `ArcSwap<CatalogSnapshot>` so readers (Candidate Resolver, Model
//! Resolver) never block on admin writers and always see a consistent,
//! whole-catalog view (mirrors the teacher's `state::AppState` use of
//! `arc-swap` for hot-reloadable config/catalog state).

use std::sync::Arc;

use arc_swap::ArcSwap;
use relay_common::{CredentialId, EndpointId, GlobalModelId, ProviderId};

use relay_common::CallerId;

use crate::change::{CatalogChange, CatalogChangeBus};
use crate::entities::{CallerScope, Credential, Endpoint, GlobalModel, MappingKind, Model, ModelMapping, Provider};
use crate::snapshot::CatalogSnapshot;

pub struct CatalogStore {
    current: ArcSwap<CatalogSnapshot>,
    changes: CatalogChangeBus,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CatalogSnapshot::default()),
            changes: CatalogChangeBus::default(),
        }
    }

    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    pub fn subscribe_changes(&self) -> tokio::sync::broadcast::Receiver<CatalogChange> {
        self.changes.subscribe()
    }

    fn mutate(&self, f: impl FnOnce(&mut CatalogSnapshot)) {
        let mut next = (**self.current.load()).clone();
        f(&mut next);
        self.current.store(Arc::new(next));
    }

    pub fn upsert_provider(&self, provider: Provider) {
        self.mutate(|s| {
            s.providers.insert(provider.id, provider);
        });
    }

    pub fn upsert_endpoint(&self, endpoint: Endpoint) {
        self.mutate(|s| {
            s.endpoints.insert(endpoint.id, endpoint);
        });
    }

    pub fn upsert_credential(&self, credential: Credential) {
        self.mutate(|s| {
            s.credentials.insert(credential.id, credential);
        });
    }

    pub fn upsert_global_model(&self, model: GlobalModel) {
        let name = model.canonical_name.clone();
        self.mutate(|s| {
            s.global_models.insert(model.id, model);
        });
        self.changes
            .publish(CatalogChange::GlobalModelChanged { name });
    }

    pub fn upsert_model_mapping(&self, mapping: ModelMapping) {
        let source_model = mapping.source_name.clone();
        let provider_id = mapping.provider_scope;
        self.mutate(|s| {
            s.model_mappings.retain(|m| m.id != mapping.id);
            s.model_mappings.push(mapping);
        });
        self.changes.publish(CatalogChange::ModelMappingChanged {
            source_model,
            provider_id,
        });
    }

    pub fn upsert_model(&self, model: Model) {
        let provider_id = model.provider_id;
        let global_model_id = model.global_model_id;
        self.mutate(|s| {
            s.models.retain(|m| m.id != model.id);
            s.models.push(model);
        });
        self.changes.publish(CatalogChange::ModelChanged {
            provider_id,
            global_model_id,
        });
    }

    pub fn upsert_caller_scope(&self, scope: CallerScope) {
        self.mutate(|s| {
            s.caller_scopes.insert(scope.caller_id, scope);
        });
    }

    pub fn deactivate_credential(&self, id: CredentialId) {
        self.mutate(|s| {
            if let Some(c) = s.credentials.get_mut(&id) {
                c.active = false;
            }
        });
    }

    pub fn deactivate_endpoint(&self, id: EndpointId) {
        self.mutate(|s| {
            if let Some(e) = s.endpoints.get_mut(&id) {
                e.active = false;
            }
        });
    }

    pub fn deactivate_provider(&self, id: ProviderId) {
        self.mutate(|s| {
            if let Some(p) = s.providers.get_mut(&id) {
                p.active = false;
            }
        });
    }

    pub fn deactivate_global_model(&self, id: GlobalModelId) {
        let name = self
            .current
            .load()
            .global_models
            .get(&id)
            .map(|g| g.canonical_name.clone());
        self.mutate(|s| {
            if let Some(g) = s.global_models.get_mut(&id) {
                g.active = false;
            }
        });
        if let Some(name) = name {
            self.changes
                .publish(CatalogChange::GlobalModelChanged { name });
        }
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

pub use MappingKind as ModelMappingKind;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::Secret;
    use relay_protocol::WireFormat;
    use std::collections::HashSet;

    fn provider() -> Provider {
        Provider {
            id: ProviderId::new(),
            name: "openai-main".into(),
            priority: 1,
            active: true,
        }
    }

    #[test]
    fn snapshot_reflects_upserts_and_is_immutable_after_store() {
        let store = CatalogStore::new();
        let provider = provider();
        store.upsert_provider(provider.clone());

        let snap1 = store.snapshot();
        assert!(snap1.providers.contains_key(&provider.id));

        store.upsert_provider(Provider {
            active: false,
            ..provider.clone()
        });
        let snap2 = store.snapshot();
        assert!(snap1.providers[&provider.id].active, "prior snapshot is untouched");
        assert!(!snap2.providers[&provider.id].active);
    }

    #[test]
    fn global_model_mutation_publishes_catalog_change() {
        let store = CatalogStore::new();
        let mut rx = store.subscribe_changes();
        store.upsert_global_model(GlobalModel {
            id: GlobalModelId::new(),
            canonical_name: "gpt-4o-mini".into(),
            display_name: "GPT-4o mini".into(),
            capability_tags: HashSet::new(),
            active: true,
        });
        let change = rx.try_recv().expect("a change should have been published");
        assert_eq!(
            change,
            CatalogChange::GlobalModelChanged {
                name: "gpt-4o-mini".into()
            }
        );
    }

    #[test]
    fn credential_secret_round_trips_through_the_store() {
        let store = CatalogStore::new();
        let provider = provider();
        store.upsert_provider(provider.clone());
        let endpoint = Endpoint {
            id: EndpointId::new(),
            provider_id: provider.id,
            base_url: "https://u/".into(),
            api_format: WireFormat::OpenAiChat,
            custom_path: None,
            additional_headers: vec![],
            timeout_secs: 30,
            max_retries: 1,
            max_concurrent: None,
            supports_streaming: true,
            active: true,
        };
        store.upsert_endpoint(endpoint.clone());
        store.upsert_credential(Credential {
            id: CredentialId::new(),
            endpoint_id: endpoint.id,
            secret: Secret::new("sk-test"),
            internal_priority: 0,
            max_concurrent: Some(5),
            cache_ttl_minutes: 60,
            declared_capabilities: HashSet::new(),
            active: true,
        });
        let snap = store.snapshot();
        let cred = snap.credentials_for_endpoint(endpoint.id)[0];
        assert_eq!(cred.secret.expose(), "sk-test");
    }
}
