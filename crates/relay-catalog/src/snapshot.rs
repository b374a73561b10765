//! An immutable, `Arc`-shared, id-indexed view of the catalog (design note
//! §9: "a small in-memory index (id->record) per entity kind rebuilt from
//! the persistent store"). The Candidate Resolver is a pure function over
//! one of these plus the Health Monitor and Cache-Affinity Store (spec §8
//! testable property 4: candidate ordering is deterministic given a fixed
//! catalog snapshot).

use std::collections::HashMap;

use relay_common::{CallerId, CredentialId, EndpointId, GlobalModelId, ProviderId};

use crate::entities::{CallerScope, Credential, Endpoint, GlobalModel, MappingKind, Model, ModelMapping, Provider};

#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub providers: HashMap<ProviderId, Provider>,
    pub endpoints: HashMap<EndpointId, Endpoint>,
    pub credentials: HashMap<CredentialId, Credential>,
    pub global_models: HashMap<GlobalModelId, GlobalModel>,
    pub model_mappings: Vec<ModelMapping>,
    pub models: Vec<Model>,
    pub caller_scopes: HashMap<CallerId, CallerScope>,
}

impl CatalogSnapshot {
    pub fn endpoints_for_provider(&self, provider_id: ProviderId) -> Vec<&Endpoint> {
        self.endpoints
            .values()
            .filter(|e| e.provider_id == provider_id)
            .collect()
    }

    pub fn credentials_for_endpoint(&self, endpoint_id: EndpointId) -> Vec<&Credential> {
        self.credentials
            .values()
            .filter(|c| c.endpoint_id == endpoint_id)
            .collect()
    }

    /// The `Model` row (if any) implementing `global_model_id` on behalf of
    /// `provider_id` (spec §4.2 step 3: "for each surviving Provider, for
    /// each Endpoint that implements G via a per-provider Model row").
    pub fn model_for(&self, provider_id: ProviderId, global_model_id: GlobalModelId) -> Option<&Model> {
        self.models.iter().find(|m| {
            m.active && m.provider_id == provider_id && m.global_model_id == global_model_id
        })
    }

    pub fn global_model_by_name(&self, canonical_name: &str) -> Option<&GlobalModel> {
        self.global_models
            .values()
            .find(|g| g.active && g.canonical_name == canonical_name)
    }

    /// Resolution order step 1-4 of spec §4.1: the most specific active
    /// mapping/alias rule for `(source_name, provider_scope)`.
    pub fn mapping_for(
        &self,
        source_name: &str,
        provider_scope: Option<ProviderId>,
        kind: MappingKind,
    ) -> Option<&ModelMapping> {
        self.model_mappings.iter().find(|m| {
            m.active && m.kind == kind && m.source_name == source_name && m.provider_scope == provider_scope
        })
    }

    pub fn credential_capabilities(&self, credential: &Credential, model: Option<&Model>) -> std::collections::HashSet<String> {
        let mut caps = credential.declared_capabilities.clone();
        if let Some(model) = model
            && let Some(overrides) = &model.capability_overrides
        {
            caps.extend(overrides.iter().cloned());
        }
        caps
    }
}
