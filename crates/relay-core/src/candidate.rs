//! Candidate Resolver (spec §4.2): turns (client format, requested model,
//! caller, stream?, required capabilities) into an ordered list of
//! (Provider, Endpoint, Credential) triples to try, skipping unhealthy or
//! incapable ones and surfacing the caller's cache-affine pick first.
//! Grounded in the teacher's `gproxy-core::candidate_resolver` module: a
//! pure function over an immutable [`CatalogSnapshot`] plus the Health
//! Monitor and Cache-Affinity Store.

use std::collections::HashSet;
use std::sync::Arc;

use relay_catalog::{CatalogSnapshot, Credential, Endpoint, Provider};
use relay_common::{CallerId, GlobalModelId, PriorityMode};
use relay_protocol::ClientFormat;
use relay_transform::{ConverterRegistry, format_acceptable};

use crate::affinity::CacheAffinityStore;
use crate::health::HealthMonitor;
use crate::model_resolver::{ModelResolver, ModelUnsupported};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Provider,
    pub endpoint: Endpoint,
    pub credential: Credential,
    pub is_cached: bool,
    pub is_skipped: bool,
    pub skip_reason: Option<String>,
}

pub struct CandidateList {
    pub global_model_id: GlobalModelId,
    pub candidates: Vec<Candidate>,
}

pub struct CandidateResolver {
    catalog: Arc<relay_catalog::CatalogStore>,
    models: Arc<ModelResolver>,
    health: Arc<HealthMonitor>,
    affinity: Arc<CacheAffinityStore>,
    registry: Arc<ConverterRegistry>,
    priority_mode: PriorityMode,
    max_providers: usize,
}

impl CandidateResolver {
    pub fn new(
        catalog: Arc<relay_catalog::CatalogStore>,
        models: Arc<ModelResolver>,
        health: Arc<HealthMonitor>,
        affinity: Arc<CacheAffinityStore>,
        registry: Arc<ConverterRegistry>,
        priority_mode: PriorityMode,
        max_providers: usize,
    ) -> Self {
        Self {
            catalog,
            models,
            health,
            affinity,
            registry,
            priority_mode,
            max_providers,
        }
    }

    /// Spec §4.2 steps 1-7. `required_capabilities` is the parsed
    /// `X-Require-Capability` header: a present tag must be in the
    /// credential's declared set, an absent (`-tag`) tag must not be.
    pub async fn resolve(
        &self,
        client_format: ClientFormat,
        requested_model: &str,
        caller_id: CallerId,
        wants_stream: bool,
        required_capabilities: &RequiredCapabilities,
    ) -> Result<CandidateList, ModelUnsupported> {
        let snapshot = self.catalog.snapshot();
        let global_model_id = self.models.resolve(requested_model, None).await?;

        let allowed_providers = snapshot.caller_scopes.get(&caller_id).and_then(|scope| scope.allowed_provider_ids.clone());

        let mut providers: Vec<&Provider> = snapshot
            .providers
            .values()
            .filter(|p| p.active)
            .filter(|p| allowed_providers.as_ref().is_none_or(|allow| allow.contains(&p.id)))
            .filter(|p| self.has_acceptable_endpoint(&snapshot, p.id, client_format))
            .collect();
        providers.sort_by_key(|p| p.id);

        // Spec §4.2 step 3: "20 providers per batch, iterated until
        // exhausted" — providers beyond `max_providers` are never silently
        // dropped, just walked in a later batch. `max_providers` bounds the
        // chunk size of each resolution pass, not the total candidate pool.
        let batch_size = self.max_providers.max(1);
        let mut candidates = Vec::new();
        for batch in providers.chunks(batch_size) {
            for &provider in batch {
                for endpoint in snapshot.endpoints_for_provider(provider.id) {
                    if !endpoint.active || !format_acceptable(&self.registry, client_format, endpoint.api_format) {
                        continue;
                    }
                    let Some(model) = snapshot.model_for(provider.id, global_model_id) else {
                        continue;
                    };
                    for credential in snapshot.credentials_for_endpoint(endpoint.id) {
                        if !credential.active {
                            continue;
                        }
                        let (is_skipped, skip_reason) = self
                            .classify_skip(&snapshot, endpoint, credential, model, wants_stream, required_capabilities)
                            .await;
                        candidates.push(Candidate {
                            provider: provider.clone(),
                            endpoint: endpoint.clone(),
                            credential: credential.clone(),
                            is_cached: false,
                            is_skipped,
                            skip_reason,
                        });
                    }
                }
            }
        }

        self.mark_cache_affine(caller_id, client_format, global_model_id, &mut candidates).await;
        self.sort_candidates(&mut candidates);

        Ok(CandidateList { global_model_id, candidates })
    }

    fn has_acceptable_endpoint(&self, snapshot: &CatalogSnapshot, provider_id: relay_common::ProviderId, client_format: ClientFormat) -> bool {
        snapshot
            .endpoints_for_provider(provider_id)
            .into_iter()
            .any(|e| e.active && format_acceptable(&self.registry, client_format, e.api_format))
    }

    async fn classify_skip(
        &self,
        snapshot: &CatalogSnapshot,
        endpoint: &Endpoint,
        credential: &Credential,
        model: &relay_catalog::Model,
        wants_stream: bool,
        required_capabilities: &RequiredCapabilities,
    ) -> (bool, Option<String>) {
        if self.health.is_open(credential.id).await {
            return (true, Some("unhealthy".to_string()));
        }
        let declared = snapshot.credential_capabilities(credential, Some(model));
        for must_have in &required_capabilities.required {
            if !declared.contains(must_have) {
                return (true, Some(format!("capability-missing:{must_have}")));
            }
        }
        for must_not_have in &required_capabilities.forbidden {
            if declared.contains(must_not_have) {
                return (true, Some(format!("capability-forbidden:{must_not_have}")));
            }
        }
        if wants_stream && !endpoint.supports_streaming {
            return (true, Some("no-stream".to_string()));
        }
        (false, None)
    }

    async fn mark_cache_affine(
        &self,
        caller_id: CallerId,
        client_format: ClientFormat,
        global_model_id: GlobalModelId,
        candidates: &mut [Candidate],
    ) {
        let Some(pinned) = self.affinity.get(caller_id, client_format, global_model_id).await else {
            return;
        };
        for candidate in candidates.iter_mut() {
            if !candidate.is_skipped && candidate.endpoint.id == pinned.endpoint_id && candidate.credential.id == pinned.credential_id {
                candidate.is_cached = true;
            }
        }
    }

    /// Spec §4.2 step 6: cache-affine first, then ascending
    /// `(primary, secondary, id)` where priority-mode picks which of
    /// provider/credential is primary.
    fn sort_candidates(&self, candidates: &mut [Candidate]) {
        candidates.sort_by(|a, b| {
            b.is_cached.cmp(&a.is_cached).then_with(|| {
                let (a_primary, a_secondary) = self.sort_keys(a);
                let (b_primary, b_secondary) = self.sort_keys(b);
                a_primary
                    .cmp(&b_primary)
                    .then(a_secondary.cmp(&b_secondary))
                    .then(a.credential.id.cmp(&b.credential.id))
            })
        });
    }

    fn sort_keys(&self, candidate: &Candidate) -> (i32, i32) {
        match self.priority_mode {
            PriorityMode::Provider => (candidate.provider.priority, candidate.credential.internal_priority),
            PriorityMode::Credential => (candidate.credential.internal_priority, candidate.provider.priority),
        }
    }
}

/// Parsed form of the `X-Require-Capability: cap1,-cap2` header (spec §6).
#[derive(Debug, Clone, Default)]
pub struct RequiredCapabilities {
    pub required: HashSet<String>,
    pub forbidden: HashSet<String>,
}

impl RequiredCapabilities {
    pub fn parse(header_value: &str) -> Self {
        let mut out = Self::default();
        for raw in header_value.split(',') {
            let tag = raw.trim();
            if tag.is_empty() {
                continue;
            }
            if let Some(negated) = tag.strip_prefix('-') {
                if !negated.is_empty() {
                    out.forbidden.insert(negated.to_string());
                }
            } else {
                out.required.insert(tag.to_string());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_header_splits_required_and_forbidden() {
        let parsed = RequiredCapabilities::parse("vision,-tools, json_mode");
        assert!(parsed.required.contains("vision"));
        assert!(parsed.required.contains("json_mode"));
        assert!(parsed.forbidden.contains("tools"));
    }

    #[test]
    fn capability_header_ignores_blank_segments() {
        let parsed = RequiredCapabilities::parse(" , -, ,");
        assert!(parsed.required.is_empty());
        assert!(parsed.forbidden.is_empty());
    }
}
