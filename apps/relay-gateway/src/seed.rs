//! A tiny in-memory catalog fixture so the binary has something to route
//! against without a real admin surface wired up (spec §1: the admin CRUD
//! API and its persistence layer are external collaborators, out of scope
//! for this workspace). Mirrors the shape of spec §8 Scenario 1's fixture.

use std::collections::HashSet;

use relay_catalog::{CatalogStore, Credential, Endpoint, GlobalModel, Model, Provider, Secret};
use relay_common::{CredentialId, EndpointId, GlobalModelId, ProviderId};
use relay_protocol::WireFormat;

/// Ids for the single demo model the seeded catalog exposes, so the caller
/// driving a demo request knows what to ask for.
pub struct DemoFixture {
    pub global_model_id: GlobalModelId,
    pub canonical_name: String,
}

/// Seeds one provider/endpoint/credential implementing one `GlobalModel`,
/// matching spec §8 Scenario 1 ("single-provider happy path"). `base_url` and
/// `secret` are operator-supplied since there is no real upstream bundled
/// with this workspace.
pub fn seed_demo_catalog(catalog: &CatalogStore, base_url: &str, secret: &str) -> DemoFixture {
    let provider = Provider {
        id: ProviderId::new(),
        name: "demo-openai".to_string(),
        priority: 1,
        active: true,
    };
    catalog.upsert_provider(provider.clone());

    let endpoint = Endpoint {
        id: EndpointId::new(),
        provider_id: provider.id,
        base_url: base_url.to_string(),
        api_format: WireFormat::OpenAiChat,
        custom_path: None,
        additional_headers: Vec::new(),
        timeout_secs: 30,
        max_retries: 2,
        max_concurrent: None,
        supports_streaming: true,
        active: true,
    };
    catalog.upsert_endpoint(endpoint.clone());

    catalog.upsert_credential(Credential {
        id: CredentialId::new(),
        endpoint_id: endpoint.id,
        secret: Secret::new(secret),
        internal_priority: 0,
        max_concurrent: Some(5),
        cache_ttl_minutes: 60,
        declared_capabilities: HashSet::new(),
        active: true,
    });

    let global_model = GlobalModel {
        id: GlobalModelId::new(),
        canonical_name: "gpt-4o-mini".to_string(),
        display_name: "GPT-4o mini".to_string(),
        capability_tags: HashSet::new(),
        active: true,
    };
    catalog.upsert_global_model(global_model.clone());

    catalog.upsert_model(Model {
        id: uuid::Uuid::now_v7(),
        provider_id: provider.id,
        global_model_id: global_model.id,
        provider_model_name: "gpt-4o-mini-2024".to_string(),
        capability_overrides: None,
        active: true,
    });

    DemoFixture {
        global_model_id: global_model.id,
        canonical_name: global_model.canonical_name,
    }
}
