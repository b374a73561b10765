//! Data model entities (spec §3). These are "value records keyed by opaque
//! id" per design note §9 — no parent-pointer traversal, no ORM-style
//! cyclic object graph; relationships are plain id fields resolved through
//! the [`crate::snapshot::CatalogSnapshot`] index.
//!
//! Only the *static*, admin-mutated fields live here. Adaptive telemetry
//! (`learned_max_concurrent`, utilization samples, …) is core-owned mutable
//! state tracked separately (see `relay-core::adaptive`), per design note §9
//! ("per-credential mutable adaptive state should live behind a single
//! update primitive... not mirrored as direct attribute assignment on a
//! shared row").

use std::collections::HashSet;

use relay_common::{CallerId, CredentialId, EndpointId, GlobalModelId, ProviderId};
use relay_protocol::WireFormat;
use serde::{Deserialize, Serialize};

use crate::secret::Secret;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    /// Smaller is preferred (spec §3).
    pub priority: i32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub provider_id: ProviderId,
    pub base_url: String,
    pub api_format: WireFormat,
    /// May contain `{model}`, `{action}` (spec §3 / §6).
    pub custom_path: Option<String>,
    pub additional_headers: Vec<(String, String)>,
    pub timeout_secs: u64,
    /// Per-credential retry budget used only when this endpoint is the
    /// cache-affine candidate (spec §3, §4.11).
    pub max_retries: u32,
    /// `None` = unlimited endpoint-level cap.
    pub max_concurrent: Option<u32>,
    pub supports_streaming: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub endpoint_id: EndpointId,
    #[serde(skip)]
    pub secret: Secret,
    // `Secret` intentionally has no Serialize/Deserialize impl; the field is
    // dropped from wire/snapshot-dump representations and restored to an
    // empty placeholder on deserialize (admin CRUD, not this core, owns the
    // real secret material).
    /// Smaller is preferred within the Provider (spec §3).
    pub internal_priority: i32,
    /// `None` = adaptive mode (learned ceiling tracked by the Adaptive
    /// Tuner); `Some(n)` = fixed cap, adaptive tuning never applies (spec §3
    /// invariant: "`learned_max_concurrent` is ignored when
    /// `Credential.max_concurrent` is non-null").
    pub max_concurrent: Option<u32>,
    /// 0 = upstream does not support prompt caching; cache-affinity entries
    /// are never set for this credential (spec §4.7).
    pub cache_ttl_minutes: u32,
    pub declared_capabilities: HashSet<String>,
    pub active: bool,
}

impl Credential {
    pub fn is_adaptive(&self) -> bool {
        self.max_concurrent.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalModel {
    pub id: GlobalModelId,
    pub canonical_name: String,
    pub display_name: String,
    pub capability_tags: HashSet<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKind {
    Alias,
    Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub id: uuid::Uuid,
    pub source_name: String,
    pub target_global_model_id: GlobalModelId,
    /// `None` = applies globally across providers (spec §3).
    pub provider_scope: Option<ProviderId>,
    pub kind: MappingKind,
    pub active: bool,
}

/// Links a Provider to a GlobalModel with a provider-specific model name
/// (spec §3 "Model (per-provider implementation)").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: uuid::Uuid,
    pub provider_id: ProviderId,
    pub global_model_id: GlobalModelId,
    pub provider_model_name: String,
    pub capability_overrides: Option<HashSet<String>>,
    pub active: bool,
}

/// A caller identity's allow-list scope (spec §4.2 step 2). Absent = no
/// restriction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerScope {
    pub caller_id: CallerId,
    pub allowed_provider_ids: Option<HashSet<ProviderId>>,
}
