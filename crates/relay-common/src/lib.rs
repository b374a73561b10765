//! Shared primitives used across the gateway workspace: opaque ids, the
//! header bag, and the process-wide configuration knobs from spec §6.

mod config;
mod headers;
mod ids;

pub use config::{
    ConcurrencyBackend, FailPolicy, GatewayConfig, GatewayConfigError, GatewayConfigPatch,
    PriorityMode,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use ids::{CallerId, CredentialId, EndpointId, GlobalModelId, ProviderId, new_trace_id};
