//! Pluggable observability sink (SPEC_FULL §B "Metrics"): generalizes the
//! original's `metrics.py` counters into a small trait with a no-op default,
//! matching how the teacher keeps `TrafficSink`/`EventSink` pluggable rather
//! than hardcoding a metrics backend. Implementations are expected to be
//! cheap to call on the hot path (a channel send or an atomic increment);
//! this crate never blocks on them.

use relay_common::{CredentialId, EndpointId};

/// Observability hooks fired from across the gateway core (spec §4.4
/// "Observability: histogram of slot hold duration, counter of
/// exception-terminated releases, gauge of currently held slots per
/// credential", spec §4.5 adjustment visibility, spec §4.6 classifier
/// outcomes).
pub trait Metrics: Send + Sync {
    fn slot_acquired(&self, _endpoint_id: EndpointId, _credential_id: CredentialId) {}
    fn slot_released(&self, _endpoint_id: EndpointId, _credential_id: CredentialId, _held_ms: u64) {}
    fn slot_acquire_refused(&self, _endpoint_id: EndpointId, _credential_id: CredentialId) {}
    fn slot_hold_exceeded_warning(
        &self,
        _endpoint_id: EndpointId,
        _credential_id: CredentialId,
        _held_ms: u64,
    ) {
    }
    fn slot_released_on_exception(&self, _credential_id: CredentialId) {}

    fn adaptive_adjustment(&self, _credential_id: CredentialId, _old: u32, _new: u32, _reason: &str) {}

    fn rate_limit_classified(&self, _credential_id: CredentialId, _kind: &str) {}

    fn health_circuit_opened(&self, _credential_id: CredentialId) {}
    fn health_circuit_closed(&self, _credential_id: CredentialId) {}

    fn stream_ttfb_ms(&self, _credential_id: CredentialId, _ttfb_ms: u64) {}
}

/// The default wired at startup when no real metrics backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}
