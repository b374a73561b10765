use serde::{Deserialize, Serialize};

/// Process-wide configuration knobs (spec §6 "Configuration knobs").
///
/// Assembled the same way the teacher's `GlobalConfig`/`GlobalConfigPatch`
/// pair is: a sparse `GatewayConfigPatch` is overlaid (CLI > env > stored
/// defaults) and then finalized into a fully-populated `GatewayConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// `provider` or `credential` — which field is the primary sort key
    /// once cache-affinity has already been applied (spec §4.2 step 6).
    pub priority_mode: PriorityMode,

    /// Initial `learned_max_concurrent` for adaptive-mode credentials.
    pub adaptive_initial: u32,
    /// Absolute floor a learned ceiling is never dropped below.
    pub adaptive_lower_bound: u32,
    /// Absolute ceiling a learned value is never raised above.
    pub adaptive_upper_bound: u32,
    pub adaptive_window_size: usize,
    pub adaptive_window_increase_fraction: f64,
    pub adaptive_window_utilization_threshold: f64,
    pub adaptive_post_429_cooldown_secs: u64,
    pub adaptive_probe_interval_secs: u64,
    pub adaptive_probe_min_requests: usize,
    pub adaptive_probe_utilization_threshold: f64,
    pub adaptive_decrease_multiplier: f64,
    pub adaptive_unknown_shrink_multiplier: f64,
    pub adaptive_history_len: usize,

    /// `auto`, `redis`, or `memory` — the concurrency slot backend. Only
    /// `memory` ships in this workspace; the others are external collaborator
    /// choices per spec §1.
    pub concurrency_backend: ConcurrencyBackend,
    pub concurrency_local_fallback_ratio: f64,
    pub concurrency_slot_ttl_secs: u64,
    pub concurrency_hold_warn_threshold_secs: u64,
    /// Fraction of a credential's cap reserved for cache-affine callers
    /// (spec §4.4/§4.8 step 2, "Adaptive Reservation"). spec.md leaves the
    /// "based on recent load and phase" adjustment unspecified (open
    /// question); this workspace reads it as a single configured ratio
    /// (see DESIGN.md).
    pub concurrency_reservation_ratio: f64,

    pub health_failure_threshold: u32,
    pub health_cooldown_secs: u64,

    pub model_resolver_cache_ttl_secs: u64,

    pub stream_prefetch_frames: usize,
    pub stream_empty_chunk_threshold: usize,
    pub stream_data_timeout_secs: u64,
    pub stream_disconnect_poll_ms: u64,
    pub stream_telemetry_delay_ms: u64,

    pub candidate_resolver_max_providers: usize,

    /// Batch committer knobs for the Usage Recorder / Candidate Record
    /// Store (SPEC_FULL §B "Batch committer"): debounce writes rather than
    /// flushing synchronously per event.
    pub ledger_batch_max_size: usize,
    pub ledger_batch_flush_interval_ms: u64,

    /// `closed` or `open` — fail-closed vs fail-open default for
    /// security-sensitive paths (spec §5 "Shared-resource policy").
    pub blacklist_fail_policy: FailPolicy,

    pub http_connect_timeout_secs: u64,
    pub http_write_timeout_secs: u64,
    pub http_pool_idle_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            priority_mode: PriorityMode::Provider,
            adaptive_initial: 10,
            adaptive_lower_bound: 1,
            adaptive_upper_bound: 512,
            adaptive_window_size: 20,
            adaptive_window_increase_fraction: 0.6,
            adaptive_window_utilization_threshold: 0.7,
            adaptive_post_429_cooldown_secs: 60,
            adaptive_probe_interval_secs: 30 * 60,
            adaptive_probe_min_requests: 100,
            adaptive_probe_utilization_threshold: 0.3,
            adaptive_decrease_multiplier: 0.7,
            adaptive_unknown_shrink_multiplier: 0.9,
            adaptive_history_len: 20,
            concurrency_backend: ConcurrencyBackend::Memory,
            concurrency_local_fallback_ratio: 0.5,
            concurrency_slot_ttl_secs: 300,
            concurrency_hold_warn_threshold_secs: 60,
            concurrency_reservation_ratio: 0.3,
            health_failure_threshold: 5,
            health_cooldown_secs: 30,
            model_resolver_cache_ttl_secs: 300,
            stream_prefetch_frames: 5,
            stream_empty_chunk_threshold: 20,
            stream_data_timeout_secs: 30,
            stream_disconnect_poll_ms: 250,
            stream_telemetry_delay_ms: 100,
            candidate_resolver_max_providers: 20,
            ledger_batch_max_size: 50,
            ledger_batch_flush_interval_ms: 1000,
            blacklist_fail_policy: FailPolicy::Closed,
            http_connect_timeout_secs: 10,
            http_write_timeout_secs: 30,
            http_pool_idle_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    Provider,
    Credential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyBackend {
    Auto,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    Closed,
    Open,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Sparse overlay applied CLI > env > stored-default, mirroring the
/// teacher's `GlobalConfigPatch::overlay`.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigPatch {
    pub priority_mode: Option<PriorityMode>,
    pub concurrency_backend: Option<ConcurrencyBackend>,
    pub blacklist_fail_policy: Option<FailPolicy>,
    pub adaptive_initial: Option<u32>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.priority_mode.is_some() {
            self.priority_mode = other.priority_mode;
        }
        if other.concurrency_backend.is_some() {
            self.concurrency_backend = other.concurrency_backend;
        }
        if other.blacklist_fail_policy.is_some() {
            self.blacklist_fail_policy = other.blacklist_fail_policy;
        }
        if other.adaptive_initial.is_some() {
            self.adaptive_initial = other.adaptive_initial;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        let mut config = GatewayConfig::default();
        if let Some(v) = self.priority_mode {
            config.priority_mode = v;
        }
        if let Some(v) = self.concurrency_backend {
            config.concurrency_backend = v;
        }
        if let Some(v) = self.blacklist_fail_policy {
            config.blacklist_fail_policy = v;
        }
        if let Some(v) = self.adaptive_initial {
            if v == 0 {
                return Err(GatewayConfigError::InvalidValue {
                    field: "adaptive_initial",
                    value: v.to_string(),
                });
            }
            config.adaptive_initial = v;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let config = GatewayConfig::default();
        assert!(config.adaptive_lower_bound <= config.adaptive_initial);
        assert!(config.adaptive_initial <= config.adaptive_upper_bound);
    }

    #[test]
    fn patch_overlay_prefers_later_values() {
        let mut base = GatewayConfigPatch {
            priority_mode: Some(PriorityMode::Provider),
            ..Default::default()
        };
        base.overlay(GatewayConfigPatch {
            priority_mode: Some(PriorityMode::Credential),
            ..Default::default()
        });
        assert_eq!(base.priority_mode, Some(PriorityMode::Credential));
    }

    #[test]
    fn zero_adaptive_initial_rejected() {
        let patch = GatewayConfigPatch {
            adaptive_initial: Some(0),
            ..Default::default()
        };
        assert!(patch.into_config().is_err());
    }
}
