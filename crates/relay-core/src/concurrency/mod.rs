//! Concurrency Manager (spec §4.4): per-endpoint and per-credential slot
//! accounting with a two-class (cache-affine vs new caller) reservation
//! policy on the credential cap. The slot-counting mechanics live behind
//! [`slot_store::SlotStore`]; this module owns the reservation-ratio math
//! and the local-fallback cap policy spec §4.4/§9 describe.

pub mod slot_store;

use std::sync::Arc;
use std::time::Duration;

use relay_common::{ConcurrencyBackend, CredentialId, EndpointId};
use tokio::time::Instant;
use uuid::Uuid;

use crate::metrics::Metrics;
use slot_store::SlotStore;

fn endpoint_key(id: EndpointId) -> String {
    format!("endpoint:{id}")
}

fn credential_key(id: CredentialId) -> String {
    format!("credential:{id}")
}

/// A held slot pair. Spec §4.4 "every acquired slot must be released on all
/// exit paths"; since `Drop` cannot await, callers are responsible for
/// calling [`ConcurrencyManager::release`] explicitly on every exit path
/// (success, error, cancellation) — mirroring the teacher's explicit
/// `finally`-block release rather than relying on an async destructor.
pub struct SlotGuard {
    lease_id: Uuid,
    pub endpoint_id: EndpointId,
    pub credential_id: CredentialId,
    acquired_at: Instant,
}

pub struct ConcurrencyManager {
    store: Arc<dyn SlotStore>,
    backend: ConcurrencyBackend,
    local_fallback_ratio: f64,
    slot_ttl: Duration,
    hold_warn_threshold: Duration,
    metrics: Arc<dyn Metrics>,
}

impl ConcurrencyManager {
    pub fn new(
        store: Arc<dyn SlotStore>,
        backend: ConcurrencyBackend,
        local_fallback_ratio: f64,
        slot_ttl: Duration,
        hold_warn_threshold: Duration,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            store,
            backend,
            local_fallback_ratio,
            slot_ttl,
            hold_warn_threshold,
            metrics,
        }
    }

    /// Whether caps should be conservatively shrunk before being applied to
    /// the store. This workspace ships only the in-process [`slot_store::LocalSlotStore`]
    /// (spec §1: the real distributed backend is an external storage-layer
    /// choice); selecting `Auto`/`Redis` without one wired up is always the
    /// "distributed store configured but unreachable" case spec §4.4/§9
    /// describes, so the fallback ratio applies whenever the backend isn't
    /// explicitly `Memory` (documented decision, see DESIGN.md).
    fn is_degraded(&self) -> bool {
        !matches!(self.backend, ConcurrencyBackend::Memory)
    }

    fn effective_cap(&self, cap: u32) -> u32 {
        if self.is_degraded() {
            ((cap as f64) * self.local_fallback_ratio).floor() as u32
        } else {
            cap
        }
    }

    /// Spec §4.4 core operation. `endpoint_cap` is `None` for an unlimited
    /// endpoint. Returns `None` on refusal (ConcurrencyLimitError at the
    /// Dispatcher layer).
    pub async fn try_acquire(
        &self,
        endpoint_id: EndpointId,
        endpoint_cap: Option<u32>,
        credential_id: CredentialId,
        credential_cap: u32,
        is_cached_caller: bool,
        reservation_ratio: f64,
    ) -> Option<SlotGuard> {
        let effective_endpoint_cap = endpoint_cap.map(|c| self.effective_cap(c));
        let effective_credential_cap = self.effective_cap(credential_cap);

        let class_cap = if is_cached_caller {
            effective_credential_cap
        } else {
            let r = reservation_ratio.clamp(0.0, 0.999_999);
            ((effective_credential_cap as f64) * (1.0 - r)).floor() as u32
        };

        let lease_id = match self
            .store
            .try_acquire_pair(
                &endpoint_key(endpoint_id),
                effective_endpoint_cap,
                &credential_key(credential_id),
                class_cap,
                self.slot_ttl,
            )
            .await
        {
            Some(id) => id,
            None => {
                self.metrics.slot_acquire_refused(endpoint_id, credential_id);
                return None;
            }
        };

        self.metrics.slot_acquired(endpoint_id, credential_id);
        Some(SlotGuard {
            lease_id,
            endpoint_id,
            credential_id,
            acquired_at: Instant::now(),
        })
    }

    /// Releases a slot acquired via [`Self::try_acquire`]. `exception` marks
    /// whether this release happened on an error/cancellation path rather
    /// than a clean success, for the exception-terminated-release counter
    /// (spec §4.4 "counter of exception-terminated releases").
    pub async fn release(&self, guard: SlotGuard, exception: bool) {
        self.store.release(guard.lease_id).await;
        let held = guard.acquired_at.elapsed();
        self.metrics
            .slot_released(guard.endpoint_id, guard.credential_id, held.as_millis() as u64);
        if exception {
            self.metrics.slot_released_on_exception(guard.credential_id);
        }
        if held >= self.hold_warn_threshold {
            self.metrics
                .slot_hold_exceeded_warning(guard.endpoint_id, guard.credential_id, held.as_millis() as u64);
        }
    }

    /// Current in-flight count for a credential, consulted by the Adaptive
    /// Tuner for `utilization = current_in_flight / learned_max_concurrent`.
    pub async fn current_credential_count(&self, credential_id: CredentialId) -> u32 {
        self.store.current(&credential_key(credential_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::slot_store::LocalSlotStore;
    use super::*;
    use crate::metrics::NoopMetrics;

    fn manager(backend: ConcurrencyBackend) -> ConcurrencyManager {
        ConcurrencyManager::new(
            LocalSlotStore::new(),
            backend,
            0.5,
            Duration::from_secs(60),
            Duration::from_secs(60),
            Arc::new(NoopMetrics),
        )
    }

    #[tokio::test]
    async fn non_cached_caller_is_refused_at_the_reservation_floor() {
        // Scenario 6: cap 10, ratio 0.3, 7 non-cached holders already in.
        let manager = manager(ConcurrencyBackend::Memory);
        let endpoint_id = EndpointId::new();
        let credential_id = CredentialId::new();
        let mut guards = Vec::new();
        for _ in 0..7 {
            let guard = manager
                .try_acquire(endpoint_id, None, credential_id, 10, false, 0.3)
                .await
                .expect("first seven non-cached acquires should succeed");
            guards.push(guard);
        }
        let refused = manager
            .try_acquire(endpoint_id, None, credential_id, 10, false, 0.3)
            .await;
        assert!(refused.is_none(), "8th non-cached caller must be refused at floor(10*0.7)=7");

        let cached = manager
            .try_acquire(endpoint_id, None, credential_id, 10, true, 0.3)
            .await;
        assert!(cached.is_some(), "a cached caller should still be admitted up to the full cap");
    }

    #[tokio::test]
    async fn release_frees_the_slot_for_reuse() {
        let manager = manager(ConcurrencyBackend::Memory);
        let endpoint_id = EndpointId::new();
        let credential_id = CredentialId::new();
        let guard = manager
            .try_acquire(endpoint_id, Some(1), credential_id, 1, false, 0.0)
            .await
            .unwrap();
        assert!(
            manager
                .try_acquire(endpoint_id, Some(1), credential_id, 1, false, 0.0)
                .await
                .is_none()
        );
        manager.release(guard, false).await;
        assert!(
            manager
                .try_acquire(endpoint_id, Some(1), credential_id, 1, false, 0.0)
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn non_memory_backend_applies_the_fallback_ratio() {
        let manager = manager(ConcurrencyBackend::Auto);
        let endpoint_id = EndpointId::new();
        let credential_id = CredentialId::new();
        // effective cap = floor(10*0.5) = 5
        let mut guards = Vec::new();
        for _ in 0..5 {
            guards.push(
                manager
                    .try_acquire(endpoint_id, None, credential_id, 10, true, 0.0)
                    .await
                    .unwrap(),
            );
        }
        assert!(
            manager
                .try_acquire(endpoint_id, None, credential_id, 10, true, 0.0)
                .await
                .is_none()
        );
    }
}
