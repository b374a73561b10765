//! Health Monitor (spec §4.3): a three-state circuit breaker per credential,
//! with a delay-queue background task that reopens the circuit once its
//! cooldown elapses. Grounded directly in the teacher's
//! `gproxy-provider-core::credential::unavailable_queue::UnavailableQueue`
//! (`BinaryHeap<Reverse<(Instant, CredentialId)>>` + `Notify`-driven recover
//! loop), generalized from its two-state Active/Unavailable model to the
//! three-state closed/half-open/open circuit spec §4.3 calls for.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use relay_common::CredentialId;
use tokio::sync::{Notify, RwLock};
use tokio::time::{Instant, sleep_until};

use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Serving traffic normally.
    Closed,
    /// Cooldown elapsed; the next caller to check admits exactly one probe
    /// and claims `ProbeInFlight`. A success closes the circuit, a failure
    /// reopens it for another cooldown.
    HalfOpen,
    /// One probe has been claimed and is outstanding; every other caller is
    /// treated as if the circuit were open until the probe reports a result
    /// (or `probe_timeout` elapses and the claim is abandoned).
    ProbeInFlight { claimed_at: Instant },
    /// Failing; excluded from candidate selection until `until` elapses.
    Open { until: Instant },
}

struct CredentialHealth {
    consecutive_failures: u32,
    state: CircuitState,
}

impl Default for CredentialHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            state: CircuitState::Closed,
        }
    }
}

/// Per-credential circuit breaker state (spec §4.3). `failure_threshold`
/// consecutive client-attributable failures open the circuit for
/// `cooldown`; a background task transitions `Open -> HalfOpen` once the
/// cooldown elapses, mirroring `UnavailableQueue::spawn_recover_task`.
pub struct HealthMonitor {
    states: RwLock<HashMap<CredentialId, CredentialHealth>>,
    queue: Arc<CooldownQueue>,
    failure_threshold: u32,
    cooldown: Duration,
    /// How long a claimed probe may stay outstanding before the claim is
    /// abandoned and the circuit falls back to `Open` for another cooldown.
    /// Guards against a caller claiming the probe and then never reporting
    /// an outcome (e.g. it was dropped before dispatch).
    probe_timeout: Duration,
    metrics: Arc<dyn Metrics>,
}

impl HealthMonitor {
    pub fn new(failure_threshold: u32, cooldown: Duration, metrics: Arc<dyn Metrics>) -> Arc<Self> {
        let monitor = Arc::new(Self {
            states: RwLock::new(HashMap::new()),
            queue: Arc::new(CooldownQueue::new()),
            failure_threshold,
            cooldown,
            probe_timeout: cooldown,
            metrics,
        });
        monitor.clone().spawn_recover_task();
        monitor
    }

    fn spawn_recover_task(self: Arc<Self>) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            queue.run(self).await;
        });
    }

    /// Whether a candidate using this credential should currently be
    /// skipped by the Candidate Resolver (spec §4.2 step 4: "skip any
    /// Credential whose circuit is open").
    ///
    /// Admitting a half-open circuit is a claim, not a read: the first
    /// caller to observe `HalfOpen` atomically takes the single probe slot
    /// (transitioning to `ProbeInFlight`) and is told the credential is
    /// available; every other caller sees it as unavailable until the
    /// probe's outcome is recorded, matching spec §4.3's "admitting exactly
    /// one probe". A claim that never reports an outcome expires after
    /// `probe_timeout` and falls back to `Open` for another cooldown.
    pub async fn is_open(&self, credential_id: CredentialId) -> bool {
        let (result, reopened_until) = {
            let mut states = self.states.write().await;
            match states.get_mut(&credential_id) {
                None => (false, None),
                Some(health) => match health.state {
                    CircuitState::Open { .. } => (true, None),
                    CircuitState::HalfOpen => {
                        health.state = CircuitState::ProbeInFlight { claimed_at: Instant::now() };
                        (false, None)
                    }
                    CircuitState::ProbeInFlight { claimed_at } if claimed_at.elapsed() >= self.probe_timeout => {
                        let until = Instant::now() + self.cooldown;
                        health.state = CircuitState::Open { until };
                        (true, Some(until))
                    }
                    CircuitState::ProbeInFlight { .. } => (true, None),
                    CircuitState::Closed => (false, None),
                },
            }
        };
        if let Some(until) = reopened_until {
            self.metrics.health_circuit_opened(credential_id);
            self.queue.push(until, credential_id).await;
        }
        result
    }

    /// A successful attempt: resets the failure count and closes the
    /// circuit (a half-open probe that succeeds closes for good).
    pub async fn record_success(&self, credential_id: CredentialId) {
        let mut states = self.states.write().await;
        let health = states.entry(credential_id).or_default();
        let was_open = !matches!(health.state, CircuitState::Closed);
        health.consecutive_failures = 0;
        health.state = CircuitState::Closed;
        if was_open {
            self.metrics.health_circuit_closed(credential_id);
        }
    }

    /// A client-attributable failure (spec §4.11: errors classified `Raise`
    /// or a plain 4xx outside the client-error pattern do not count here —
    /// only failures the Orchestrator's classifier marks
    /// `record_health_failure` reach this method). Opens the circuit once
    /// `failure_threshold` consecutive failures accrue.
    pub async fn record_failure(&self, credential_id: CredentialId) {
        let opened_until = {
            let mut states = self.states.write().await;
            let health = states.entry(credential_id).or_default();
            health.consecutive_failures += 1;
            if health.consecutive_failures >= self.failure_threshold
                || matches!(health.state, CircuitState::HalfOpen | CircuitState::ProbeInFlight { .. })
            {
                let until = Instant::now() + self.cooldown;
                health.state = CircuitState::Open { until };
                Some(until)
            } else {
                None
            }
        };
        if let Some(until) = opened_until {
            self.metrics.health_circuit_opened(credential_id);
            self.queue.push(until, credential_id).await;
        }
    }

    async fn transition_to_half_open_if_due(&self, credential_id: CredentialId, now: Instant) -> bool {
        let mut states = self.states.write().await;
        match states.get_mut(&credential_id) {
            Some(health) => match health.state {
                CircuitState::Open { until } if until <= now => {
                    health.state = CircuitState::HalfOpen;
                    true
                }
                _ => false,
            },
            None => false,
        }
    }
}

/// The delay-queue: a min-heap of `(deadline, credential_id)` pairs plus a
/// `Notify` so pushes wake a sleeping recover loop immediately, exactly the
/// shape of the teacher's `UnavailableQueue`.
struct CooldownQueue {
    heap: tokio::sync::Mutex<BinaryHeap<Reverse<(Instant, CredentialId)>>>,
    notify: Notify,
}

impl CooldownQueue {
    fn new() -> Self {
        Self {
            heap: tokio::sync::Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, until: Instant, credential_id: CredentialId) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, credential_id)));
        }
        self.notify.notify_one();
    }

    async fn run(&self, monitor: Arc<HealthMonitor>) {
        loop {
            let next = {
                let heap = self.heap.lock().await;
                heap.peek().map(|Reverse((t, id))| (*t, *id))
            };

            match next {
                None => {
                    self.notify.notified().await;
                    continue;
                }
                Some((deadline, _)) => sleep_until(deadline).await,
            }

            let now = Instant::now();
            let mut due = Vec::new();
            {
                let mut heap = self.heap.lock().await;
                while let Some(Reverse((t, id))) = heap.peek().copied()
                    && t <= now
                {
                    heap.pop();
                    due.push(id);
                }
            }

            for credential_id in due {
                monitor.transition_to_half_open_if_due(credential_id, now).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;

    fn monitor(threshold: u32) -> Arc<HealthMonitor> {
        HealthMonitor::new(threshold, Duration::from_millis(50), Arc::new(NoopMetrics))
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_failures() {
        let monitor = monitor(2);
        let cred = CredentialId::new();
        assert!(!monitor.is_open(cred).await);
        monitor.record_failure(cred).await;
        assert!(!monitor.is_open(cred).await);
        monitor.record_failure(cred).await;
        assert!(monitor.is_open(cred).await);
    }

    #[tokio::test]
    async fn success_closes_circuit_and_resets_failures() {
        let monitor = monitor(1);
        let cred = CredentialId::new();
        monitor.record_failure(cred).await;
        assert!(monitor.is_open(cred).await);
        monitor.record_success(cred).await;
        assert!(!monitor.is_open(cred).await);
    }

    #[tokio::test]
    async fn cooldown_elapses_into_half_open_not_closed() {
        let monitor = monitor(1);
        let cred = CredentialId::new();
        monitor.record_failure(cred).await;
        assert!(monitor.is_open(cred).await);
        tokio::time::sleep(Duration::from_millis(150)).await;
        // half-open is not "open": the candidate resolver should admit one
        // probe attempt again.
        assert!(!monitor.is_open(cred).await);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let monitor = monitor(1);
        let cred = CredentialId::new();
        monitor.record_failure(cred).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!monitor.is_open(cred).await);
        monitor.record_failure(cred).await;
        assert!(monitor.is_open(cred).await);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_concurrent_probe() {
        let monitor = monitor(1);
        let cred = CredentialId::new();
        monitor.record_failure(cred).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        // First caller claims the single probe slot...
        assert!(!monitor.is_open(cred).await);
        // ...every other concurrent caller is turned away until the probe
        // reports an outcome, rather than all of them being admitted.
        assert!(monitor.is_open(cred).await);
        assert!(monitor.is_open(cred).await);
        monitor.record_success(cred).await;
        assert!(!monitor.is_open(cred).await);
    }

    #[tokio::test]
    async fn abandoned_probe_claim_expires_back_to_open() {
        let monitor = HealthMonitor::new(1, Duration::from_millis(30), Arc::new(NoopMetrics));
        let cred = CredentialId::new();
        monitor.record_failure(cred).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!monitor.is_open(cred).await); // claims the probe, never reports an outcome
        assert!(monitor.is_open(cred).await); // a second caller is turned away
        tokio::time::sleep(Duration::from_millis(50)).await; // probe_timeout == cooldown elapses
        assert!(monitor.is_open(cred).await); // claim abandoned, falls back to Open
        tokio::time::sleep(Duration::from_millis(50)).await; // new cooldown elapses
        assert!(!monitor.is_open(cred).await); // half-open again, admits a fresh probe
    }
}
