//! Adaptive Tuner (spec §4.5): learns a per-credential concurrency ceiling
//! for credentials with `max_concurrent == None`, from a sliding window of
//! utilization samples plus 429 feedback. Grounded directly in
//! `original_source/src/services/rate_limit/adaptive_concurrency.py`'s
//! `AdaptiveConcurrencyManager` (window-ratio increase, probe increase,
//! AIMD-style decrease), translated from its SQLAlchemy-row fields into an
//! in-memory `RwLock<HashMap<..>>` the way this crate's other per-credential
//! state (Health Monitor, Cache-Affinity Store) already does.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use relay_common::CredentialId;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::error::RateLimitKind;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    utilization: f64,
}

#[derive(Debug, Clone)]
pub struct Adjustment {
    pub at: Instant,
    pub old_limit: u32,
    pub new_limit: u32,
    pub reason: &'static str,
}

struct CredentialState {
    learned_max_concurrent: u32,
    samples: VecDeque<Sample>,
    last_429_at: Option<Instant>,
    last_probe_increase_at: Option<Instant>,
    consecutive_concurrency_429: u32,
    history: VecDeque<Adjustment>,
}

#[derive(Debug, Clone)]
pub struct AdaptiveTunerConfig {
    pub initial: u32,
    pub lower_bound: u32,
    pub upper_bound: u32,
    pub window_size: usize,
    pub window_increase_fraction: f64,
    pub window_utilization_threshold: f64,
    pub post_429_cooldown: Duration,
    pub probe_interval: Duration,
    pub probe_min_requests: usize,
    pub probe_utilization_threshold: f64,
    pub decrease_multiplier: f64,
    pub unknown_shrink_multiplier: f64,
    pub history_len: usize,
}

pub struct AdaptiveTuner {
    states: RwLock<HashMap<CredentialId, CredentialState>>,
    config: AdaptiveTunerConfig,
    metrics: Arc<dyn Metrics>,
}

impl AdaptiveTuner {
    pub fn new(config: AdaptiveTunerConfig, metrics: Arc<dyn Metrics>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
            metrics,
        }
    }

    fn new_state(&self) -> CredentialState {
        CredentialState {
            learned_max_concurrent: self.config.initial,
            samples: VecDeque::new(),
            last_429_at: None,
            last_probe_increase_at: None,
            consecutive_concurrency_429: 0,
            history: VecDeque::new(),
        }
    }

    /// The current learned ceiling, used as the adaptive credential's
    /// effective `credential_cap` by the Concurrency Manager.
    pub async fn learned_max_concurrent(&self, credential_id: CredentialId) -> u32 {
        let mut states = self.states.write().await;
        states.entry(credential_id).or_insert_with(|| self.new_state()).learned_max_concurrent
    }

    /// Spec §4.5 "on each successful request completion": appends a
    /// utilization sample and evaluates the increase conditions.
    pub async fn record_success(&self, credential_id: CredentialId, current_in_flight: u32) {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let state = states.entry(credential_id).or_insert_with(|| CredentialState {
            learned_max_concurrent: self.config.initial,
            samples: VecDeque::new(),
            last_429_at: None,
            last_probe_increase_at: None,
            consecutive_concurrency_429: 0,
            history: VecDeque::new(),
        });
        let utilization = if state.learned_max_concurrent > 0 {
            current_in_flight as f64 / state.learned_max_concurrent as f64
        } else {
            0.0
        };
        state.samples.push_back(Sample { at: now, utilization });
        while state.samples.len() > self.config.window_size {
            state.samples.pop_front();
        }

        if state.learned_max_concurrent >= self.config.upper_bound {
            return;
        }
        if self.in_cooldown(state, now) {
            return;
        }

        let reason = if self.window_increase_applies(state) {
            Some("window_high_utilization")
        } else if self.probe_increase_applies(state, now) {
            Some("probe_increase")
        } else {
            None
        };

        let Some(reason) = reason else { return };

        let old_limit = state.learned_max_concurrent;
        let new_limit = (old_limit + 1).min(self.config.upper_bound);
        state.learned_max_concurrent = new_limit;
        state.samples.clear();
        if reason == "probe_increase" {
            state.last_probe_increase_at = Some(now);
        }
        push_history(&mut state.history, self.config.history_len, Adjustment { at: now, old_limit, new_limit, reason });
        drop(states);
        self.metrics.adaptive_adjustment(credential_id, old_limit, new_limit, reason);
    }

    fn in_cooldown(&self, state: &CredentialState, now: Instant) -> bool {
        state
            .last_429_at
            .is_some_and(|t| now.duration_since(t) < self.config.post_429_cooldown)
    }

    fn window_increase_applies(&self, state: &CredentialState) -> bool {
        if state.samples.len() < self.config.window_size {
            return false;
        }
        let high = state
            .samples
            .iter()
            .filter(|s| s.utilization >= self.config.window_utilization_threshold)
            .count();
        (high as f64) / (state.samples.len() as f64) >= self.config.window_increase_fraction
    }

    fn probe_increase_applies(&self, state: &CredentialState, now: Instant) -> bool {
        if let Some(last_429) = state.last_429_at
            && now.duration_since(last_429) < self.config.probe_interval
        {
            return false;
        }
        if let Some(last_probe) = state.last_probe_increase_at
            && now.duration_since(last_probe) < self.config.probe_interval
        {
            return false;
        }
        if state.samples.len() < self.config.probe_min_requests {
            return false;
        }
        let avg = state.samples.iter().map(|s| s.utilization).sum::<f64>() / state.samples.len() as f64;
        avg >= self.config.probe_utilization_threshold
    }

    /// Spec §4.5 429-feedback contract. `observed_in_flight` is the
    /// in-flight count the Dispatcher measured at the moment of the 429,
    /// used for the concurrency-kind decrease's `observed_in_flight * 0.7`.
    pub async fn record_429(&self, credential_id: CredentialId, kind: RateLimitKind, observed_in_flight: Option<u32>) {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let state = states.entry(credential_id).or_insert_with(|| self.new_state());

        state.last_429_at = Some(now);
        state.samples.clear();

        let old_limit = state.learned_max_concurrent;
        let (new_limit, reason): (u32, &'static str) = match kind {
            RateLimitKind::Concurrency => {
                state.consecutive_concurrency_429 += 1;
                let basis = observed_in_flight.unwrap_or(old_limit) as f64;
                let candidate = (basis * self.config.decrease_multiplier).floor() as u32;
                (candidate.max(self.config.lower_bound), "concurrent_429")
            }
            RateLimitKind::Rpm | RateLimitKind::Daily | RateLimitKind::Monthly => {
                // Not concurrency-shaped; nothing to adjust (spec §4.5).
                drop(states);
                return;
            }
            RateLimitKind::Unknown => {
                let candidate = (old_limit as f64 * self.config.unknown_shrink_multiplier).floor() as u32;
                (candidate.max(self.config.lower_bound), "unknown_429")
            }
        };

        state.learned_max_concurrent = new_limit;
        push_history(&mut state.history, self.config.history_len, Adjustment { at: now, old_limit, new_limit, reason });
        drop(states);
        self.metrics.adaptive_adjustment(credential_id, old_limit, new_limit, reason);
    }
}

fn push_history(history: &mut VecDeque<Adjustment>, cap: usize, adjustment: Adjustment) {
    history.push_back(adjustment);
    while history.len() > cap {
        history.pop_front();
    }
}

impl Default for AdaptiveTunerConfig {
    fn default() -> Self {
        Self {
            initial: 10,
            lower_bound: 1,
            upper_bound: 512,
            window_size: 20,
            window_increase_fraction: 0.6,
            window_utilization_threshold: 0.7,
            post_429_cooldown: Duration::from_secs(60),
            probe_interval: Duration::from_secs(1800),
            probe_min_requests: 100,
            probe_utilization_threshold: 0.3,
            decrease_multiplier: 0.7,
            unknown_shrink_multiplier: 0.9,
            history_len: 20,
        }
    }
}
