//! Adaptive Reservation (spec §4.8 step 2: "ask Adaptive Reservation for
//! the current `reservation_ratio` based on recent load and phase").
//!
//! spec.md deliberately leaves the load/phase-based adjustment unspecified
//! — §9's open questions are explicit that implementers should not guess
//! undocumented intent. This ships the one thing the spec does pin down (a
//! configured ratio consumed by [`crate::concurrency::ConcurrencyManager`])
//! behind a trait seam, so a future load-aware policy can be dropped in
//! without changing the Dispatcher's call site. Decision recorded in
//! DESIGN.md.

pub trait ReservationPolicy: Send + Sync {
    /// The fraction of a credential's cap reserved for cache-affine callers
    /// right now (spec §4.4's `r`, `0 <= r < 1`).
    fn current_ratio(&self) -> f64;
}

/// The ratio spec.md actually specifies a value for: a single configured
/// constant, read from [`relay_common::GatewayConfig::concurrency_reservation_ratio`].
pub struct FixedReservationPolicy {
    ratio: f64,
}

impl FixedReservationPolicy {
    pub fn new(ratio: f64) -> Self {
        Self { ratio: ratio.clamp(0.0, 0.999_999) }
    }
}

impl ReservationPolicy for FixedReservationPolicy {
    fn current_ratio(&self) -> f64 {
        self.ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_clamped_below_one() {
        let policy = FixedReservationPolicy::new(1.5);
        assert!(policy.current_ratio() < 1.0);
    }
}
