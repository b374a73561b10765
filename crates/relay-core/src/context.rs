//! Per-request context (SPEC_FULL §B "Context propagation"): the Rust-native
//! reading of the original's `contextvars`-based `context.py` — an explicit
//! value threaded through the Fallback Orchestrator's dispatch loop rather
//! than a thread-local, per design note §9 ("dependency-injected
//! values...passed down a context value").

use relay_common::CallerId;
use relay_protocol::ClientFormat;

/// Identifies one inbound request across every attempt the Fallback
/// Orchestrator makes on its behalf. `Orchestrator::handle` owns the one
/// instance for a request and calls [`RequestCtx::next_attempt`] once per
/// Dispatcher call, across every candidate — the counter is monotonic for
/// the whole request, not reset per candidate the way the retry loop's own
/// `retry` index is.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub trace_id: String,
    pub caller_id: CallerId,
    pub client_format: ClientFormat,
    /// 1-based; incremented once per Dispatcher attempt across all
    /// candidates (spec §4.13 "attempt slot").
    pub attempt_no: u32,
}

impl RequestCtx {
    pub fn new(trace_id: String, caller_id: CallerId, client_format: ClientFormat) -> Self {
        Self {
            trace_id,
            caller_id,
            client_format,
            attempt_no: 0,
        }
    }

    pub fn next_attempt(&mut self) -> u32 {
        self.attempt_no += 1;
        self.attempt_no
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_counter_increments_monotonically() {
        let mut ctx = RequestCtx::new("t1".into(), CallerId::new(), ClientFormat::OpenAiChat);
        assert_eq!(ctx.next_attempt(), 1);
        assert_eq!(ctx.next_attempt(), 2);
    }
}
