//! The request orchestration engine (spec §2): Candidate Resolver, Health
//! Monitor, Concurrency Manager, Adaptive Tuner, Rate-Limit Classifier,
//! Cache-Affinity Store, Request Dispatcher, Stream Processor, and the
//! Fallback Orchestrator that ties them together. Everything here is
//! transport-agnostic: `apps/relay-gateway` wires these types to a real
//! upstream client and catalog, since HTTP surface routing is out of scope
//! for this crate (spec §1).

pub mod adaptive;
pub mod affinity;
pub mod batch;
pub mod candidate;
pub mod candidate_record;
pub mod concurrency;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod model_resolver;
pub mod orchestrator;
pub mod rate_limit;
pub mod reservation;
pub mod stream;
pub mod upstream_client;
pub mod usage;

pub use adaptive::{AdaptiveTuner, AdaptiveTunerConfig, Adjustment};
pub use affinity::{AffinityPin, CacheAffinityStore};
pub use candidate::{Candidate, CandidateList, CandidateResolver, RequiredCapabilities};
pub use candidate_record::{
    CandidateRecord, CandidateRecordSink, CandidateRecordStatus, InMemoryCandidateRecordStore,
};
pub use concurrency::{ConcurrencyManager, SlotGuard, slot_store::LocalSlotStore, slot_store::SlotStore};
pub use context::RequestCtx;
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, ErrorAction, GatewayError, RateLimitKind};
pub use health::{CircuitState, HealthMonitor};
pub use metrics::{Metrics, NoopMetrics};
pub use model_resolver::{ModelResolver, ModelUnsupported};
pub use orchestrator::{
    Orchestrator, OrchestratorBody, OrchestratorRequest, OrchestratorSuccess,
};
pub use reservation::{FixedReservationPolicy, ReservationPolicy};
pub use stream::{DisconnectWatcher, NeverDisconnects, StreamConfig, StreamProcessor};
pub use upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
pub use usage::{InMemoryUsageLedger, UsageLedger, UsageLedgerRow, UsageStatus};
