//! Process bootstrap: CLI/env configuration, then wiring every core
//! component into one set of dependency-injected values (spec §9 "Global
//! singletons... re-expressed as dependency-injected values constructed
//! once at startup and passed down a context value"). Grounded in the
//! teacher's `gproxy-core::bootstrap::bootstrap` — CLI-over-env precedence
//! via `clap`'s `env` feature, a `Bootstrap`-style struct the binary's
//! `main` destructures.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use relay_catalog::CatalogStore;
use relay_common::{ConcurrencyBackend as GatewayConcurrencyBackend, GatewayConfig, GatewayConfigPatch, PriorityMode};
use relay_core::{
    AdaptiveTuner, AdaptiveTunerConfig, CacheAffinityStore, CandidateResolver, ConcurrencyManager,
    Dispatcher, FixedReservationPolicy, HealthMonitor, InMemoryCandidateRecordStore,
    InMemoryUsageLedger, LocalSlotStore, ModelResolver, NoopMetrics, Orchestrator,
    StreamConfig, StreamProcessor, UpstreamClientConfig, WreqUpstreamClient,
};
use relay_transform::build_registry;

use crate::seed::{DemoFixture, seed_demo_catalog};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "relay-gateway",
    version,
    about = "Multi-tenant, multi-protocol LLM request gateway core (orchestration engine only; no HTTP surface — spec §1)"
)]
pub struct CliArgs {
    /// `provider` or `credential` — secondary candidate sort key once
    /// cache-affinity has been applied (spec §4.2 step 6).
    #[arg(long, env = "RELAY_PRIORITY_MODE")]
    pub priority_mode: Option<PriorityModeArg>,

    /// `memory` is the only backend this workspace ships (spec §1: a real
    /// distributed store is an external storage-layer choice).
    #[arg(long, env = "RELAY_CONCURRENCY_BACKEND")]
    pub concurrency_backend: Option<ConcurrencyBackendArg>,

    /// Seed a single-provider demo catalog and run one request through the
    /// Fallback Orchestrator against it, printing the outcome, then exit.
    #[arg(long, env = "RELAY_DEMO_BASE_URL")]
    pub demo_base_url: Option<String>,

    /// Secret used for the seeded demo credential; never logged.
    #[arg(long, env = "RELAY_DEMO_SECRET", default_value = "sk-demo-placeholder")]
    pub demo_secret: String,

    #[arg(long, env = "RELAY_LOG", default_value = "info")]
    pub log_filter: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum PriorityModeArg {
    Provider,
    Credential,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ConcurrencyBackendArg {
    Auto,
    Redis,
    Memory,
}

/// Every dependency-injected value the Fallback Orchestrator's dispatch loop
/// needs, constructed once and handed to `main` (spec §9 design note: no
/// global singletons / `OnceCell` statics).
pub struct GatewayServices {
    pub catalog: Arc<CatalogStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub usage_ledger: Arc<InMemoryUsageLedger>,
    pub records: Arc<InMemoryCandidateRecordStore>,
    pub demo_fixture: Option<DemoFixture>,
    _model_resolver_invalidation_task: tokio::task::JoinHandle<()>,
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<GatewayServices> {
    let mut patch = GatewayConfigPatch::default();
    if let Some(mode) = args.priority_mode {
        patch.priority_mode = Some(match mode {
            PriorityModeArg::Provider => PriorityMode::Provider,
            PriorityModeArg::Credential => PriorityMode::Credential,
        });
    }
    if let Some(backend) = args.concurrency_backend {
        patch.concurrency_backend = Some(match backend {
            ConcurrencyBackendArg::Auto => GatewayConcurrencyBackend::Auto,
            ConcurrencyBackendArg::Redis => GatewayConcurrencyBackend::Redis,
            ConcurrencyBackendArg::Memory => GatewayConcurrencyBackend::Memory,
        });
    }
    let config: GatewayConfig = patch.into_config().context("finalize gateway config")?;

    let catalog = Arc::new(CatalogStore::new());

    let demo_fixture = args
        .demo_base_url
        .as_deref()
        .map(|base_url| seed_demo_catalog(&catalog, base_url, &args.demo_secret));

    let metrics = Arc::new(NoopMetrics);

    let model_resolver = Arc::new(ModelResolver::new(
        catalog.clone(),
        Duration::from_secs(config.model_resolver_cache_ttl_secs),
    ));
    let invalidation_task = model_resolver.spawn_invalidation_listener();

    let health = HealthMonitor::new(
        config.health_failure_threshold,
        Duration::from_secs(config.health_cooldown_secs),
        metrics.clone(),
    );

    let affinity = Arc::new(CacheAffinityStore::new());
    let registry = Arc::new(build_registry());

    let candidates = Arc::new(CandidateResolver::new(
        catalog.clone(),
        model_resolver,
        health.clone(),
        affinity.clone(),
        registry.clone(),
        config.priority_mode,
        config.candidate_resolver_max_providers,
    ));

    let slot_store = LocalSlotStore::new();
    let concurrency = Arc::new(ConcurrencyManager::new(
        slot_store,
        config.concurrency_backend,
        config.concurrency_local_fallback_ratio,
        Duration::from_secs(config.concurrency_slot_ttl_secs),
        Duration::from_secs(config.concurrency_hold_warn_threshold_secs),
        metrics.clone(),
    ));

    let adaptive = Arc::new(AdaptiveTuner::new(
        AdaptiveTunerConfig {
            initial: config.adaptive_initial,
            lower_bound: config.adaptive_lower_bound,
            upper_bound: config.adaptive_upper_bound,
            window_size: config.adaptive_window_size,
            window_increase_fraction: config.adaptive_window_increase_fraction,
            window_utilization_threshold: config.adaptive_window_utilization_threshold,
            post_429_cooldown: Duration::from_secs(config.adaptive_post_429_cooldown_secs),
            probe_interval: Duration::from_secs(config.adaptive_probe_interval_secs),
            probe_min_requests: config.adaptive_probe_min_requests,
            probe_utilization_threshold: config.adaptive_probe_utilization_threshold,
            decrease_multiplier: config.adaptive_decrease_multiplier,
            unknown_shrink_multiplier: config.adaptive_unknown_shrink_multiplier,
            history_len: config.adaptive_history_len,
        },
        metrics.clone(),
    ));

    let reservation = Arc::new(FixedReservationPolicy::new(config.concurrency_reservation_ratio));

    let upstream_client = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig {
            proxy: None,
            connect_timeout: Duration::from_secs(config.http_connect_timeout_secs),
            request_timeout: Duration::from_secs(config.http_write_timeout_secs.max(60)),
            stream_idle_timeout: Duration::from_secs(config.stream_data_timeout_secs),
        })
        .context("build upstream HTTP client")?,
    );

    let dispatcher = Arc::new(Dispatcher::new(
        concurrency.clone(),
        reservation,
        upstream_client,
        registry.clone(),
        adaptive.clone(),
    ));

    let stream_processor = Arc::new(StreamProcessor::new(registry));

    let stream_config = StreamConfig {
        prefetch_frames: config.stream_prefetch_frames,
        empty_chunk_threshold: config.stream_empty_chunk_threshold,
        data_timeout: Duration::from_secs(config.stream_data_timeout_secs),
        disconnect_poll_interval: Duration::from_millis(config.stream_disconnect_poll_ms),
        telemetry_delay: Duration::from_millis(config.stream_telemetry_delay_ms),
    };

    let records = Arc::new(InMemoryCandidateRecordStore::new(
        config.ledger_batch_max_size,
        Duration::from_millis(config.ledger_batch_flush_interval_ms),
    ));
    let usage_ledger = Arc::new(InMemoryUsageLedger::new(
        config.ledger_batch_max_size,
        Duration::from_millis(config.ledger_batch_flush_interval_ms),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        catalog.clone(),
        candidates,
        dispatcher,
        concurrency,
        stream_processor,
        stream_config,
        affinity,
        health,
        adaptive,
        records.clone(),
        usage_ledger.clone(),
    ));

    Ok(GatewayServices {
        catalog,
        orchestrator,
        usage_ledger,
        records,
        demo_fixture,
        _model_resolver_invalidation_task: invalidation_task,
    })
}
