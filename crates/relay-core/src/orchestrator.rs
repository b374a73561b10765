//! Fallback Orchestrator (spec §4.11): the top-level loop tying every other
//! component together. Grounded in the teacher's `gproxy-core::dispatch_loop`
//! (the outer `for candidate in candidates` / inner retry loop over a
//! classified-error control tri-state), generalized to this crate's own
//! [`crate::error::ErrorAction`] Continue/Break/Raise taxonomy and extended
//! to own the whole request lifecycle end-to-end, since apps/relay-gateway
//! has no HTTP surface of its own to drive it from the outside (DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_catalog::CatalogStore;
use relay_common::{CallerId, Headers};
use relay_protocol::{ClientFormat, Usage, WireFormat};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::adaptive::AdaptiveTuner;
use crate::affinity::{AffinityPin, CacheAffinityStore};
use crate::candidate::{Candidate, CandidateResolver, RequiredCapabilities};
use crate::candidate_record::{CandidateRecord, CandidateRecordSink, CandidateRecordStatus};
use crate::concurrency::ConcurrencyManager;
use crate::context::RequestCtx;
use crate::dispatcher::Dispatcher;
use crate::error::{self, DispatchError, ErrorAction, GatewayError, RateLimitKind, UpstreamText};
use crate::health::HealthMonitor;
use crate::rate_limit::{self, VendorHint};
use crate::stream::{DisconnectWatcher, StreamConfig, StreamEndReason, StreamProcessor, synthesized_error};
use crate::upstream_client::UpstreamBody;
use crate::usage::{UsageLedger, UsageLedgerRow, UsageStatus};

pub struct OrchestratorRequest {
    pub trace_id: String,
    pub caller_id: CallerId,
    pub client_format: ClientFormat,
    pub requested_model: String,
    pub wants_stream: bool,
    pub required_capabilities: RequiredCapabilities,
    pub body: Value,
    pub headers: Headers,
}

/// What became of a successful dispatch (spec §4.11 "return result").
pub enum OrchestratorBody {
    /// A non-streaming response; the caller already has the full body.
    Complete(Bytes),
    /// A streaming response already fully drained into the `out_tx`
    /// channel the caller supplied to [`Orchestrator::handle`].
    Streamed,
}

pub struct OrchestratorSuccess {
    pub status_code: u16,
    pub body: OrchestratorBody,
}

fn vendor_hint(format: WireFormat) -> VendorHint {
    match format {
        WireFormat::Anthropic => VendorHint::Anthropic,
        WireFormat::OpenAiChat | WireFormat::OpenAiResponses => VendorHint::OpenAi,
        WireFormat::Gemini => VendorHint::Generic,
    }
}

/// `(error_type tag, user-visible text)` for a [`DispatchError`] (spec
/// §4.11 "update record (failed/skipped) with cause").
fn describe(error: &DispatchError) -> (String, UpstreamText) {
    match error {
        DispatchError::ConcurrencyLimit => ("concurrency_limit".to_string(), UpstreamText::new("no concurrency slot available")),
        DispatchError::UpstreamHttp { status, text, .. } => (format!("http_{status}"), text.clone()),
        DispatchError::Transport(msg) => ("transport".to_string(), UpstreamText::new(msg.clone())),
        DispatchError::EmbeddedError(text) => ("embedded_error".to_string(), text.clone()),
        DispatchError::ClientRequest(text) => ("client_request".to_string(), text.clone()),
    }
}

fn required_capabilities_snapshot(required: &RequiredCapabilities) -> Vec<String> {
    let mut out: Vec<String> = required.required.iter().cloned().collect();
    out.extend(required.forbidden.iter().map(|tag| format!("-{tag}")));
    out.sort();
    out
}

pub struct Orchestrator {
    catalog: Arc<CatalogStore>,
    candidates: Arc<CandidateResolver>,
    dispatcher: Arc<Dispatcher>,
    concurrency: Arc<ConcurrencyManager>,
    stream_processor: Arc<StreamProcessor>,
    stream_config: StreamConfig,
    affinity: Arc<CacheAffinityStore>,
    health: Arc<HealthMonitor>,
    adaptive: Arc<AdaptiveTuner>,
    records: Arc<dyn CandidateRecordSink>,
    usage: Arc<dyn UsageLedger>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<CatalogStore>,
        candidates: Arc<CandidateResolver>,
        dispatcher: Arc<Dispatcher>,
        concurrency: Arc<ConcurrencyManager>,
        stream_processor: Arc<StreamProcessor>,
        stream_config: StreamConfig,
        affinity: Arc<CacheAffinityStore>,
        health: Arc<HealthMonitor>,
        adaptive: Arc<AdaptiveTuner>,
        records: Arc<dyn CandidateRecordSink>,
        usage: Arc<dyn UsageLedger>,
    ) -> Self {
        Self {
            catalog,
            candidates,
            dispatcher,
            concurrency,
            stream_processor,
            stream_config,
            affinity,
            health,
            adaptive,
            records,
            usage,
        }
    }

    /// Runs one request to completion (spec §4.11's pseudocode). `out_tx`
    /// must be `Some` when `req.wants_stream`; the Stream Processor forwards
    /// directly into it rather than buffering the whole body.
    pub async fn handle(
        &self,
        req: OrchestratorRequest,
        out_tx: Option<mpsc::Sender<Bytes>>,
        disconnect: Arc<dyn DisconnectWatcher>,
    ) -> Result<OrchestratorSuccess, GatewayError> {
        let start = Instant::now();
        let mut ctx = RequestCtx::new(req.trace_id.clone(), req.caller_id, req.client_format);

        let list = match self
            .candidates
            .resolve(req.client_format, &req.requested_model, req.caller_id, req.wants_stream, &req.required_capabilities)
            .await
        {
            Ok(list) => list,
            Err(unsupported) => {
                self.write_unresolved_failure(&req, "model_unsupported", Some(unsupported.requested.clone())).await;
                return Err(GatewayError::ModelUnsupported {
                    requested: unsupported.requested,
                    similar: unsupported.similar,
                });
            }
        };

        let capability_snapshot = required_capabilities_snapshot(&req.required_capabilities);
        let mut last_error: Option<UpstreamText> = None;

        for candidate in &list.candidates {
            if candidate.is_skipped {
                let mut record = CandidateRecord::available(
                    req.trace_id.clone(),
                    candidate.provider.id,
                    candidate.endpoint.id,
                    candidate.credential.id,
                    capability_snapshot.clone(),
                );
                record.status = CandidateRecordStatus::Skipped;
                record.error_type = candidate.skip_reason.clone();
                self.records.upsert(record).await;
                continue;
            }

            let max_retries_here = if candidate.is_cached { candidate.endpoint.max_retries.max(1) } else { 1 };

            for retry in 0..max_retries_here {
                let has_retry_left = retry < max_retries_here - 1;

                let Some(provider_model_name) = self
                    .catalog
                    .snapshot()
                    .model_for(candidate.provider.id, list.global_model_id)
                    .map(|model| model.provider_model_name.clone())
                else {
                    // Candidate Resolver only emits candidates whose
                    // provider owns a Model row for this GlobalModel; a
                    // miss here means the catalog changed mid-request.
                    last_error = Some(UpstreamText::new("provider model mapping disappeared mid-request"));
                    break;
                };

                let attempt_no = ctx.next_attempt();
                let mut record = CandidateRecord::available(
                    req.trace_id.clone(),
                    candidate.provider.id,
                    candidate.endpoint.id,
                    candidate.credential.id,
                    capability_snapshot.clone(),
                );
                record.status = CandidateRecordStatus::Pending;
                record.extra.insert("attempt_no".to_string(), Value::from(attempt_no));
                let record_id = record.id;
                self.records.upsert(record).await;

                let attempt_started = Instant::now();
                let dispatch_result = self
                    .dispatcher
                    .dispatch(
                        &ctx,
                        &candidate.endpoint,
                        &candidate.credential,
                        &provider_model_name,
                        candidate.is_cached,
                        req.body.clone(),
                        &req.headers,
                        req.wants_stream,
                    )
                    .await;

                match dispatch_result {
                    Ok((guard, response)) => {
                        let status_code = response.status;
                        self.on_candidate_success(candidate, &req, &list, status_code).await;

                        let result = match response.body {
                            UpstreamBody::Bytes(bytes) => {
                                self.concurrency.release(guard, false).await;
                                let usage = decode_usage(candidate.endpoint.api_format, &bytes);
                                self.finish_record(record_id, req.trace_id.clone(), candidate, capability_snapshot.clone(), CandidateRecordStatus::Success, Some(status_code), attempt_started, None, None)
                                    .await;
                                self.write_success_row(&req, candidate, &list, status_code, usage, None, start.elapsed().as_millis() as u64)
                                    .await;
                                OrchestratorBody::Complete(bytes)
                            }
                            UpstreamBody::Stream(rx) => {
                                self.finish_record(record_id, req.trace_id.clone(), candidate, capability_snapshot.clone(), CandidateRecordStatus::Streaming, Some(status_code), attempt_started, None, None)
                                    .await;
                                let Some(out_tx) = out_tx else {
                                    self.concurrency.release(guard, true).await;
                                    return Err(GatewayError::Internal("stream candidate dispatched with no output channel".to_string()));
                                };
                                let outcome = self
                                    .stream_processor
                                    .process(rx, out_tx, candidate.endpoint.api_format, req.client_format, disconnect.clone(), &self.stream_config)
                                    .await
                                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
                                let exception = !matches!(outcome.end_reason, StreamEndReason::Success);
                                self.concurrency.release(guard, exception).await;
                                let final_status = if exception { CandidateRecordStatus::Failed } else { CandidateRecordStatus::Success };
                                let error_text = synthesized_error(outcome.end_reason);
                                self.finish_record(
                                    record_id,
                                    req.trace_id.clone(),
                                    candidate,
                                    capability_snapshot.clone(),
                                    final_status,
                                    Some(status_code),
                                    attempt_started,
                                    error_text.as_ref().map(|t| "stream_terminated".to_string()),
                                    error_text.as_ref().map(|t| t.message.clone()),
                                )
                                .await;
                                self.write_success_row(&req, candidate, &list, status_code, outcome.usage, outcome.ttfb_ms, start.elapsed().as_millis() as u64)
                                    .await;
                                OrchestratorBody::Streamed
                            }
                        };
                        return Ok(OrchestratorSuccess { status_code, body: result });
                    }
                    Err(dispatch_error) => {
                        let rate_limit_kind = self.classify_rate_limit(&dispatch_error, candidate).await;
                        let classified = error::classify(&dispatch_error, has_retry_left, rate_limit_kind);

                        if classified.effects.invalidate_cache_affinity {
                            self.affinity
                                .invalidate(req.caller_id, req.client_format, list.global_model_id, candidate.endpoint.id, candidate.credential.id)
                                .await;
                        }
                        if classified.effects.record_health_failure {
                            self.health.record_failure(candidate.credential.id).await;
                        }
                        if let Some(RateLimitKind::Concurrency) = classified.rate_limit_kind {
                            let observed = self.concurrency.current_credential_count(candidate.credential.id).await;
                            self.adaptive.record_429(candidate.credential.id, RateLimitKind::Concurrency, Some(observed)).await;
                        }

                        let (error_type, text) = describe(&dispatch_error);
                        let final_status = if matches!(classified.action, ErrorAction::Break) {
                            CandidateRecordStatus::Skipped
                        } else {
                            CandidateRecordStatus::Failed
                        };
                        self.finish_record(record_id, req.trace_id.clone(), candidate, capability_snapshot.clone(), final_status, dispatch_status_code(&dispatch_error), attempt_started, Some(error_type.clone()), Some(text.message.clone()))
                            .await;
                        last_error = Some(text);

                        match classified.action {
                            ErrorAction::Continue => continue,
                            ErrorAction::Break => break,
                            ErrorAction::Raise => {
                                self.write_failure_row(&req, Some(candidate), &error_type, dispatch_status_code(&dispatch_error), start.elapsed().as_millis() as u64)
                                    .await;
                                return Err(match dispatch_error {
                                    DispatchError::ClientRequest(text) => GatewayError::ClientRequestError(text),
                                    other => GatewayError::Internal(other.to_string()),
                                });
                            }
                        }
                    }
                }
            }
        }

        self.write_failure_row(&req, None, "all_candidates_failed", None, start.elapsed().as_millis() as u64).await;
        Err(GatewayError::AllCandidatesFailed { last: last_error })
    }

    async fn on_candidate_success(&self, candidate: &Candidate, req: &OrchestratorRequest, list: &crate::candidate::CandidateList, _status_code: u16) {
        self.health.record_success(candidate.credential.id).await;
        let in_flight = self.concurrency.current_credential_count(candidate.credential.id).await;
        self.adaptive.record_success(candidate.credential.id, in_flight).await;
        if candidate.credential.cache_ttl_minutes > 0 {
            self.affinity
                .set(
                    req.caller_id,
                    req.client_format,
                    list.global_model_id,
                    AffinityPin { endpoint_id: candidate.endpoint.id, credential_id: candidate.credential.id },
                    candidate.credential.cache_ttl_minutes as u64 * 60,
                )
                .await;
        }
    }

    async fn classify_rate_limit(&self, error: &DispatchError, candidate: &Candidate) -> Option<RateLimitKind> {
        let DispatchError::UpstreamHttp { status: 429, headers, .. } = error else {
            return None;
        };
        let in_flight = self.concurrency.current_credential_count(candidate.credential.id).await;
        Some(rate_limit::classify(headers, vendor_hint(candidate.endpoint.api_format), Some(in_flight)).kind)
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_record(
        &self,
        record_id: uuid::Uuid,
        trace_id: String,
        candidate: &Candidate,
        capability_snapshot: Vec<String>,
        status: CandidateRecordStatus,
        status_code: Option<u16>,
        attempt_started: Instant,
        error_type: Option<String>,
        error_message: Option<String>,
    ) {
        let mut record = CandidateRecord::available(trace_id, candidate.provider.id, candidate.endpoint.id, candidate.credential.id, capability_snapshot);
        record.id = record_id;
        record.status = status;
        record.status_code = status_code;
        record.latency_ms = Some(attempt_started.elapsed().as_millis() as u64);
        record.error_type = error_type;
        record.error_message = error_message;
        self.records.upsert(record).await;
    }

    async fn write_success_row(
        &self,
        req: &OrchestratorRequest,
        candidate: &Candidate,
        list: &crate::candidate::CandidateList,
        status_code: u16,
        usage: Usage,
        ttfb_ms: Option<u64>,
        total_time_ms: u64,
    ) {
        self.usage
            .record(UsageLedgerRow {
                trace_id: req.trace_id.clone(),
                caller_id: req.caller_id,
                client_format: req.client_format,
                requested_model: req.requested_model.clone(),
                global_model_id: Some(list.global_model_id),
                provider_id: Some(candidate.provider.id),
                endpoint_id: Some(candidate.endpoint.id),
                credential_id: Some(candidate.credential.id),
                status: UsageStatus::Success,
                status_code: Some(status_code),
                error_type: None,
                usage,
                ttfb_ms,
                total_time_ms,
            })
            .await;
    }

    async fn write_failure_row(&self, req: &OrchestratorRequest, candidate: Option<&Candidate>, error_type: &str, status_code: Option<u16>, total_time_ms: u64) {
        self.usage
            .record(UsageLedgerRow {
                trace_id: req.trace_id.clone(),
                caller_id: req.caller_id,
                client_format: req.client_format,
                requested_model: req.requested_model.clone(),
                global_model_id: None,
                provider_id: candidate.map(|c| c.provider.id),
                endpoint_id: candidate.map(|c| c.endpoint.id),
                credential_id: candidate.map(|c| c.credential.id),
                status: UsageStatus::Failed,
                status_code,
                error_type: Some(error_type.to_string()),
                usage: Usage::default(),
                ttfb_ms: None,
                total_time_ms,
            })
            .await;
    }

    /// A failure before any candidate could even be resolved (spec §4.12
    /// "on failure paths without any upstream contact, provider metadata is
    /// unknown but a ledger row is still written").
    async fn write_unresolved_failure(&self, req: &OrchestratorRequest, error_type: &str, _detail: Option<String>) {
        self.usage
            .record(UsageLedgerRow {
                trace_id: req.trace_id.clone(),
                caller_id: req.caller_id,
                client_format: req.client_format,
                requested_model: req.requested_model.clone(),
                global_model_id: None,
                provider_id: None,
                endpoint_id: None,
                credential_id: None,
                status: UsageStatus::Failed,
                status_code: None,
                error_type: Some(error_type.to_string()),
                usage: Usage::default(),
                ttfb_ms: None,
                total_time_ms: 0,
            })
            .await;
    }
}

fn dispatch_status_code(error: &DispatchError) -> Option<u16> {
    match error {
        DispatchError::UpstreamHttp { status, .. } => Some(*status),
        _ => None,
    }
}

/// Best-effort usage extraction for a non-streaming success (spec §4.12
/// "response metadata, TTFB, total time"). A decode failure is not fatal to
/// the request — the caller already has their response body — so this
/// degrades to `Usage::default()` rather than erroring the whole attempt.
fn decode_usage(upstream_format: WireFormat, body: &Bytes) -> Usage {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return Usage::default();
    };
    relay_transform::decode_response(upstream_format, value)
        .map(|exchange| exchange.usage)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::CacheAffinityStore;
    use crate::candidate::CandidateResolver;
    use crate::candidate_record::InMemoryCandidateRecordStore;
    use crate::health::HealthMonitor;
    use crate::metrics::NoopMetrics;
    use crate::adaptive::{AdaptiveTuner, AdaptiveTunerConfig};
    use crate::concurrency::slot_store::LocalSlotStore;
    use crate::reservation::FixedReservationPolicy;
    use crate::upstream_client::{HttpMethod, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse};
    use crate::usage::InMemoryUsageLedger;
    use crate::stream::NeverDisconnects;
    use relay_catalog::secret::Secret;
    use relay_catalog::{Credential, Endpoint, GlobalModel, Model, Provider};
    use relay_common::{ConcurrencyBackend, CredentialId, EndpointId, GlobalModelId, PriorityMode, ProviderId};
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A fake upstream that fails its first N calls, then succeeds — used
    /// to exercise spec §8 Scenario 2 (primary fails, backup succeeds).
    struct ScriptedUpstream {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl UpstreamClient for ScriptedUpstream {
        fn send<'a>(&'a self, _req: UpstreamHttpRequest) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, DispatchError>> + Send + 'a>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.fail_first {
                    Ok(UpstreamHttpResponse {
                        status: 500,
                        headers: vec![],
                        body: UpstreamBody::Bytes(Bytes::from_static(br#"{"error": {"type": "server_error", "message": "boom"}}"#)),
                    })
                } else {
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        headers: vec![],
                        body: UpstreamBody::Bytes(Bytes::from_static(
                            br#"{"id": "msg_1", "model": "claude-3-opus", "content": [{"type": "text", "text": "hi"}], "stop_reason": "end_turn", "usage": {"input_tokens": 10, "output_tokens": 5}}"#,
                        )),
                    })
                }
            })
        }
    }

    fn provider(priority: i32) -> Provider {
        Provider { id: ProviderId::new(), name: "test".to_string(), priority, active: true }
    }

    fn endpoint(provider_id: ProviderId) -> Endpoint {
        Endpoint {
            id: EndpointId::new(),
            provider_id,
            base_url: "https://api.example.com".to_string(),
            api_format: WireFormat::Anthropic,
            custom_path: None,
            additional_headers: vec![],
            timeout_secs: 30,
            max_retries: 1,
            max_concurrent: None,
            supports_streaming: true,
            active: true,
        }
    }

    fn credential(endpoint_id: EndpointId, priority: i32) -> Credential {
        Credential {
            id: CredentialId::new(),
            endpoint_id,
            secret: Secret::new("sk-test"),
            internal_priority: priority,
            max_concurrent: Some(10),
            cache_ttl_minutes: 5,
            declared_capabilities: HashSet::new(),
            active: true,
        }
    }

    fn build_orchestrator(upstream: Arc<dyn UpstreamClient>) -> (Orchestrator, GlobalModelId) {
        let catalog = Arc::new(CatalogStore::new());
        let global_model = GlobalModel {
            id: GlobalModelId::new(),
            canonical_name: "claude-3-opus".to_string(),
            display_name: "claude-3-opus".to_string(),
            capability_tags: HashSet::new(),
            active: true,
        };
        catalog.upsert_global_model(global_model.clone());

        let primary_provider = provider(0);
        let primary_endpoint = endpoint(primary_provider.id);
        let primary_credential = credential(primary_endpoint.id, 0);
        catalog.upsert_provider(primary_provider.clone());
        catalog.upsert_endpoint(primary_endpoint.clone());
        catalog.upsert_credential(primary_credential.clone());
        catalog.upsert_model(Model {
            id: uuid::Uuid::now_v7(),
            provider_id: primary_provider.id,
            global_model_id: global_model.id,
            provider_model_name: "claude-3-opus-primary".to_string(),
            capability_overrides: None,
            active: true,
        });

        let backup_provider = provider(1);
        let backup_endpoint = endpoint(backup_provider.id);
        let backup_credential = credential(backup_endpoint.id, 0);
        catalog.upsert_provider(backup_provider.clone());
        catalog.upsert_endpoint(backup_endpoint.clone());
        catalog.upsert_credential(backup_credential.clone());
        catalog.upsert_model(Model {
            id: uuid::Uuid::now_v7(),
            provider_id: backup_provider.id,
            global_model_id: global_model.id,
            provider_model_name: "claude-3-opus-backup".to_string(),
            capability_overrides: None,
            active: true,
        });

        let registry = Arc::new(relay_transform::build_registry());
        let health = HealthMonitor::new(100, Duration::from_secs(60), Arc::new(NoopMetrics));
        let affinity = Arc::new(CacheAffinityStore::new());
        let candidates = Arc::new(CandidateResolver::new(catalog.clone(), Arc::new(crate::model_resolver::ModelResolver::new(catalog.clone(), Duration::from_secs(300))), health.clone(), affinity.clone(), registry.clone(), PriorityMode::Provider, 10));
        let concurrency = Arc::new(ConcurrencyManager::new(LocalSlotStore::new(), ConcurrencyBackend::Memory, 1.0, Duration::from_secs(60), Duration::from_secs(60), Arc::new(NoopMetrics)));
        let adaptive = Arc::new(AdaptiveTuner::new(AdaptiveTunerConfig::default(), Arc::new(NoopMetrics)));
        let dispatcher = Arc::new(Dispatcher::new(concurrency.clone(), Arc::new(FixedReservationPolicy::new(0.3)), upstream, registry.clone(), adaptive.clone()));
        let stream_processor = Arc::new(StreamProcessor::new(registry.clone()));
        let records: Arc<dyn CandidateRecordSink> = Arc::new(InMemoryCandidateRecordStore::new(50, Duration::from_millis(10)));
        let usage: Arc<dyn UsageLedger> = Arc::new(InMemoryUsageLedger::new(50, Duration::from_millis(10)));

        let orchestrator = Orchestrator::new(catalog, candidates, dispatcher, concurrency, stream_processor, StreamConfig::default(), affinity, health, adaptive, records, usage);
        (orchestrator, global_model.id)
    }

    fn request() -> OrchestratorRequest {
        OrchestratorRequest {
            trace_id: "t1".to_string(),
            caller_id: CallerId::new(),
            client_format: ClientFormat::Anthropic,
            requested_model: "claude-3-opus".to_string(),
            wants_stream: false,
            required_capabilities: RequiredCapabilities::default(),
            body: serde_json::json!({"model": "claude-3-opus", "messages": []}),
            headers: vec![],
        }
    }

    #[tokio::test]
    async fn primary_failure_falls_back_to_backup_and_succeeds() {
        let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstream { calls: AtomicUsize::new(0), fail_first: 1 });
        let (orchestrator, _model) = build_orchestrator(upstream);
        let result = orchestrator.handle(request(), None, Arc::new(NeverDisconnects)).await;
        let success = result.expect("backup candidate should succeed");
        assert_eq!(success.status_code, 200);
        match success.body {
            OrchestratorBody::Complete(bytes) => assert!(bytes.len() > 0),
            OrchestratorBody::Streamed => panic!("expected a complete body"),
        }
    }

    #[tokio::test]
    async fn every_candidate_failing_surfaces_all_candidates_failed() {
        let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstream { calls: AtomicUsize::new(0), fail_first: 100 });
        let (orchestrator, _model) = build_orchestrator(upstream);
        let result = orchestrator.handle(request(), None, Arc::new(NeverDisconnects)).await;
        assert!(matches!(result, Err(GatewayError::AllCandidatesFailed { .. })));
    }

    #[tokio::test]
    async fn unknown_model_is_reported_without_any_dispatch() {
        let upstream: Arc<dyn UpstreamClient> = Arc::new(ScriptedUpstream { calls: AtomicUsize::new(0), fail_first: 0 });
        let (orchestrator, _model) = build_orchestrator(upstream);
        let mut req = request();
        req.requested_model = "does-not-exist".to_string();
        let result = orchestrator.handle(req, None, Arc::new(NeverDisconnects)).await;
        assert!(matches!(result, Err(GatewayError::ModelUnsupported { .. })));
    }
}
