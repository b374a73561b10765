//! Request Dispatcher (spec §4.8): executes one attempt against one
//! [`crate::candidate::Candidate`] — protocol conversion, model-field and
//! auth-header rewriting, URL composition, then the upstream HTTP call
//! under a held concurrency slot. Grounded in the teacher's
//! `gproxy-core::dispatcher` module, generalized from its single-dialect
//! request builder to the four-format table spec §6 declares.

use std::sync::Arc;

use relay_catalog::{Credential, Endpoint};
use relay_common::{Headers, header_remove, header_set};
use relay_protocol::{ClientFormat, WireFormat};
use relay_transform::ConverterRegistry;
use serde_json::Value;

use crate::adaptive::AdaptiveTuner;
use crate::concurrency::{ConcurrencyManager, SlotGuard};
use crate::context::RequestCtx;
use crate::error::{is_client_error_text, DispatchError, UpstreamText};
use crate::reservation::ReservationPolicy;
use crate::upstream_client::{HttpMethod, UpstreamBody, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse};

/// Hop-by-hop and auth headers stripped from the client's request before
/// forwarding (spec §4.8 step 4: "strip sensitive / hop-by-hop... the
/// vendor's own auth header names"). `anthropic-version` is neither: it's a
/// required protocol-version header the real Anthropic Messages API
/// rejects requests without, so it passes through like any other ordinary
/// header (grounded on the teacher's `apply_anthropic_headers`, which
/// forwards it unconditionally).
const STRIPPED_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "content-length",
    "transfer-encoding",
    "x-api-key",
    "x-goog-api-key",
];

fn default_path(format: WireFormat, model: &str, is_stream: bool) -> String {
    match format {
        WireFormat::Anthropic => "/v1/messages".to_string(),
        WireFormat::OpenAiChat => "/v1/chat/completions".to_string(),
        WireFormat::OpenAiResponses => "/responses".to_string(),
        WireFormat::Gemini => {
            let action = if is_stream { "streamGenerateContent" } else { "generateContent" };
            format!("/v1beta/models/{model}:{action}")
        }
    }
}

/// Interpolates `{model}`/`{action}` into a custom path template (spec §6).
fn interpolate_path(template: &str, model: &str, is_stream: bool) -> String {
    let action = if is_stream { "streamGenerateContent" } else { "generateContent" };
    template.replace("{model}", model).replace("{action}", action)
}

fn compose_url(endpoint: &Endpoint, format: WireFormat, model: &str, is_stream: bool) -> String {
    let path = match &endpoint.custom_path {
        Some(template) => interpolate_path(template, model, is_stream),
        None => default_path(format, model, is_stream),
    };
    let base = endpoint.base_url.trim_end_matches('/');
    let path = if path.starts_with('/') { path } else { format!("/{path}") };
    format!("{base}{path}")
}

/// Rewrites the `model` field of a JSON body to the provider's model name
/// (spec §4.8 step 4). Gemini carries the model in the URL path only, so
/// its body is left untouched (spec §6 URL composition).
fn rewrite_model_field(format: WireFormat, mut body: Value, provider_model_name: &str) -> Value {
    match format {
        WireFormat::Gemini => body,
        WireFormat::Anthropic | WireFormat::OpenAiChat | WireFormat::OpenAiResponses => {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("model".to_string(), Value::String(provider_model_name.to_string()));
            }
            body
        }
    }
}

/// Injects the credential's secret into the format-specific upstream auth
/// header (spec §6 auth table's "Upstream auth scheme" column).
fn inject_auth_header(headers: &mut Headers, format: WireFormat, secret: &str) {
    match format {
        WireFormat::Anthropic => header_set(headers, "x-api-key", secret),
        WireFormat::OpenAiChat | WireFormat::OpenAiResponses => {
            header_set(headers, "Authorization", format!("Bearer {secret}"))
        }
        WireFormat::Gemini => header_set(headers, "x-goog-api-key", secret),
    }
}

/// Builds the headers sent upstream: strip client auth/hop-by-hop headers,
/// inject the credential's own auth, merge the endpoint's configured
/// defaults (spec §4.8 step 4).
fn build_headers(client_headers: &Headers, endpoint: &Endpoint, credential: &Credential, format: WireFormat) -> Headers {
    let mut headers = client_headers.clone();
    for name in STRIPPED_HEADERS {
        header_remove(&mut headers, name);
    }
    inject_auth_header(&mut headers, format, credential.secret.expose());
    for (name, value) in &endpoint.additional_headers {
        header_set(&mut headers, name.clone(), value.clone());
    }
    headers
}

/// Builds a fully-formed upstream request (spec §4.8 step 4). Pure and
/// unit-testable: no concurrency slot, no network call.
pub fn build_upstream_request(
    endpoint: &Endpoint,
    credential: &Credential,
    provider_model_name: &str,
    client_format: ClientFormat,
    registry: &ConverterRegistry,
    body: Value,
    client_headers: &Headers,
    is_stream: bool,
) -> Result<UpstreamHttpRequest, DispatchError> {
    let upstream_format = endpoint.api_format;
    let converted = registry
        .convert_request(client_format.wire(), upstream_format, body)
        .map_err(|e| DispatchError::Transport(format!("request conversion failed: {e}")))?;
    let rewritten = rewrite_model_field(upstream_format, converted, provider_model_name);
    let bytes = serde_json::to_vec(&rewritten)
        .map_err(|e| DispatchError::Transport(format!("serializing upstream body: {e}")))?;

    let headers = build_headers(client_headers, endpoint, credential, upstream_format);
    let url = compose_url(endpoint, upstream_format, provider_model_name, is_stream);

    Ok(UpstreamHttpRequest {
        method: HttpMethod::Post,
        url,
        headers,
        body: Some(bytes.into()),
        is_stream,
    })
}

/// `UpstreamText` extraction from a buffered non-2xx/embedded-error body
/// (spec §4.11 "safely extracted from the response body, truncated"). Most
/// vendor error bodies carry `{"error": {"type": ..., "message": ...}}` or
/// `{"error": {"code": ..., "message": ...}}`; falls back to a short raw
/// sample when the shape doesn't match.
pub fn extract_error_text(body: &[u8]) -> UpstreamText {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return UpstreamText::with_sample("upstream returned a non-JSON error body", String::from_utf8_lossy(body));
    };
    let error = value.get("error").unwrap_or(&value);
    let message = error.get("message").and_then(Value::as_str);
    let kind = error
        .get("type")
        .or_else(|| error.get("code"))
        .and_then(Value::as_str);
    match (kind, message) {
        (Some(kind), Some(message)) => UpstreamText::with_sample(format!("{kind}: {message}"), String::from_utf8_lossy(body)),
        (None, Some(message)) => UpstreamText::with_sample(message.to_string(), String::from_utf8_lossy(body)),
        _ => UpstreamText::with_sample("upstream error", String::from_utf8_lossy(body)),
    }
}

/// Whether a response body looks like an HTML error page rather than the
/// declared format's JSON — a common symptom of a misconfigured base URL
/// (spec §4.9 "looks like HTML").
pub fn looks_like_html(body: &[u8]) -> bool {
    let sample = String::from_utf8_lossy(&body[..body.len().min(256)]).to_ascii_lowercase();
    let trimmed = sample.trim_start();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html")
}

/// Ties the Concurrency Manager, Adaptive Reservation policy, and
/// [`UpstreamClient`] together into one attempt (spec §4.8 steps 2-7).
pub struct Dispatcher {
    concurrency: Arc<ConcurrencyManager>,
    reservation: Arc<dyn ReservationPolicy>,
    client: Arc<dyn UpstreamClient>,
    registry: Arc<ConverterRegistry>,
    adaptive: Arc<AdaptiveTuner>,
}

impl Dispatcher {
    pub fn new(
        concurrency: Arc<ConcurrencyManager>,
        reservation: Arc<dyn ReservationPolicy>,
        client: Arc<dyn UpstreamClient>,
        registry: Arc<ConverterRegistry>,
        adaptive: Arc<AdaptiveTuner>,
    ) -> Self {
        Self { concurrency, reservation, client, registry, adaptive }
    }

    /// Executes one attempt. Returns the held [`SlotGuard`] alongside the
    /// response so the caller (Orchestrator / Stream Processor) can decide
    /// when to release it — a streaming success only releases once the
    /// stream actually closes (spec §4.8 step 7 "release... in a finally
    /// block", deferred until the body is fully drained for streams).
    ///
    /// `ctx` identifies the request and attempt slot this call belongs to
    /// (spec §4.13); only `ctx.client_format` affects dispatch behavior
    /// today, but passing the whole context keeps this call site ready for
    /// the trace-id-tagged logging the Usage Recorder wires up around it.
    pub async fn dispatch(
        &self,
        ctx: &RequestCtx,
        endpoint: &Endpoint,
        credential: &Credential,
        provider_model_name: &str,
        is_cached_caller: bool,
        body: Value,
        client_headers: &Headers,
        is_stream: bool,
    ) -> Result<(SlotGuard, UpstreamHttpResponse), DispatchError> {
        let client_format = ctx.client_format;
        let reservation_ratio = self.reservation.current_ratio();
        // spec §3: "`learned_max_concurrent` is ignored when
        // `Credential.max_concurrent` is non-null" — read the other way,
        // a null `max_concurrent` means the Adaptive Tuner's learned
        // ceiling *is* the effective credential cap (spec §4.4/§4.5).
        let credential_cap = match credential.max_concurrent {
            Some(fixed) => fixed,
            None => self.adaptive.learned_max_concurrent(credential.id).await,
        };
        let guard = self
            .concurrency
            .try_acquire(endpoint.id, endpoint.max_concurrent, credential.id, credential_cap, is_cached_caller, reservation_ratio)
            .await
            .ok_or(DispatchError::ConcurrencyLimit)?;

        let request = match build_upstream_request(endpoint, credential, provider_model_name, client_format, &self.registry, body, client_headers, is_stream) {
            Ok(request) => request,
            Err(error) => {
                self.concurrency.release(guard, true).await;
                return Err(error);
            }
        };

        match self.client.send(request).await {
            Ok(response) => self.classify_response(guard, response).await,
            Err(error) => {
                self.concurrency.release(guard, true).await;
                Err(error)
            }
        }
    }

    async fn classify_response(&self, guard: SlotGuard, response: UpstreamHttpResponse) -> Result<(SlotGuard, UpstreamHttpResponse), DispatchError> {
        if (200..300).contains(&response.status) {
            return Ok((guard, response));
        }

        // Non-2xx is always buffered by `UpstreamClient` (spec §4.9 "buffer
        // to extract an error message"); bytes-vs-stream is decided there.
        let UpstreamBody::Bytes(bytes) = &response.body else {
            self.concurrency.release(guard, true).await;
            return Err(DispatchError::UpstreamHttp {
                status: response.status,
                headers: response.headers,
                text: UpstreamText::new("non-2xx response arrived as a stream"),
            });
        };
        let text = extract_error_text(bytes);
        self.concurrency.release(guard, true).await;

        if response.status == 400 && is_client_error_text(&text.message) {
            return Err(DispatchError::ClientRequest(text));
        }
        Err(DispatchError::UpstreamHttp { status: response.status, headers: response.headers, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::{CredentialId, EndpointId, ProviderId};
    use relay_catalog::secret::Secret;
    use std::collections::HashSet;

    fn endpoint(format: WireFormat, custom_path: Option<&str>) -> Endpoint {
        Endpoint {
            id: EndpointId::new(),
            provider_id: ProviderId::new(),
            base_url: "https://api.example.com/".to_string(),
            api_format: format,
            custom_path: custom_path.map(str::to_string),
            additional_headers: vec![("X-Org".to_string(), "acme".to_string())],
            timeout_secs: 30,
            max_retries: 3,
            max_concurrent: None,
            supports_streaming: true,
            active: true,
        }
    }

    fn credential() -> Credential {
        Credential {
            id: CredentialId::new(),
            endpoint_id: EndpointId::new(),
            secret: Secret::new("sk-test-123"),
            internal_priority: 0,
            max_concurrent: Some(10),
            cache_ttl_minutes: 5,
            declared_capabilities: HashSet::new(),
            active: true,
        }
    }

    #[test]
    fn gemini_url_interpolates_model_and_action() {
        let endpoint = endpoint(WireFormat::Gemini, None);
        let url = compose_url(&endpoint, WireFormat::Gemini, "gemini-1.5-pro", true);
        assert_eq!(url, "https://api.example.com/v1beta/models/gemini-1.5-pro:streamGenerateContent");
    }

    #[test]
    fn custom_path_template_is_interpolated() {
        let endpoint = endpoint(WireFormat::Anthropic, Some("/proxy/{model}/v1/messages"));
        let url = compose_url(&endpoint, WireFormat::Anthropic, "claude-3-opus", false);
        assert_eq!(url, "https://api.example.com/proxy/claude-3-opus/v1/messages");
    }

    #[test]
    fn model_field_is_rewritten_for_json_body_formats_but_not_gemini() {
        let body = serde_json::json!({"model": "client-name", "messages": []});
        let rewritten = rewrite_model_field(WireFormat::OpenAiChat, body.clone(), "gpt-4o-mini");
        assert_eq!(rewritten["model"], "gpt-4o-mini");

        let untouched = rewrite_model_field(WireFormat::Gemini, body, "gemini-1.5-pro");
        assert_eq!(untouched["model"], "client-name");
    }

    #[test]
    fn headers_strip_client_auth_and_inject_credential_secret() {
        let endpoint = endpoint(WireFormat::Anthropic, None);
        let credential = credential();
        let client_headers: Headers = vec![
            ("Authorization".to_string(), "Bearer client-token".to_string()),
            ("Host".to_string(), "gateway.local".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        let headers = build_headers(&client_headers, &endpoint, &credential, WireFormat::Anthropic);
        assert!(relay_common::header_get(&headers, "authorization").is_none());
        assert!(relay_common::header_get(&headers, "host").is_none());
        assert_eq!(relay_common::header_get(&headers, "x-api-key"), Some("sk-test-123"));
        assert_eq!(relay_common::header_get(&headers, "X-Org"), Some("acme"));
    }

    #[test]
    fn openai_auth_uses_bearer_scheme() {
        let mut headers: Headers = vec![];
        inject_auth_header(&mut headers, WireFormat::OpenAiChat, "sk-abc");
        assert_eq!(relay_common::header_get(&headers, "authorization"), Some("Bearer sk-abc"));
    }

    #[test]
    fn extract_error_text_matches_scenario_4_shape() {
        let body = br#"{"error": {"type": "invalid_request_error", "message": "prompt is too long"}}"#;
        let text = extract_error_text(body);
        assert_eq!(text.message, "invalid_request_error: prompt is too long");
    }

    #[test]
    fn html_error_pages_are_detected() {
        assert!(looks_like_html(b"<!DOCTYPE html><html><body>502 Bad Gateway</body></html>"));
        assert!(!looks_like_html(b"{\"error\": \"boom\"}"));
    }

    struct AlwaysOkUpstream;

    impl UpstreamClient for AlwaysOkUpstream {
        fn send<'a>(
            &'a self,
            _req: UpstreamHttpRequest,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<UpstreamHttpResponse, DispatchError>> + Send + 'a>> {
            Box::pin(async move {
                Ok(UpstreamHttpResponse { status: 200, headers: vec![], body: UpstreamBody::Bytes(bytes::Bytes::from_static(b"{}")) })
            })
        }
    }

    /// spec §3: "`learned_max_concurrent` is ignored when
    /// `Credential.max_concurrent` is non-null" implies the converse — a
    /// null `max_concurrent` is governed by the Adaptive Tuner's learned
    /// ceiling, not an unlimited cap.
    #[tokio::test]
    async fn null_max_concurrent_is_capped_by_the_adaptive_tuners_learned_ceiling() {
        use crate::adaptive::{AdaptiveTuner, AdaptiveTunerConfig};
        use crate::concurrency::{slot_store::LocalSlotStore, ConcurrencyManager};
        use crate::metrics::NoopMetrics;
        use crate::reservation::FixedReservationPolicy;
        use relay_common::ConcurrencyBackend;

        let adaptive = Arc::new(AdaptiveTuner::new(
            AdaptiveTunerConfig { initial: 2, ..AdaptiveTunerConfig::default() },
            Arc::new(NoopMetrics),
        ));
        let concurrency = Arc::new(ConcurrencyManager::new(
            LocalSlotStore::new(),
            ConcurrencyBackend::Memory,
            1.0,
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(60),
            Arc::new(NoopMetrics),
        ));
        let registry = Arc::new(relay_transform::build_registry());
        let dispatcher = Dispatcher::new(
            concurrency.clone(),
            Arc::new(FixedReservationPolicy::new(0.0)),
            Arc::new(AlwaysOkUpstream),
            registry,
            adaptive.clone(),
        );

        let endpoint = endpoint(WireFormat::Anthropic, None);
        let mut credential = credential();
        credential.max_concurrent = None; // adaptive mode

        let body = serde_json::json!({"model": "claude-3-opus", "messages": []});
        let ctx = RequestCtx::new("t1".to_string(), relay_common::CallerId::new(), ClientFormat::Anthropic);

        // learned ceiling starts at 2: two dispatches should succeed...
        let (guard1, _) = dispatcher
            .dispatch(&ctx, &endpoint, &credential, "claude-3-opus-upstream", true, body.clone(), &vec![], false)
            .await
            .expect("first dispatch within the learned ceiling should succeed");
        let (guard2, _) = dispatcher
            .dispatch(&ctx, &endpoint, &credential, "claude-3-opus-upstream", true, body.clone(), &vec![], false)
            .await
            .expect("second dispatch within the learned ceiling should succeed");

        // ...and a third, while both slots are still held, must be refused.
        let third = dispatcher
            .dispatch(&ctx, &endpoint, &credential, "claude-3-opus-upstream", true, body.clone(), &vec![], false)
            .await;
        assert!(matches!(third, Err(DispatchError::ConcurrencyLimit)), "adaptive ceiling of 2 should refuse a third concurrent dispatch");

        concurrency.release(guard1, false).await;
        concurrency.release(guard2, false).await;
    }
}
