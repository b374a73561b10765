//! HTTP transport to upstream providers (spec §4.8 Request Dispatcher's
//! "send the request" step). Grounded directly in the teacher's
//! `gproxy-core::upstream_client` module: a small trait boundary over the
//! concrete `wreq` client so the Dispatcher and its tests can swap in a
//! fake, plus per-proxy client caching and the same stream-vs-buffered
//! response split.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use relay_common::Headers;
use wreq::{Client, Method, Proxy};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

/// Either the full body (non-stream, or a non-2xx status we always buffer to
/// extract an error message from) or a channel of chunks as they arrive
/// (spec §4.9 "producer" side).
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, DispatchError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// One `wreq::Client` per distinct proxy string, built lazily and cached;
/// almost every deployment runs with a single (or no) proxy, so this stays a
/// tiny map rather than a pool.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    clients: Arc<Mutex<HashMap<Option<String>, Client>>>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let client = build_client(&config, proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(proxy, client);
        Ok(Self {
            config,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn client_for_proxy(&self, proxy: Option<String>) -> Result<Client, DispatchError> {
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| DispatchError::Transport("upstream client cache lock poisoned".into()))?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref())
            .map_err(|e| DispatchError::Transport(format!("building upstream client: {e}")))?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(config: &UpstreamClientConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, DispatchError>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client_for_proxy(normalize_proxy(self.config.proxy.clone()))?;
            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
            };
            let mut builder = client.request(method, &req.url);
            for (k, v) in &req.headers {
                builder = builder.header(k, v);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }
            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, self.config.stream_idle_timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamHttpResponse, DispatchError> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let item = match next {
                Ok(item) => item,
                Err(_) => break,
            };
            let Some(item) = item else { break };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(_) => break,
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (k, v) in map {
        if let Ok(s) = v.to_str() {
            out.push((k.as_str().to_string(), s.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> DispatchError {
    let kind = classify_wreq_error(&err);
    DispatchError::Transport(format!("{kind}: {err}"))
}

/// A short tag describing the transport failure shape, folded into
/// `DispatchError::Transport`'s message for logging (spec §4.8 doesn't
/// distinguish transport sub-kinds for retry purposes — every transport
/// error gets the same CONTINUE/BREAK treatment in [`crate::error::classify`]).
fn classify_wreq_error(err: &wreq::Error) -> &'static str {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return "read_timeout";
        }
        return "timeout";
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return "dns";
        }
        if message.contains("tls") || message.contains("ssl") {
            return "tls";
        }
        return "connect";
    }
    if err.is_connection_reset() {
        return "connect";
    }
    if message.contains("tls") || message.contains("ssl") {
        return "tls";
    }
    "other"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_normalization_treats_blank_as_none() {
        assert_eq!(normalize_proxy(Some("  ".into())), None);
        assert_eq!(normalize_proxy(Some(" http://p:8080 ".into())), Some("http://p:8080".into()));
        assert_eq!(normalize_proxy(None), None);
    }
}
