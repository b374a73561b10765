//! Thin binary entry point. This crate carries no HTTP surface of its own
//! (spec §1: request parsing/routing, admin CRUD, and the user/auth/quota
//! data model are external collaborators) — it bootstraps the orchestration
//! engine and, when `--demo-base-url` is supplied, drives one request
//! through it end to end so the wiring can be exercised without a real
//! caller-facing adapter in front of it.

mod bootstrap;
mod seed;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_core::{NeverDisconnects, OrchestratorRequest, RequiredCapabilities};
use relay_protocol::ClientFormat;
use tracing_subscriber::EnvFilter;

use bootstrap::CliArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let has_demo = args.demo_base_url.is_some();
    let services = bootstrap::bootstrap(args).await.context("bootstrap gateway services")?;

    if !has_demo {
        tracing::info!("gateway core initialized with an empty catalog; pass --demo-base-url to drive a sample request");
        return Ok(());
    }

    let fixture = services
        .demo_fixture
        .as_ref()
        .expect("demo_fixture is set whenever --demo-base-url was supplied");

    tracing::info!(
        model = %fixture.canonical_name,
        global_model_id = %fixture.global_model_id,
        "seeded demo catalog; dispatching one request"
    );

    let request = OrchestratorRequest {
        trace_id: relay_common::new_trace_id(),
        caller_id: relay_common::CallerId::new(),
        client_format: ClientFormat::OpenAiChat,
        requested_model: fixture.canonical_name.clone(),
        wants_stream: false,
        required_capabilities: RequiredCapabilities::default(),
        body: serde_json::json!({
            "model": fixture.canonical_name,
            "messages": [{"role": "user", "content": "hi"}],
        }),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
    };

    match services
        .orchestrator
        .handle(request, None, Arc::new(NeverDisconnects))
        .await
    {
        Ok(success) => {
            tracing::info!(status = success.status_code, "demo request succeeded");
        }
        Err(err) => {
            tracing::warn!(error = %err, "demo request failed (expected unless --demo-base-url points at a real upstream)");
        }
    }

    for row in services.usage_ledger.rows().await {
        tracing::info!(status = ?row.status, status_code = ?row.status_code, "usage ledger row");
    }
    tracing::info!(catalog_providers = services.catalog.snapshot().providers.len(), "done");

    Ok(())
}
