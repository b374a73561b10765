//! Usage Recorder (spec §4.12): consumes the final outcome of one request
//! (success with usage/cost, or failure with a classified error) plus a
//! metadata snapshot, and writes one ledger row. The real ledger backend is
//! out of scope (spec §1); the trait here is the seam, with an in-memory
//! reference sink (batched via [`crate::batch`]) used by this workspace's
//! own tests and the demo binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_common::{CallerId, CredentialId, EndpointId, GlobalModelId, ProviderId};
use relay_protocol::{ClientFormat, Usage};
use tokio::sync::Mutex;

use crate::batch::{BatchCommitter, BatchSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Success,
    Failed,
}

/// One ledger row (spec §4.12's "request metadata... writes one ledger
/// row"). On failure paths without any upstream contact, provider/endpoint/
/// credential are `None` ("provider metadata is unknown") but a row is
/// still written.
#[derive(Debug, Clone)]
pub struct UsageLedgerRow {
    pub trace_id: String,
    pub caller_id: CallerId,
    pub client_format: ClientFormat,
    pub requested_model: String,
    pub global_model_id: Option<GlobalModelId>,
    pub provider_id: Option<ProviderId>,
    pub endpoint_id: Option<EndpointId>,
    pub credential_id: Option<CredentialId>,
    pub status: UsageStatus,
    pub status_code: Option<u16>,
    pub error_type: Option<String>,
    pub usage: Usage,
    pub ttfb_ms: Option<u64>,
    pub total_time_ms: u64,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record(&self, row: UsageLedgerRow);
}

/// The in-memory reference ledger (SPEC_FULL §C: "implemented... for tests
/// and demos"). Lives here rather than in `relay-catalog` because a ledger
/// row references core-owned concepts (`UsageStatus`) that `relay-catalog`
/// cannot depend on without an inverted crate dependency — see DESIGN.md.
pub struct InMemoryUsageLedger {
    rows: Arc<Mutex<Vec<UsageLedgerRow>>>,
    committer: BatchCommitter<UsageLedgerRow>,
}

struct RowSink(Arc<Mutex<Vec<UsageLedgerRow>>>);

#[async_trait]
impl BatchSink<UsageLedgerRow> for RowSink {
    async fn flush(&self, items: Vec<UsageLedgerRow>) {
        self.0.lock().await.extend(items);
    }
}

impl InMemoryUsageLedger {
    pub fn new(batch_max_size: usize, flush_interval: Duration) -> Self {
        let rows = Arc::new(Mutex::new(Vec::new()));
        let committer = BatchCommitter::spawn(Arc::new(RowSink(rows.clone())), batch_max_size, flush_interval);
        Self { rows, committer }
    }

    pub async fn rows(&self) -> Vec<UsageLedgerRow> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn record(&self, row: UsageLedgerRow) {
        self.committer.submit(row).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> UsageLedgerRow {
        UsageLedgerRow {
            trace_id: "t1".into(),
            caller_id: CallerId::new(),
            client_format: ClientFormat::OpenAiChat,
            requested_model: "gpt-4o-mini".into(),
            global_model_id: None,
            provider_id: None,
            endpoint_id: None,
            credential_id: None,
            status: UsageStatus::Failed,
            status_code: None,
            error_type: Some("model_unsupported".into()),
            usage: Usage::default(),
            ttfb_ms: None,
            total_time_ms: 5,
        }
    }

    #[tokio::test]
    async fn a_failure_without_upstream_contact_still_writes_a_row() {
        let ledger = InMemoryUsageLedger::new(50, Duration::from_millis(10));
        ledger.record(row()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let rows = ledger.rows().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].provider_id.is_none());
        assert_eq!(rows[0].status, UsageStatus::Failed);
    }
}
