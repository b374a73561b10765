//! Candidate Record Store (spec §4.13): one row per attempt slot, tracing
//! `available -> pending -> (streaming -> success) | success | failed |
//! skipped` transitions for observability. The real persistence backend is
//! out of scope (spec §1); the in-memory reference sink here (keyed by id,
//! batched via [`crate::batch`]) is what this workspace's own tests use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_common::{CredentialId, EndpointId, ProviderId};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateRecordStatus {
    Available,
    Pending,
    Streaming,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub id: Uuid,
    pub trace_id: String,
    pub provider_id: ProviderId,
    pub endpoint_id: EndpointId,
    pub credential_id: CredentialId,
    pub required_capabilities: Vec<String>,
    pub status: CandidateRecordStatus,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub observed_in_flight: Option<u32>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub extra: HashMap<String, Value>,
}

impl CandidateRecord {
    /// A fresh "available" row for one attempt slot (spec §4.13 "each
    /// attempt slot pre-allocates an available record").
    pub fn available(
        trace_id: String,
        provider_id: ProviderId,
        endpoint_id: EndpointId,
        credential_id: CredentialId,
        required_capabilities: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id,
            provider_id,
            endpoint_id,
            credential_id,
            required_capabilities,
            status: CandidateRecordStatus::Available,
            status_code: None,
            latency_ms: None,
            observed_in_flight: None,
            error_type: None,
            error_message: None,
            extra: HashMap::new(),
        }
    }
}

#[async_trait]
pub trait CandidateRecordSink: Send + Sync {
    async fn upsert(&self, record: CandidateRecord);
}

pub struct InMemoryCandidateRecordStore {
    rows: Arc<Mutex<HashMap<Uuid, CandidateRecord>>>,
    committer: crate::batch::BatchCommitter<CandidateRecord>,
}

struct RecordSink(Arc<Mutex<HashMap<Uuid, CandidateRecord>>>);

#[async_trait]
impl crate::batch::BatchSink<CandidateRecord> for RecordSink {
    async fn flush(&self, items: Vec<CandidateRecord>) {
        let mut rows = self.0.lock().await;
        for item in items {
            rows.insert(item.id, item);
        }
    }
}

impl InMemoryCandidateRecordStore {
    pub fn new(batch_max_size: usize, flush_interval: Duration) -> Self {
        let rows = Arc::new(Mutex::new(HashMap::new()));
        let committer = crate::batch::BatchCommitter::spawn(Arc::new(RecordSink(rows.clone())), batch_max_size, flush_interval);
        Self { rows, committer }
    }

    pub async fn get(&self, id: Uuid) -> Option<CandidateRecord> {
        self.rows.lock().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<CandidateRecord> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl CandidateRecordSink for InMemoryCandidateRecordStore {
    async fn upsert(&self, record: CandidateRecord) {
        self.committer.submit(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_record_updated_twice_keeps_the_latest_status() {
        let store = InMemoryCandidateRecordStore::new(10, Duration::from_millis(10));
        let mut record = CandidateRecord::available("t1".into(), ProviderId::new(), EndpointId::new(), CredentialId::new(), vec![]);
        let id = record.id;
        store.upsert(record.clone()).await;
        record.status = CandidateRecordStatus::Success;
        record.status_code = Some(200);
        store.upsert(record).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, CandidateRecordStatus::Success);
        assert_eq!(stored.status_code, Some(200));
    }
}
