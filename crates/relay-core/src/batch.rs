//! Batch committer (SPEC_FULL §B, grounded in
//! `original_source/src/core/batch_committer.py`): buffers writes and
//! flushes on a size threshold or a short interval rather than writing
//! synchronously per event. Shared by the Usage Recorder and Candidate
//! Record Store, both of which are otherwise plain append/upsert sinks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait BatchSink<T: Send + 'static>: Send + Sync {
    async fn flush(&self, items: Vec<T>);
}

/// A handle to a spawned flush task. Dropping the last `BatchCommitter`
/// closes the channel, which drains and flushes any buffered items before
/// the task exits.
#[derive(Clone)]
pub struct BatchCommitter<T: Send + 'static> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> BatchCommitter<T> {
    pub fn spawn(sink: Arc<dyn BatchSink<T>>, max_batch: usize, flush_interval: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<T>(1024);
        tokio::spawn(async move {
            let mut buf: Vec<T> = Vec::with_capacity(max_batch);
            // A deadline armed only while `buf` is non-empty, not a fixed-schedule
            // ticker: the latter's immediate first tick races the very first
            // `rx.recv()` on an empty buffer and can stall a partial batch for a
            // full `flush_interval` depending on which branch `select!` happens
            // to pick first.
            let deadline = tokio::time::sleep(flush_interval);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    item = rx.recv() => {
                        match item {
                            Some(item) => {
                                if buf.is_empty() {
                                    deadline.as_mut().reset(tokio::time::Instant::now() + flush_interval);
                                }
                                buf.push(item);
                                if buf.len() >= max_batch {
                                    sink.flush(std::mem::take(&mut buf)).await;
                                }
                            }
                            None => {
                                if !buf.is_empty() {
                                    sink.flush(std::mem::take(&mut buf)).await;
                                }
                                return;
                            }
                        }
                    }
                    _ = &mut deadline, if !buf.is_empty() => {
                        sink.flush(std::mem::take(&mut buf)).await;
                    }
                }
            }
        });
        Self { tx }
    }

    /// Enqueues an item for the next flush. Best-effort: if the flush task
    /// has already shut down the item is silently dropped, matching the
    /// fire-and-forget nature of telemetry writes.
    pub async fn submit(&self, item: T) {
        let _ = self.tx.send(item).await;
    }
}
