//! The slot-counting backend behind [`super::ConcurrencyManager`]. Spec §4.4
//! describes a distributed (shared store, atomic CAS + TTL) and a local
//! (in-process, locked) mode selected at construction; this trait is the
//! boundary between them. Only [`LocalSlotStore`] ships in this workspace —
//! the concrete distributed backend (Redis, per
//! `original_source/concurrency_manager.py`) is an external storage-layer
//! choice out of scope (spec §1) — but the trait is exercised by the same
//! tests a real distributed implementation would need to satisfy.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Atomically checks both caps and, if neither would be exceeded,
    /// increments both counters and registers a TTL-bounded lease. Returns
    /// `None` (no effect on either counter) if either cap would be
    /// exceeded — spec §4.4 "if either would be exceeded... refuse."
    async fn try_acquire_pair(
        &self,
        endpoint_key: &str,
        endpoint_cap: Option<u32>,
        credential_key: &str,
        credential_cap: u32,
        ttl: Duration,
    ) -> Option<Uuid>;

    /// Releases a lease acquired via `try_acquire_pair`, decrementing both
    /// counters (never below zero). Releasing an unknown or already-expired
    /// lease is a no-op, since the TTL reaper may have already reclaimed it.
    async fn release(&self, lease_id: Uuid);

    /// Current count for a raw key (`endpoint:{id}` or `credential:{id}`),
    /// used by the Adaptive Tuner to read "current in-flight" and by tests.
    async fn current(&self, key: &str) -> u32;
}

struct Lease {
    endpoint_key: Option<String>,
    credential_key: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Counts {
    by_key: HashMap<String, u32>,
}

impl Counts {
    fn incr(&mut self, key: &str) {
        *self.by_key.entry(key.to_string()).or_insert(0) += 1;
    }

    fn decr(&mut self, key: &str) {
        if let Some(count) = self.by_key.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }

    fn get(&self, key: &str) -> u32 {
        self.by_key.get(key).copied().unwrap_or(0)
    }
}

/// In-process slot store: one `Mutex` guards both counters so a pair-check
/// is genuinely atomic (spec §4.4 "atomically check both caps"), plus a
/// delay-queue reaper that reclaims leases whose TTL elapses without an
/// explicit `release` — crash/leak protection even within one process
/// (a panicked task, a lost cancellation), grounded in the same
/// `BinaryHeap<Reverse<(Instant, _)>>` + `Notify` shape as
/// [`crate::health::HealthMonitor`]'s cooldown queue.
pub struct LocalSlotStore {
    counts: Mutex<Counts>,
    leases: StdMutex<HashMap<Uuid, Lease>>,
    heap: Mutex<BinaryHeap<Reverse<(Instant, Uuid)>>>,
    notify: Notify,
}

impl LocalSlotStore {
    pub fn new() -> std::sync::Arc<Self> {
        let store = std::sync::Arc::new(Self {
            counts: Mutex::new(Counts::default()),
            leases: StdMutex::new(HashMap::new()),
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        });
        store.clone().spawn_reaper();
        store
    }

    fn spawn_reaper(self: std::sync::Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, id))| (*t, *id))
                };
                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some((deadline, _)) => tokio::time::sleep_until(deadline).await,
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, id))) = heap.peek().copied()
                        && t <= now
                    {
                        heap.pop();
                        due.push(id);
                    }
                }

                for lease_id in due {
                    self.reclaim_if_still_leased(lease_id, now).await;
                }
            }
        });
    }

    async fn reclaim_if_still_leased(&self, lease_id: Uuid, now: Instant) {
        let lease = {
            let mut leases = self.leases.lock().expect("lease map lock poisoned");
            match leases.get(&lease_id) {
                Some(l) if l.expires_at <= now => leases.remove(&lease_id),
                _ => None,
            }
        };
        if let Some(lease) = lease {
            let mut counts = self.counts.lock().await;
            if let Some(endpoint_key) = &lease.endpoint_key {
                counts.decr(endpoint_key);
            }
            counts.decr(&lease.credential_key);
        }
    }
}

#[async_trait]
impl SlotStore for LocalSlotStore {
    async fn try_acquire_pair(
        &self,
        endpoint_key: &str,
        endpoint_cap: Option<u32>,
        credential_key: &str,
        credential_cap: u32,
        ttl: Duration,
    ) -> Option<Uuid> {
        let mut counts = self.counts.lock().await;
        if let Some(cap) = endpoint_cap
            && counts.get(endpoint_key) >= cap
        {
            return None;
        }
        if counts.get(credential_key) >= credential_cap {
            return None;
        }

        if endpoint_cap.is_some() {
            counts.incr(endpoint_key);
        }
        counts.incr(credential_key);
        drop(counts);

        let lease_id = Uuid::new_v4();
        let expires_at = Instant::now() + ttl;
        {
            let mut leases = self.leases.lock().expect("lease map lock poisoned");
            leases.insert(
                lease_id,
                Lease {
                    endpoint_key: endpoint_cap.is_some().then(|| endpoint_key.to_string()),
                    credential_key: credential_key.to_string(),
                    expires_at,
                },
            );
        }
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((expires_at, lease_id)));
        }
        self.notify.notify_one();
        Some(lease_id)
    }

    async fn release(&self, lease_id: Uuid) {
        let lease = {
            let mut leases = self.leases.lock().expect("lease map lock poisoned");
            leases.remove(&lease_id)
        };
        if let Some(lease) = lease {
            let mut counts = self.counts.lock().await;
            if let Some(endpoint_key) = &lease.endpoint_key {
                counts.decr(endpoint_key);
            }
            counts.decr(&lease.credential_key);
        }
    }

    async fn current(&self, key: &str) -> u32 {
        self.counts.lock().await.get(key)
    }
}
