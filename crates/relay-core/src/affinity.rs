//! Cache-Affinity Store (spec §4.7): remembers the last (endpoint,
//! credential) a caller successfully used for a given (client format,
//! canonical model), so repeat requests land on the same upstream
//! connection/prompt cache. Grounded in the teacher's session-affinity
//! map (`gproxy-core::affinity`), generalized to a three-part key and an
//! explicit invalidate-by-triple contract (spec §4.7 "invalidation...keyed
//! by the exact triple").

use std::collections::HashMap;

use relay_common::{CallerId, CredentialId, EndpointId, GlobalModelId};
use relay_protocol::ClientFormat;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AffinityKey {
    caller_id: CallerId,
    client_format: ClientFormat,
    global_model_id: GlobalModelId,
}

#[derive(Debug, Clone, Copy)]
pub struct AffinityPin {
    pub endpoint_id: EndpointId,
    pub credential_id: CredentialId,
}

struct Entry {
    pin: AffinityPin,
    expires_at: Instant,
}

pub struct CacheAffinityStore {
    entries: RwLock<HashMap<AffinityKey, Entry>>,
}

impl CacheAffinityStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(
        &self,
        caller_id: CallerId,
        client_format: ClientFormat,
        global_model_id: GlobalModelId,
    ) -> Option<AffinityPin> {
        let key = AffinityKey { caller_id, client_format, global_model_id };
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.expires_at > now => return Some(entry.pin),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: lazily evict under the write lock.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&key)
            && entry.expires_at <= now
        {
            entries.remove(&key);
        }
        None
    }

    /// `ttl_secs == 0` means affinity is disabled for this credential (spec
    /// §4.7 "skipped entirely when 0") — the call is a no-op rather than
    /// writing a zero-duration entry that would never be read back.
    pub async fn set(
        &self,
        caller_id: CallerId,
        client_format: ClientFormat,
        global_model_id: GlobalModelId,
        pin: AffinityPin,
        ttl_secs: u64,
    ) {
        if ttl_secs == 0 {
            return;
        }
        let key = AffinityKey { caller_id, client_format, global_model_id };
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        let mut entries = self.entries.write().await;
        entries.insert(key, Entry { pin, expires_at });
    }

    /// Removes the entry only if it still names exactly this
    /// (endpoint, credential) pair, so a concurrent successful `set` for a
    /// different credential is never clobbered by a failure on a stale one.
    pub async fn invalidate(
        &self,
        caller_id: CallerId,
        client_format: ClientFormat,
        global_model_id: GlobalModelId,
        endpoint_id: EndpointId,
        credential_id: CredentialId,
    ) {
        let key = AffinityKey { caller_id, client_format, global_model_id };
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(&key)
            && entry.pin.endpoint_id == endpoint_id
            && entry.pin.credential_id == credential_id
        {
            entries.remove(&key);
        }
    }
}

impl Default for CacheAffinityStore {
    fn default() -> Self {
        Self::new()
    }
}
