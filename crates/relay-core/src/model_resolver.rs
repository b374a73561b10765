//! Model Resolver (spec §4.1): client-supplied model name -> canonical
//! `GlobalModel`, with a TTL cache and event-driven invalidation.
//!
//! The TTL cache is a `tokio::sync::RwLock<HashMap<CacheKey, CacheEntry>>`
//! with `Instant`-based expiry checked lazily on read, and admin
//! invalidation arrives over the catalog crate's `CatalogChangeBus`
//! (SPEC_FULL §C), matching the teacher's `EventHub` pattern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use relay_catalog::{CatalogChange, CatalogStore, MappingKind};
use relay_common::{GlobalModelId, ProviderId};
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider_scope: Option<ProviderId>,
    source_name: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    global_model_id: GlobalModelId,
    expires_at: Instant,
}

#[derive(Debug, thiserror::Error, Clone)]
#[error("model {requested:?} is not supported")]
pub struct ModelUnsupported {
    pub requested: String,
    /// Friendly suggestions (spec §4.1 "similar-models lookup").
    pub similar: Vec<String>,
}

pub struct ModelResolver {
    catalog: Arc<CatalogStore>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ModelResolver {
    pub fn new(catalog: Arc<CatalogStore>, ttl: Duration) -> Self {
        Self {
            catalog,
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Spawns the background task that drains the catalog's invalidation
    /// bus and evicts matching cache entries, returning its `JoinHandle` so
    /// callers can hold it alive / abort it on shutdown.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let resolver = self.clone();
        let mut changes = self.catalog.subscribe_changes();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => resolver.apply_invalidation(change).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        // We missed events; the conservative move is to drop
                        // the whole cache rather than risk serving stale data.
                        resolver.cache.write().await.clear();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn apply_invalidation(&self, change: CatalogChange) {
        let mut cache = self.cache.write().await;
        match change {
            CatalogChange::GlobalModelChanged { name } => {
                cache.retain(|key, _| key.source_name != name);
            }
            CatalogChange::ModelMappingChanged {
                source_model,
                provider_id: Some(provider_id),
            } => {
                cache.retain(|key, _| {
                    !(key.source_name == source_model
                        && (key.provider_scope == Some(provider_id) || key.provider_scope.is_none()))
                });
            }
            CatalogChange::ModelMappingChanged {
                provider_id: None, ..
            } => {
                // A global-scope mapping can redirect resolution for every
                // provider scope (spec §4.1 resolution order steps 2/4);
                // "unknown-scope mutations clear all" (spec §4.1).
                cache.clear();
            }
            CatalogChange::ModelChanged { provider_id, .. } => {
                cache.retain(|key, _| key.provider_scope != Some(provider_id));
            }
        }
    }

    /// Resolution order (spec §4.1 steps 1-6).
    pub async fn resolve(
        &self,
        source_name: &str,
        provider_scope: Option<ProviderId>,
    ) -> Result<GlobalModelId, ModelUnsupported> {
        let key = CacheKey {
            provider_scope,
            source_name: source_name.to_string(),
        };

        if let Some(id) = self.cache_get(&key).await {
            return Ok(id);
        }

        let snapshot = self.catalog.snapshot();

        let resolved = snapshot
            .mapping_for(source_name, provider_scope, MappingKind::Mapping)
            .or_else(|| snapshot.mapping_for(source_name, None, MappingKind::Mapping))
            .or_else(|| snapshot.mapping_for(source_name, provider_scope, MappingKind::Alias))
            .or_else(|| snapshot.mapping_for(source_name, None, MappingKind::Alias))
            .map(|mapping| mapping.target_global_model_id)
            .or_else(|| snapshot.global_model_by_name(source_name).map(|g| g.id));

        match resolved {
            Some(id) => {
                self.cache_set(key, id).await;
                Ok(id)
            }
            None => Err(ModelUnsupported {
                requested: source_name.to_string(),
                similar: self.similar_models(source_name, 3),
            }),
        }
    }

    async fn cache_get(&self, key: &CacheKey) -> Option<GlobalModelId> {
        let cache = self.cache.read().await;
        let entry = cache.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.global_model_id)
        } else {
            None
        }
    }

    async fn cache_set(&self, key: CacheKey, global_model_id: GlobalModelId) {
        let mut cache = self.cache.write().await;
        cache.insert(
            key,
            CacheEntry {
                global_model_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
        // Lazily evict expired entries on write, matching spec §3's
        // "samples older than the window are evicted lazily on each
        // update" pattern applied here to the resolver's own cache.
        let now = Instant::now();
        cache.retain(|_, v| v.expires_at > now);
    }

    /// Top-k `GlobalModel` canonical names by substring-weighted similarity
    /// to `requested`, for friendly "model not found" messages (spec §4.1).
    pub fn similar_models(&self, requested: &str, k: usize) -> Vec<String> {
        let snapshot = self.catalog.snapshot();
        let mut scored: Vec<(f64, String)> = snapshot
            .global_models
            .values()
            .filter(|g| g.active)
            .map(|g| (similarity(requested, &g.canonical_name), g.canonical_name.clone()))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.1.cmp(&b.1)));
        scored.into_iter().take(k).map(|(_, name)| name).collect()
    }
}

/// A substring-weighted string similarity score in `[0, 1]`: the longest
/// common substring's length relative to the longer input, with a bonus
/// when one string contains the other outright. Cheap and order-sensitive
/// enough to rank "gpt4o" above "gpt-3" for a typo'd "gpt4o-mini" query
/// without pulling in a full edit-distance crate.
fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if b.contains(&a) || a.contains(&b) {
        let shorter = a.len().min(b.len()) as f64;
        let longer = a.len().max(b.len()) as f64;
        return 0.5 + 0.5 * (shorter / longer);
    }
    let lcs = longest_common_substring(&a, &b) as f64;
    let longer = a.len().max(b.len()) as f64;
    lcs / longer
}

fn longest_common_substring(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    let mut best = 0;
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                dp[i][j] = dp[i - 1][j - 1] + 1;
                best = best.max(dp[i][j]);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_catalog::{GlobalModel, MappingKind as Kind, ModelMapping};
    use std::collections::HashSet;

    fn model(name: &str) -> GlobalModel {
        GlobalModel {
            id: GlobalModelId::new(),
            canonical_name: name.to_string(),
            display_name: name.to_string(),
            capability_tags: HashSet::new(),
            active: true,
        }
    }

    #[tokio::test]
    async fn direct_name_match_resolves() {
        let catalog = Arc::new(CatalogStore::new());
        let m = model("gpt-4o-mini");
        catalog.upsert_global_model(m.clone());
        let resolver = ModelResolver::new(catalog, Duration::from_secs(300));
        let resolved = resolver.resolve("gpt-4o-mini", None).await.unwrap();
        assert_eq!(resolved, m.id);
    }

    #[tokio::test]
    async fn alias_rule_takes_precedence_over_direct_name_absence() {
        let catalog = Arc::new(CatalogStore::new());
        let target = model("gpt-4o");
        catalog.upsert_global_model(target.clone());
        catalog.upsert_model_mapping(ModelMapping {
            id: uuid::Uuid::new_v4(),
            source_name: "gpt4o".to_string(),
            target_global_model_id: target.id,
            provider_scope: None,
            kind: Kind::Alias,
            active: true,
        });
        let resolver = ModelResolver::new(catalog, Duration::from_secs(300));
        let resolved = resolver.resolve("gpt4o", None).await.unwrap();
        assert_eq!(resolved, target.id);
    }

    #[tokio::test]
    async fn provider_scoped_mapping_beats_global_mapping() {
        let catalog = Arc::new(CatalogStore::new());
        let global_target = model("model-a");
        let scoped_target = model("model-b");
        catalog.upsert_global_model(global_target.clone());
        catalog.upsert_global_model(scoped_target.clone());
        let provider_id = ProviderId::new();
        catalog.upsert_model_mapping(ModelMapping {
            id: uuid::Uuid::new_v4(),
            source_name: "shared".to_string(),
            target_global_model_id: global_target.id,
            provider_scope: None,
            kind: Kind::Mapping,
            active: true,
        });
        catalog.upsert_model_mapping(ModelMapping {
            id: uuid::Uuid::new_v4(),
            source_name: "shared".to_string(),
            target_global_model_id: scoped_target.id,
            provider_scope: Some(provider_id),
            kind: Kind::Mapping,
            active: true,
        });
        let resolver = ModelResolver::new(catalog, Duration::from_secs(300));
        let resolved = resolver.resolve("shared", Some(provider_id)).await.unwrap();
        assert_eq!(resolved, scoped_target.id);
    }

    #[tokio::test]
    async fn unknown_model_returns_similar_suggestions() {
        let catalog = Arc::new(CatalogStore::new());
        catalog.upsert_global_model(model("gpt-4o-mini"));
        let resolver = ModelResolver::new(catalog, Duration::from_secs(300));
        let err = resolver.resolve("gpt-4o-minu", None).await.unwrap_err();
        assert_eq!(err.similar, vec!["gpt-4o-mini".to_string()]);
    }

    #[tokio::test]
    async fn global_model_rename_invalidates_matching_cache_entries() {
        let catalog = Arc::new(CatalogStore::new());
        let m = model("gpt-4o-mini");
        catalog.upsert_global_model(m.clone());
        let resolver = Arc::new(ModelResolver::new(catalog.clone(), Duration::from_secs(300)));
        resolver.resolve("gpt-4o-mini", None).await.unwrap();
        assert!(resolver.cache.read().await.len() == 1);

        let handle = resolver.spawn_invalidation_listener();
        catalog.upsert_global_model(GlobalModel {
            active: false,
            ..m.clone()
        });
        // give the listener a beat to process the broadcast
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(resolver.cache.read().await.is_empty());
        handle.abort();
    }
}
