//! Cache-aside facade in front of authoritative loaders
//!
//! Every store failure is logged and turned into its no-cache equivalent:
//! reads miss, writes are skipped, invalidations remove nothing and the
//! health check reports an error. Only loader errors reach the caller.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::connection::{ConnectionManager, Connector};
use super::inflight::KeyLocks;
use super::key::KeyBuilder;
use super::relations;
use super::store::{CacheStore, RedisConnector};
use super::{EntityType, PolicyTable};
use crate::config::Config;
use crate::error::{Result, StoreError};

/// Store reachability as seen by `health_check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// PING round-trip, only present when the store answered
    #[serde(rename = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl HealthReport {
    pub fn ok(latency_ms: u64) -> Self {
        Self {
            status: HealthStatus::Ok,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn error() -> Self {
        Self {
            status: HealthStatus::Error,
            latency_ms: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Value plus write time, as stored by `with_cache_swr`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEnvelope<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
}

impl<T> CachedEnvelope<T> {
    pub fn new(value: T) -> Self {
        Self::stored_at(value, Utc::now())
    }

    pub fn stored_at(value: T, stored_at: DateTime<Utc>) -> Self {
        Self { value, stored_at }
    }

    /// Younger than `ttl_seconds`
    pub fn is_fresh(&self, ttl_seconds: u64) -> bool {
        let age = Utc::now() - self.stored_at;
        age.num_milliseconds() < (ttl_seconds as i64).saturating_mul(1000)
    }
}

/// Cache-aside layer keyed by entity type.
///
/// Owns the store connection explicitly; construct one per process and
/// share it (it is `Send + Sync`, wrap in `Arc` to hand it out).
pub struct EntityCache {
    connection: ConnectionManager,
    policies: PolicyTable,
    keys: KeyBuilder,
    coalesce: Option<KeyLocks>,
    refreshing: Mutex<HashSet<String>>,
}

impl EntityCache {
    /// Create a cache over `connector` with the built-in policies
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connection: ConnectionManager::new(connector),
            policies: PolicyTable::default(),
            keys: KeyBuilder::default(),
            coalesce: None,
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    /// Create a Redis-backed cache from validated configuration.
    ///
    /// Does not connect; the first cache operation does.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let connector = RedisConnector::new(
            &config.redis_url,
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.response_timeout_ms),
        )?;
        let policies = PolicyTable::with_overrides(&config.policies)?;

        Ok(Self::new(Arc::new(connector))
            .with_policies(policies)
            .with_key_builder(KeyBuilder::new(config.namespace.as_str()))
            .with_coalescing(config.coalesce_misses)
            .with_reconnect_cooldown(Duration::from_millis(config.reconnect_cooldown_ms)))
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_key_builder(mut self, keys: KeyBuilder) -> Self {
        self.keys = keys;
        self
    }

    /// Serialize concurrent misses on the same key so only one loader runs
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce = enabled.then(KeyLocks::new);
        self
    }

    /// How long to skip the store after a failed connect
    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.connection.set_retry_after(cooldown);
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn entity_key(&self, entity: EntityType, id: impl Display) -> String {
        self.keys.entity_key(entity, id)
    }

    pub fn list_key(&self, entity: EntityType, filters: Option<&Value>) -> String {
        self.keys.list_key(entity, filters)
    }

    /// Raw cached payload at `key`
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        let store = self.connection.acquire().await?;
        match store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.store_failed(&store, "Get", key, &e);
                None
            }
        }
    }

    /// Cached value at `key`; absent on miss, outage or a malformed payload
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Cache payload at {} is malformed, ignoring: {}", key, e);
                None
            }
        }
    }

    /// Store `value` at `key` for `ttl_seconds`.
    ///
    /// A zero TTL writes nothing. Failures are logged, never returned.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u64) {
        if ttl_seconds == 0 {
            return;
        }

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Cache value for {} is not serializable, skipping: {}", key, e);
                return;
            }
        };

        let Some(store) = self.connection.acquire().await else {
            return;
        };
        if let Err(e) = store.set_ex(key, &payload, ttl_seconds).await {
            self.store_failed(&store, "Set", key, &e);
        }
    }

    /// Read-through lookup.
    ///
    /// `key` is an identifier or a key already built for `entity` (see
    /// [`KeyBuilder::resolve`]). On a hit the loader is not called. On a miss
    /// the loader's value is cached under the entity's TTL and returned.
    /// Loader errors are returned unchanged. Entities with a zero TTL always
    /// call the loader and never touch the store.
    pub async fn with_cache<T, E, F, Fut>(
        &self,
        entity: EntityType,
        key: &str,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let policy = self.policies.policy(entity);
        if !policy.is_cacheable() {
            return loader().await;
        }

        let full_key = self.keys.resolve(entity, key);
        if let Some(hit) = self.get::<T>(&full_key).await {
            log::debug!("Cache hit: {}", full_key);
            return Ok(hit);
        }

        let _guard = match &self.coalesce {
            Some(locks) => {
                let guard = locks.lock(&full_key).await;
                // Another caller may have loaded it while we waited
                if let Some(hit) = self.get::<T>(&full_key).await {
                    log::debug!("Cache hit after wait: {}", full_key);
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        log::debug!("Cache miss: {}", full_key);
        let value = loader().await?;
        self.set(&full_key, &value, policy.ttl_seconds).await;
        Ok(value)
    }

    /// Read-through lookup that serves stale entries while refreshing.
    ///
    /// Entries are stored as [`CachedEnvelope`]s living `ttl + swr` seconds.
    /// An entry older than `ttl` is returned as-is and one background
    /// refresh per key is spawned on the tokio runtime. Misses load inline.
    pub async fn with_cache_swr<T, E, F, Fut>(
        self: &Arc<Self>,
        entity: EntityType,
        key: &str,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let policy = self.policies.policy(entity);
        if !policy.is_cacheable() {
            return loader().await;
        }

        let full_key = self.keys.resolve(entity, key);
        let store_ttl = policy
            .ttl_seconds
            .saturating_add(policy.stale_while_revalidate_seconds);

        if let Some(cached) = self.get::<CachedEnvelope<T>>(&full_key).await {
            if cached.is_fresh(policy.ttl_seconds) {
                log::debug!("Cache hit: {}", full_key);
            } else {
                log::debug!("Cache hit (stale, revalidating): {}", full_key);
                self.spawn_refresh(full_key, store_ttl, loader);
            }
            return Ok(cached.value);
        }

        log::debug!("Cache miss: {}", full_key);
        let value = loader().await?;
        self.set(&full_key, &CachedEnvelope::new(&value), store_ttl)
            .await;
        Ok(value)
    }

    /// Whether a background refresh for `key` is running
    pub fn is_refreshing(&self, key: &str) -> bool {
        self.refreshing_keys().contains(key)
    }

    /// Delete cached entries for `entity`.
    ///
    /// With an id, removes every key starting with `<ns>:<entity>:<id>`,
    /// which includes ids that merely extend it; without, every key of the
    /// entity type. Returns the number removed
    /// (0 when the store is unreachable).
    pub async fn invalidate(&self, entity: EntityType, id: Option<&str>) -> usize {
        let Some(store) = self.connection.acquire().await else {
            return 0;
        };

        let pattern = self.keys.invalidation_pattern(entity, id);
        let keys = match store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                self.store_failed(&store, "Invalidation", &pattern, &e);
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        match store.del(&keys).await {
            Ok(removed) => {
                log::debug!("Invalidated {} keys for {}", removed, entity);
                removed
            }
            Err(e) => {
                self.store_failed(&store, "Invalidation", &pattern, &e);
                0
            }
        }
    }

    /// Invalidate `entity` and every entity type related to it, concurrently.
    ///
    /// Returns the total number of keys removed.
    pub async fn invalidate_related(&self, entity: EntityType) -> usize {
        self.invalidate_cascade(entity)
            .await
            .into_iter()
            .map(|(_, removed)| removed)
            .sum()
    }

    /// Same as [`invalidate_related`](Self::invalidate_related), reporting
    /// removals per entity type (the requested type first)
    pub async fn invalidate_cascade(&self, entity: EntityType) -> Vec<(EntityType, usize)> {
        let targets: Vec<EntityType> = std::iter::once(entity)
            .chain(relations::related(entity).iter().copied())
            .collect();
        let removed = join_all(targets.iter().map(|target| self.invalidate(*target, None))).await;
        targets.into_iter().zip(removed).collect()
    }

    /// PING the store and report round-trip latency
    pub async fn health_check(&self) -> HealthReport {
        let Some(store) = self.connection.acquire().await else {
            return HealthReport::error();
        };

        let start = Instant::now();
        match store.ping().await {
            Ok(()) => HealthReport::ok(start.elapsed().as_millis() as u64),
            Err(e) => {
                self.store_failed(&store, "Health check", "PING", &e);
                HealthReport::error()
            }
        }
    }

    fn spawn_refresh<T, E, F, Fut>(self: &Arc<Self>, key: String, ttl_seconds: u64, loader: F)
    where
        T: Serialize + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if !self.refreshing_keys().insert(key.clone()) {
            return;
        }

        let refresh = RefreshGuard {
            cache: Arc::clone(self),
            key,
        };
        tokio::spawn(async move {
            match loader().await {
                Ok(value) => {
                    refresh
                        .cache
                        .set(&refresh.key, &CachedEnvelope::new(&value), ttl_seconds)
                        .await
                }
                Err(e) => log::warn!("Background refresh of {} failed: {}", refresh.key, e),
            }
        });
    }

    fn refreshing_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.refreshing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_failed(
        &self,
        store: &Arc<dyn CacheStore>,
        operation: &str,
        key: &str,
        err: &StoreError,
    ) {
        log::warn!("Cache {} failed for {}: {}", operation, key, err);
        if err.is_unavailable() {
            self.connection.reset(store);
        }
    }
}

/// Marks a background refresh as finished when dropped, even if the loader panicked
struct RefreshGuard {
    cache: Arc<EntityCache>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.cache.refreshing_keys().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::{MemoryConnector, MemoryStore};
    use serde_json::json;

    fn create_test_cache() -> (EntityCache, MemoryStore) {
        let store = MemoryStore::new();
        let cache = EntityCache::new(Arc::new(MemoryConnector::new(store.clone())));
        (cache, store)
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let (cache, _store) = create_test_cache();
        cache.set("cep:courses:1", &json!({"id": 1}), 60).await;

        let value: Option<Value> = cache.get("cep:courses:1").await;
        assert_eq!(value, Some(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_set_uses_ttl() {
        let (cache, store) = create_test_cache();
        cache.set("cep:courses:1", &1, 300).await;

        let ttl = store.ttl("cep:courses:1").unwrap();
        assert!(ttl <= Duration::from_secs(300));
        assert!(ttl > Duration::from_secs(290));
    }

    #[tokio::test]
    async fn test_zero_ttl_set_makes_no_store_call() {
        let (cache, store) = create_test_cache();
        cache.set("cep:users:1", &json!({"id": 1}), 0).await;

        assert!(store.is_empty());
        assert_eq!(store.call_counts().set_ex, 0);
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (cache, _store) = create_test_cache();
        let value: Option<Value> = cache.get("cep:courses:nope").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_miss() {
        let (cache, store) = create_test_cache();
        store.insert_raw("cep:courses:1", "{not json", Duration::from_secs(60));

        let value: Option<Value> = cache.get("cep:courses:1").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_wrong_shape_payload_is_a_miss() {
        let (cache, store) = create_test_cache();
        store.insert_raw("cep:courses:1", "\"text\"", Duration::from_secs(60));

        let value: Option<u32> = cache.get("cep:courses:1").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_outage_drops_connection() {
        let store = MemoryStore::new();
        let connector = Arc::new(MemoryConnector::new(store.clone()));
        let cache = EntityCache::new(connector.clone());

        cache.set("cep:courses:1", &1, 60).await;
        assert!(cache.connection().is_connected());

        store.set_failing(true);
        let value: Option<u32> = cache.get("cep:courses:1").await;
        assert!(value.is_none());
        assert!(!cache.connection().is_connected());

        store.set_failing(false);
        let value: Option<u32> = cache.get("cep:courses:1").await;
        assert_eq!(value, Some(1));
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection() {
        let (cache, store) = create_test_cache();
        cache.set("cep:courses:1", &1, 60).await;

        // Zero TTL never reaches the store, so provoke a command error directly
        let conn = cache.connection().acquire().await.unwrap();
        let err = conn.set_ex("k", "v", 0).await.unwrap_err();
        cache.store_failed(&conn, "Set", "k", &err);

        assert!(cache.connection().is_connected());
        assert_eq!(store.call_counts().set_ex, 2);
    }

    #[tokio::test]
    async fn test_with_cache_accepts_built_key() {
        let (cache, store) = create_test_cache();
        let key = cache.list_key(EntityType::Courses, None);

        let value: std::result::Result<Vec<u32>, String> = cache
            .with_cache(EntityType::Courses, &key, || async { Ok(vec![1, 2]) })
            .await;

        assert_eq!(value.unwrap(), vec![1, 2]);
        assert!(store.raw("cep:courses:list:all").is_some());
    }

    #[tokio::test]
    async fn test_with_cache_propagates_loader_error() {
        let (cache, store) = create_test_cache();

        let result: std::result::Result<u32, String> = cache
            .with_cache(EntityType::Courses, "abc", || async {
                Err("database down".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "database down");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_without_connection_is_noop() {
        let store = MemoryStore::new();
        let connector = Arc::new(MemoryConnector::new(store));
        connector.set_refuse_connections(true);
        let cache = EntityCache::new(connector);

        assert_eq!(cache.invalidate(EntityType::Courses, None).await, 0);
        assert_eq!(cache.invalidate_related(EntityType::Courses).await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_with_no_matches() {
        let (cache, store) = create_test_cache();
        assert_eq!(cache.invalidate(EntityType::Leads, None).await, 0);
        assert_eq!(store.call_counts().del, 0);
    }

    #[test]
    fn test_health_report_serialization() {
        let ok = serde_json::to_value(HealthReport::ok(3)).unwrap();
        assert_eq!(ok, json!({"status": "ok", "latencyMs": 3}));

        let err = serde_json::to_value(HealthReport::error()).unwrap();
        assert_eq!(err, json!({"status": "error"}));
    }

    #[test]
    fn test_envelope_freshness() {
        let fresh = CachedEnvelope::new(1);
        assert!(fresh.is_fresh(60));

        let old = CachedEnvelope::stored_at(1, Utc::now() - chrono::Duration::seconds(120));
        assert!(!old.is_fresh(60));
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let config = Config {
            redis_url: "definitely not a url".to_string(),
            ..Config::default()
        };
        assert!(EntityCache::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_applies_namespace() {
        let config = Config {
            namespace: "staging".to_string(),
            ..Config::default()
        };
        let cache = EntityCache::from_config(&config).unwrap();
        assert_eq!(cache.entity_key(EntityType::Courses, "x"), "staging:courses:x");
    }
}
