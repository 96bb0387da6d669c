//! In-process cache store
//!
//! Implements the same contract as Redis (TTL expiry, glob KEYS) without a
//! server. Supports simulated outages and latency, and records call counts
//! so tests can verify store traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::connection::Connector;
use super::store::{BoundedStore, CacheStore, StoreResult};
use crate::error::StoreError;

/// Tracks store calls for test verification
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub set_ex: usize,
    pub keys: usize,
    pub del: usize,
    pub ping: usize,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryInner {
    entries: Mutex<HashMap<String, Entry>>,
    calls: Mutex<CallCounts>,
    failing: AtomicBool,
    latency_ms: AtomicUsize,
}

/// Shared in-memory store; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the server were unreachable
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Write a raw value directly, bypassing call counting and fault injection
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        let mut entries = self.lock_entries();
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Raw value at `key` if present and not expired
    pub fn raw(&self, key: &str) -> Option<String> {
        let entries = self.lock_entries();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Remaining time to live for `key`
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.lock_entries();
        let now = Instant::now();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock_entries()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn call_counts(&self) -> CallCounts {
        self.inner
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map only means a test panicked mid-write; the data is still usable
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn begin(&self, record: impl FnOnce(&mut CallCounts)) -> StoreResult<()> {
        if let Ok(mut calls) = self.inner.calls.lock() {
            record(&mut calls);
        }

        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }

        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.begin(|c| c.get += 1).await?;
        Ok(self.raw(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        self.begin(|c| c.set_ex += 1).await?;
        if ttl_seconds == 0 {
            // Redis rejects SETEX with a zero expiry
            return Err(StoreError::Command(
                "invalid expire time in 'setex' command".to_string(),
            ));
        }
        self.insert_raw(key, value, Duration::from_secs(ttl_seconds));
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.begin(|c| c.keys += 1).await?;
        let now = Instant::now();
        let mut matched: Vec<String> = self
            .lock_entries()
            .iter()
            .filter(|(key, entry)| entry.expires_at > now && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<usize> {
        self.begin(|c| c.del += 1).await?;
        let mut entries = self.lock_entries();
        Ok(keys.iter().filter(|key| entries.remove(*key).is_some()).count())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.begin(|c| c.ping += 1).await
    }
}

/// Hands out connections to a shared `MemoryStore`
pub struct MemoryConnector {
    store: MemoryStore,
    response_timeout: Option<Duration>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            response_timeout: None,
            refuse: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        }
    }

    /// Bound every command on handed-out connections, as `RedisConnector` does
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Make connection attempts fail
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn CacheStore>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("Connection refused".to_string()));
        }
        // Each connection is a distinct handle over the shared data
        match self.response_timeout {
            Some(timeout) => Ok(Arc::new(BoundedStore::new(self.store.clone(), timeout))),
            None => Ok(Arc::new(self.store.clone())),
        }
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

/// Redis-style glob match supporting `*`, `?` and backslash escapes
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_at(&pattern, &text)
}

fn glob_match_at(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') => (0..=text.len()).any(|skip| glob_match_at(&pattern[1..], &text[skip..])),
        Some('?') => !text.is_empty() && glob_match_at(&pattern[1..], &text[1..]),
        Some('\\') if pattern.len() > 1 => {
            text.first() == Some(&pattern[1]) && glob_match_at(&pattern[2..], &text[1..])
        }
        Some(c) => text.first() == Some(c) && glob_match_at(&pattern[1..], &text[1..]),
    }
}
