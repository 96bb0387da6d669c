//! Key-value store abstraction and the Redis implementation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::connection::Connector;
use crate::error::{ConfigError, StoreError};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Operations the cache needs from a key-value store.
///
/// Mirrors the Redis commands GET, SETEX, KEYS, DEL and PING. Every call is a
/// network round-trip in the Redis implementation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw value stored at `key`, if present and not expired
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` at `key`, expiring after `ttl_seconds`
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()>;

    /// Keys matching a glob `pattern`
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Delete `keys`, returning how many existed
    async fn del(&self, keys: &[String]) -> StoreResult<usize>;

    /// Liveness check
    async fn ping(&self) -> StoreResult<()>;
}

/// Redis-backed store over a multiplexed async connection.
///
/// Commands are not bounded here; `RedisConnector` wraps it in a
/// [`BoundedStore`].
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        Ok(conn.set_ex(key, value, ttl_seconds).await?)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.keys(pattern).await?)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Ok(conn.del(keys.to_vec()).await?)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(StoreError::Command(format!("Unexpected PING reply: {}", pong)))
        }
    }
}

/// Applies a response timeout to every command of the wrapped store.
///
/// An elapsed bound is reported as [`StoreError::Timeout`], which counts as
/// unavailable and makes the connection manager drop the handle.
pub struct BoundedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: CacheStore> BoundedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, Fut>(&self, command: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        tokio::time::timeout(self.timeout, command)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)))
    }
}

#[async_trait]
impl<S: CacheStore> CacheStore for BoundedStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        self.bounded(self.inner.set_ex(key, value, ttl_seconds))
            .await
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.bounded(self.inner.keys(pattern)).await
    }

    async fn del(&self, keys: &[String]) -> StoreResult<usize> {
        self.bounded(self.inner.del(keys)).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.bounded(self.inner.ping()).await
    }
}

/// Opens Redis connections for the connection manager
pub struct RedisConnector {
    client: redis::Client,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl RedisConnector {
    /// Create a connector for `url`.
    ///
    /// Only the URL is validated here; no connection is made until the
    /// connection manager first asks for one.
    pub fn new(
        url: &str,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = redis::Client::open(url)
            .map_err(|e| ConfigError::Invalid(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self {
            client,
            connect_timeout,
            response_timeout,
        })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn CacheStore>> {
        let conn = match tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout(self.connect_timeout)),
        };
        Ok(Arc::new(BoundedStore::new(
            RedisStore::new(conn),
            self.response_timeout,
        )))
    }

    fn describe(&self) -> String {
        let info = self.client.get_connection_info();
        format!("redis://{}", info.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryStore;
    use tokio::net::TcpListener;

    #[test]
    fn test_connector_rejects_malformed_url() {
        let result = RedisConnector::new(
            "not a url",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_connector_describes_address() {
        let connector = RedisConnector::new(
            "redis://localhost:6379",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(connector.describe().contains("localhost:6379"));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let connector = RedisConnector::new(
            "redis://127.0.0.1:1",
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .unwrap();

        let err = connector.connect().await.err().unwrap();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_describe_omits_credentials() {
        let connector = RedisConnector::new(
            "redis://:s3cretpw@localhost:6379",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        let target = connector.describe();
        assert!(!target.contains("s3cretpw"));
        assert!(target.contains("localhost:6379"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_store_times_out_slow_commands() {
        let slow = MemoryStore::new();
        slow.set_latency(Duration::from_secs(30));
        let store = BoundedStore::new(slow.clone(), Duration::from_millis(100));

        let start = tokio::time::Instant::now();
        let err = store.get("cep:courses:1").await.unwrap_err();

        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_millis(100)));
        assert!(err.is_unavailable());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_bounded_store_passes_fast_results_through() {
        let inner = MemoryStore::new();
        let store = BoundedStore::new(inner.clone(), Duration::from_secs(1));

        store.set_ex("cep:leads:1", "{}", 10).await.unwrap();
        assert_eq!(store.get("cep:leads:1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.del(&["cep:leads:1".to_string()]).await.unwrap(), 1);
        assert!(store.ping().await.is_ok());
        assert_eq!(inner.call_counts().set_ex, 1);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts connections but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let connector = RedisConnector::new(
            &format!("redis://{}", addr),
            Duration::from_millis(300),
            Duration::from_millis(300),
        )
        .unwrap();

        let start = std::time::Instant::now();
        let err = match connector.connect().await {
            Err(e) => e,
            Ok(store) => store.ping().await.unwrap_err(),
        };

        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(err.is_unavailable());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
