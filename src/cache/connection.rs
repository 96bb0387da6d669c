//! Lazily-established, self-healing store connection

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::store::{CacheStore, StoreResult};

/// Opens new store connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> StoreResult<Arc<dyn CacheStore>>;

    /// Human-readable target without credentials, for logs and display
    fn describe(&self) -> String;
}

/// Default pause after a failed connect before the next attempt
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Holds the single shared store connection for an `EntityCache`.
///
/// The connection is opened on first use. Concurrent callers share one
/// connect attempt instead of queueing their own. A failed attempt is logged
/// and, for `retry_after`, every `acquire` reports "no connection" without
/// touching the network. When an operation fails with an unavailability
/// error the handle is dropped via `reset`, so a later caller reconnects.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    state: StdMutex<State>,
    connecting: Mutex<()>,
    retry_after: Duration,
}

#[derive(Default)]
struct State {
    store: Option<Arc<dyn CacheStore>>,
    failed_at: Option<Instant>,
}

enum Lookup {
    Connected(Arc<dyn CacheStore>),
    CoolingDown,
    Idle,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: StdMutex::new(State::default()),
            connecting: Mutex::new(()),
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Pause after a failed connect; zero retries on every call
    pub fn set_retry_after(&mut self, retry_after: Duration) {
        self.retry_after = retry_after;
    }

    /// Current connection, opening one if needed.
    ///
    /// Returns `None` when the store cannot be reached; never fails.
    pub async fn acquire(&self) -> Option<Arc<dyn CacheStore>> {
        match self.lookup() {
            Lookup::Connected(store) => return Some(store),
            Lookup::CoolingDown => return None,
            Lookup::Idle => {}
        }

        let _connecting = self.connecting.lock().await;
        // Whoever held the lock before us already connected or failed
        match self.lookup() {
            Lookup::Connected(store) => return Some(store),
            Lookup::CoolingDown => return None,
            Lookup::Idle => {}
        }

        match self.connector.connect().await {
            Ok(store) => {
                log::info!("Cache connected to {}", self.connector.describe());
                let mut state = self.lock_state();
                state.store = Some(Arc::clone(&store));
                state.failed_at = None;
                Some(store)
            }
            Err(e) => {
                log::warn!(
                    "Cache connection to {} failed, caching disabled for {:?}: {}",
                    self.connector.describe(),
                    self.retry_after,
                    e
                );
                self.lock_state().failed_at = Some(Instant::now());
                None
            }
        }
    }

    /// Drop `failed` if it is still the current connection.
    ///
    /// A connection opened by another caller since `failed` was acquired is
    /// left in place.
    pub fn reset(&self, failed: &Arc<dyn CacheStore>) {
        let mut state = self.lock_state();
        if state
            .store
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, failed))
        {
            log::warn!("Dropping cache connection to {}", self.connector.describe());
            state.store = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().store.is_some()
    }

    /// Store target without credentials, for display
    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    /// Release the connection; a later `acquire` reconnects
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        state.store = None;
        state.failed_at = None;
    }

    fn lookup(&self) -> Lookup {
        let state = self.lock_state();
        if let Some(store) = &state.store {
            return Lookup::Connected(Arc::clone(store));
        }
        match state.failed_at {
            Some(failed_at) if failed_at.elapsed() < self.retry_after => Lookup::CoolingDown,
            _ => Lookup::Idle,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
