//! In-memory session store with bounded capacity and idle expiry.

use async_trait::async_trait;
use moka::sync::Cache;
use ponder_config::SessionConfig;
use ponder_core::session::{Session, SessionHandle, SessionId, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Process-lifetime session store.
///
/// Backed by a `moka` cache so the number of live sessions stays bounded:
/// least-recently-used sessions are evicted past `capacity`, and sessions
/// untouched for `idle_ttl` are dropped. A turn holding a handle keeps its
/// session alive until the turn ends even if the entry is evicted meanwhile.
#[derive(Clone)]
pub struct InMemorySessionStore {
    cache: Cache<SessionId, SessionHandle>,
}

impl InMemorySessionStore {
    pub fn new(capacity: u64, idle_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity.max(1))
            .time_to_idle(idle_ttl)
            .build();
        Self { cache }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.idle_ttl_secs))
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_or_create(&self, id: &SessionId) -> SessionHandle {
        // get_with runs the initializer at most once per key even under races
        self.cache.get_with(id.clone(), || {
            debug!(session_id = %id, "Creating session");
            Arc::new(Mutex::new(Session::new(id.clone())))
        })
    }

    async fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.cache.get(id)
    }

    async fn remove(&self, id: &SessionId) -> bool {
        self.cache.remove(id).is_some()
    }

    async fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }
}
