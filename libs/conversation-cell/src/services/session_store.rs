// libs/conversation-cell/src/services/session_store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info};

use shared_config::AppConfig;

use crate::error::StoreError;
use crate::models::ConversationSession;

const SESSION_KEY_PREFIX: &str = "conversation_session";

/// Key-value persistence of conversation sessions by id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationSession>, StoreError>;

    /// Stores the session, to be dropped `ttl` after its last update.
    async fn save(&self, session: &ConversationSession, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Removes sessions whose TTL has run out, returning how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    fn backend_name(&self) -> &'static str;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

struct StoredSession {
    session: ConversationSession,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationSession>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).map(|stored| stored.session.clone()))
    }

    async fn save(&self, session: &ConversationSession, ttl: Duration) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session.session_id.clone(),
            StoredSession {
                session: session.clone(),
                expires_at: session.last_updated_at + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        let purged = before - sessions.len();

        if purged > 0 {
            debug!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ==============================================================================
// REDIS STORE
// ==============================================================================

/// Sessions as JSON in a Redis hash per id; Redis key expiry enforces the TTL.
pub struct RedisSessionStore {
    pool: Pool,
}

impl RedisSessionStore {
    pub async fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let redis_url = config
            .redis_url
            .clone()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::PoolError(format!("Pool creation error: {}", e)))?;

        // Test connection
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis session store initialized successfully");

        Ok(Self { pool })
    }

    fn session_key(session_id: &str) -> String {
        format!("{}:{}", SESSION_KEY_PREFIX, session_id)
    }

    async fn get_connection(&self) -> Result<Connection, StoreError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationSession>, StoreError> {
        let mut conn = self.get_connection().await?;
        let data: Option<String> = conn.hget(Self::session_key(session_id), "data").await?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, session: &ConversationSession, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let key = Self::session_key(&session.session_id);

        let data = serde_json::to_string(session)?;
        let state = session.state.to_string();
        let updated_at = session.last_updated_at.to_rfc3339();

        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("data", data.as_str()),
                    ("state", state.as_str()),
                    ("updated_at", updated_at.as_str()),
                ],
            )
            .await?;

        let ttl_seconds = ttl.num_seconds().max(1);
        let _: () = conn.expire(&key, ttl_seconds as _).await?;

        debug!("Session {} saved with ttl {}s", session.session_id, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.del(Self::session_key(session_id)).await?;
        Ok(())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        // Key expiry already removes stale sessions.
        Ok(0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
