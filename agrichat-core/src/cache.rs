//! Session cache client — a TTL-bounded mirror of recent session state.
//!
//! Keys:
//! - `chat_session:{id}`   — bounded most-recent-first list of serialized messages
//! - `session_meta:{id}`   — single JSON value with the session record
//! - `user_sessions:{uid}` — set of the user's active session ids
//!
//! The cache never originates truth. Every write here is best-effort from the
//! caller's point of view: the session service logs and swallows cache errors
//! once the durable write has succeeded.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::config::{CacheConfig, SessionConfig};
use crate::error::AgriChatError;
use crate::models::{ChatMessage, ChatSession};

#[derive(Clone)]
pub struct CacheClient {
    conn: ConnectionManager,
    ttl_seconds: i64,
    history_cap: usize,
}

pub fn session_key(session_id: &Uuid) -> String {
    format!("chat_session:{}", session_id)
}

pub fn meta_key(session_id: &Uuid) -> String {
    format!("session_meta:{}", session_id)
}

pub fn user_sessions_key(user_id: &str) -> String {
    format!("user_sessions:{}", user_id)
}

impl CacheClient {
    pub async fn connect(
        cache: &CacheConfig,
        session: &SessionConfig,
    ) -> Result<Self, AgriChatError> {
        let client = redis::Client::open(cache.url())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ttl_seconds: session.ttl_seconds as i64,
            history_cap: session.history_cache_size,
        })
    }

    pub async fn ping(&self) -> Result<(), AgriChatError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Push a message onto the session's recent list. The push, the trim to the
    /// configured cap and the TTL refresh are always issued together; there is
    /// no atomicity across the three commands.
    pub async fn push_message(&self, message: &ChatMessage) -> Result<(), AgriChatError> {
        let key = session_key(&message.session_id);
        let serialized = serde_json::to_string(message)?;

        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&key, serialized).await?;
        let _: () = conn.ltrim(&key, 0, self.history_cap as isize - 1).await?;
        let _: () = conn.expire(&key, self.ttl_seconds).await?;
        // Keep the metadata entry alive alongside the list.
        let _: () = conn
            .expire(meta_key(&message.session_id), self.ttl_seconds)
            .await?;
        Ok(())
    }

    /// Cached history in chronological order. Entries that fail to decode are
    /// skipped. An empty vec means a cache miss to the caller.
    pub async fn history(&self, session_id: &Uuid) -> Result<Vec<ChatMessage>, AgriChatError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(session_key(session_id), 0, -1).await?;

        let mut messages: Vec<ChatMessage> = Vec::with_capacity(raw.len());
        for entry in raw.into_iter().rev() {
            match serde_json::from_str(&entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping undecodable cached message");
                }
            }
        }
        Ok(messages)
    }

    /// Mirror the session record and register it in the owner's active set.
    pub async fn store_session_meta(&self, session: &ChatSession) -> Result<(), AgriChatError> {
        let serialized = serde_json::to_string(session)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                meta_key(&session.id),
                serialized,
                self.ttl_seconds as u64,
            )
            .await?;

        let user_key = user_sessions_key(&session.user_id);
        let _: () = conn.sadd(&user_key, session.id.to_string()).await?;
        let _: () = conn.expire(&user_key, self.ttl_seconds).await?;
        Ok(())
    }

    pub async fn session_meta(
        &self,
        session_id: &Uuid,
    ) -> Result<Option<ChatSession>, AgriChatError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(meta_key(session_id)).await?;
        match raw {
            Some(data) => match serde_json::from_str(&data) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Undecodable cached session metadata");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Session ids in the user's active set. Non-UUID members are skipped.
    pub async fn user_active_sessions(&self, user_id: &str) -> Result<Vec<Uuid>, AgriChatError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(user_sessions_key(user_id)).await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }

    /// Drop every cache entry for a session and remove it from the owner's set.
    pub async fn remove_session(
        &self,
        session_id: &Uuid,
        user_id: &str,
    ) -> Result<(), AgriChatError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(session_key(session_id)).await?;
        let _: () = conn.del(meta_key(session_id)).await?;
        let _: () = conn
            .srem(user_sessions_key(user_id), session_id.to_string())
            .await?;
        Ok(())
    }
}
