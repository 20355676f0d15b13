//! Session service — orchestrates the durable store, the cache mirror and the
//! blob archiver for the session lifecycle (create, append, read, archive,
//! delete).
//!
//! Ownership rules:
//! - The service is the sole writer of session/message lifecycle fields.
//! - The store is truth; the cache only reflects it with a staleness bound
//!   equal to the configured TTL. Cache writes after a successful durable
//!   write are best-effort: logged and swallowed.
//! - Message ordering is the per-session `seq` counter taken from the atomic
//!   message-count increment, never wall-clock timestamps.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use agrichat_core::error::AgriChatError;
use agrichat_core::models::{
    ChatMessage, ChatSession, MessageRole, SessionCategory, SessionStatus,
};
use agrichat_core::supervisor::ChatResponder;
use agrichat_core::{CacheClient, SessionArchiver};

const SESSION_COLUMNS: &str = "id, user_id, category, status, created_at, updated_at, \
                               archived_at, message_count, metadata, archive_path, archive_pending";

const MESSAGE_COLUMNS: &str = "id, session_id, seq, role, content, created_at, metadata";

#[derive(Clone)]
pub struct SessionService {
    pool: PgPool,
    cache: CacheClient,
    archiver: Option<SessionArchiver>,
}

/// Per-user session statistics.
#[derive(Debug, Serialize)]
pub struct SessionStatistics {
    pub active_sessions: i64,
    pub archived_sessions: i64,
    pub total_messages: i64,
    pub categories: HashMap<String, i64>,
}

/// Result of a full chat interaction (user message plus routed reply).
#[derive(Debug, Serialize)]
pub struct Interaction {
    pub session_id: Uuid,
    pub category: SessionCategory,
    pub user_message: ChatMessage,
    pub bot_response: ChatMessage,
}

impl SessionService {
    pub fn new(pool: PgPool, cache: CacheClient, archiver: Option<SessionArchiver>) -> Self {
        Self {
            pool,
            cache,
            archiver,
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Create a session: durable insert, then a best-effort cache mirror of
    /// the metadata with TTL.
    pub async fn create_session(
        &self,
        user_id: &str,
        category: SessionCategory,
        metadata: Option<serde_json::Value>,
    ) -> Result<ChatSession, AgriChatError> {
        let now = Utc::now();
        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            category,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            archived_at: None,
            message_count: 0,
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
            archive_path: None,
            archive_pending: false,
        };

        sqlx::query(
            "INSERT INTO chat_sessions \
             (id, user_id, category, status, created_at, updated_at, message_count, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id)
        .bind(&session.user_id)
        .bind(session.category)
        .bind(session.status)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.message_count)
        .bind(&session.metadata)
        .execute(&self.pool)
        .await?;

        if let Err(e) = self.cache.store_session_meta(&session).await {
            tracing::warn!(session_id = %session.id, error = %e, "Cache mirror of new session failed");
        }

        tracing::info!(session_id = %session.id, user_id = user_id, category = category.as_str(), "Session created");
        Ok(session)
    }

    // ========================================================================
    // Append
    // ========================================================================

    /// Append a message. One transaction covers the atomic message-count
    /// increment (which also yields the ordering key) and the message insert;
    /// the three cache operations afterwards are best-effort and unsynchronized.
    /// Returns `None` when the session does not exist or is not active.
    pub async fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Option<ChatMessage>, AgriChatError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE chat_sessions \
             SET message_count = message_count + 1, updated_at = now() \
             WHERE id = $1 AND status = 'active' \
             RETURNING message_count",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let seq = match row {
            Some((seq,)) => seq,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            seq,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
        };

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, seq, role, content, created_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.seq)
        .bind(message.role)
        .bind(&message.content)
        .bind(message.created_at)
        .bind(&message.metadata)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Err(e) = self.cache.push_message(&message).await {
            tracing::warn!(session_id = %session_id, error = %e, "Cache mirror of message failed");
        }

        Ok(Some(message))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Chat history, cache-first. The cached view only ever holds the last N
    /// messages (N = cache cap); the store fallback has no such bound.
    pub async fn get_history(
        &self,
        session_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ChatMessage>, AgriChatError> {
        match self.cache.history(&session_id).await {
            Ok(mut cached) if !cached.is_empty() => {
                if let Some(limit) = limit {
                    cached.truncate(limit.max(0) as usize);
                }
                return Ok(cached);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Cache history read failed, falling back to store");
            }
        }

        self.store_history(session_id, limit).await
    }

    /// Full history straight from the durable store, ordered by `seq`.
    pub async fn store_history(
        &self,
        session_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ChatMessage>, AgriChatError> {
        let rows = sqlx::query_as::<_, ChatMessage>(&format!(
            "SELECT {} FROM chat_messages WHERE session_id = $1 ORDER BY seq ASC LIMIT $2",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Session record, cache-first with store fallback.
    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<ChatSession>, AgriChatError> {
        match self.cache.session_meta(&session_id).await {
            Ok(Some(session)) => return Ok(Some(session)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Cache metadata read failed, falling back to store");
            }
        }
        self.store_session(session_id).await
    }

    async fn store_session(&self, session_id: Uuid) -> Result<Option<ChatSession>, AgriChatError> {
        let row = sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {} FROM chat_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Active sessions for a user. The cache result, when it resolves to
    /// anything, is trusted wholesale; any cache failure or emptiness falls
    /// back to a store query. No reconciliation between the two.
    pub async fn get_active_sessions(
        &self,
        user_id: &str,
    ) -> Result<Vec<ChatSession>, AgriChatError> {
        match self.cached_active_sessions(user_id).await {
            Ok(sessions) if !sessions.is_empty() => return Ok(sessions),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id = user_id, error = %e, "Cache active-session read failed, falling back to store");
            }
        }

        let rows = sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {} FROM chat_sessions \
             WHERE user_id = $1 AND status = 'active' \
             ORDER BY updated_at DESC",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn cached_active_sessions(
        &self,
        user_id: &str,
    ) -> Result<Vec<ChatSession>, AgriChatError> {
        let ids = self.cache.user_active_sessions(user_id).await?;
        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.cache.session_meta(&id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Historical sessions (archived by default) from the store only.
    pub async fn get_session_archive_list(
        &self,
        user_id: &str,
        category: Option<SessionCategory>,
        status: SessionStatus,
        limit: i64,
    ) -> Result<Vec<ChatSession>, AgriChatError> {
        let rows = sqlx::query_as::<_, ChatSession>(&format!(
            "SELECT {} FROM chat_sessions \
             WHERE user_id = $1 AND status = $2 AND category = COALESCE($3, category) \
             ORDER BY updated_at DESC LIMIT $4",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .bind(status)
        .bind(category)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Archive / delete
    // ========================================================================

    /// Archive a session. Returns `false` (not an error) when the session does
    /// not exist or is not active. With `to_cloud`, the pending marker is set
    /// before the upload and cleared only by a confirmed backlink write, so a
    /// crash in between leaves a detectable state instead of a silent gap.
    /// Cache entries are removed synchronously as the final step.
    pub async fn archive_session(
        &self,
        session_id: Uuid,
        user_id: &str,
        to_cloud: bool,
    ) -> Result<bool, AgriChatError> {
        let mut session = match self.store_session(session_id).await? {
            Some(s) => s,
            None => {
                tracing::warn!(session_id = %session_id, "Archive requested for unknown session");
                return Ok(false);
            }
        };
        if session.status != SessionStatus::Active {
            tracing::warn!(session_id = %session_id, "Archive requested for non-active session");
            return Ok(false);
        }

        // The status guard makes the transition atomic: of two concurrent
        // archive calls that both pass the read check, only one flips the row.
        let archived_at = Utc::now();
        let result = sqlx::query(
            "UPDATE chat_sessions SET status = 'archived', archived_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'active'",
        )
        .bind(session_id)
        .bind(archived_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            tracing::warn!(session_id = %session_id, "Archive lost the transition race");
            return Ok(false);
        }

        session.status = SessionStatus::Archived;
        session.archived_at = Some(archived_at);
        session.updated_at = archived_at;

        if to_cloud {
            if let Some(archiver) = &self.archiver {
                self.archive_to_cloud(archiver, &session).await?;
            } else {
                tracing::warn!(session_id = %session_id, "Cloud archive requested but no archiver configured");
            }
        }

        if let Err(e) = self.cache.remove_session(&session_id, user_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Cache purge after archive failed");
        }

        tracing::info!(session_id = %session_id, "Session archived");
        Ok(true)
    }

    async fn archive_to_cloud(
        &self,
        archiver: &SessionArchiver,
        session: &ChatSession,
    ) -> Result<(), AgriChatError> {
        sqlx::query("UPDATE chat_sessions SET archive_pending = TRUE WHERE id = $1")
            .bind(session.id)
            .execute(&self.pool)
            .await?;

        let messages = self.store_history(session.id, None).await?;

        match archiver.archive_session(session, &messages).await {
            Ok(path) => {
                // The object exists; a failed backlink write is logged only and
                // leaves the pending marker set for later recovery.
                let backlink = sqlx::query(
                    "UPDATE chat_sessions SET archive_path = $2, archive_pending = FALSE \
                     WHERE id = $1",
                )
                .bind(session.id)
                .bind(&path)
                .execute(&self.pool)
                .await;
                if let Err(e) = backlink {
                    tracing::error!(session_id = %session.id, object = %path, error = %e,
                        "Archive backlink write failed, pending marker left set");
                }
            }
            Err(e) => {
                // The marker stays set: a session that is archived with no
                // blob path and archive_pending still TRUE is the detectable
                // "cloud archive incomplete" state.
                tracing::error!(session_id = %session.id, error = %e,
                    "Cloud archive upload failed, pending marker left set");
            }
        }
        Ok(())
    }

    /// Delete a session. The ownership check is an equality test after a read,
    /// not atomic with the delete. Hard delete removes messages and the
    /// session record as two independent statements — a failure in between
    /// leaves orphaned messages, which is accepted. Returns `false` on
    /// not-found or ownership mismatch.
    pub async fn delete_session(
        &self,
        session_id: Uuid,
        user_id: &str,
        hard: bool,
    ) -> Result<bool, AgriChatError> {
        let session = match self.store_session(session_id).await? {
            Some(s) => s,
            None => return Ok(false),
        };
        if session.user_id != user_id {
            tracing::warn!(session_id = %session_id, user_id = user_id, "Delete refused: not the owner");
            return Ok(false);
        }

        if hard {
            sqlx::query("DELETE FROM chat_messages WHERE session_id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
            sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query(
                "UPDATE chat_sessions SET status = 'deleted', updated_at = now() WHERE id = $1",
            )
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        }

        if let Err(e) = self.cache.remove_session(&session_id, user_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Cache purge after delete failed");
        }

        tracing::info!(session_id = %session_id, hard = hard, "Session deleted");
        Ok(true)
    }

    // ========================================================================
    // Statistics / interaction
    // ========================================================================

    pub async fn get_statistics(&self, user_id: &str) -> Result<SessionStatistics, AgriChatError> {
        let (active_sessions,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_sessions WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let (archived_sessions,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_sessions WHERE user_id = $1 AND status = 'archived'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let (total_messages,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM chat_messages m \
             JOIN chat_sessions s ON s.id = m.session_id \
             WHERE s.user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<(SessionCategory, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM chat_sessions WHERE user_id = $1 GROUP BY category",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        let categories = rows
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), count))
            .collect();

        Ok(SessionStatistics {
            active_sessions,
            archived_sessions,
            total_messages,
            categories,
        })
    }

    /// Full chat interaction: store the user message, obtain the assistant
    /// reply from the responder, store that too. Returns `None` when the
    /// session does not exist, is not active, or is not owned by `user_id`.
    pub async fn handle_interaction(
        &self,
        session_id: Uuid,
        user_id: &str,
        text: &str,
        responder: &dyn ChatResponder,
    ) -> Result<Option<Interaction>, AgriChatError> {
        let session = match self.get_session(session_id).await? {
            Some(s) => s,
            None => return Ok(None),
        };
        if session.user_id != user_id {
            tracing::warn!(session_id = %session_id, user_id = user_id, "Message refused: not the owner");
            return Ok(None);
        }

        let user_message = match self
            .append_message(session_id, MessageRole::User, text, None)
            .await?
        {
            Some(m) => m,
            None => return Ok(None),
        };

        let reply = responder
            .respond(session.category, text)
            .await
            .map_err(|e| AgriChatError::Other(format!("responder failed: {}", e)))?;

        let bot_response = match self
            .append_message(session_id, MessageRole::Assistant, &reply, None)
            .await?
        {
            Some(m) => m,
            // The session vanished between the two appends; surface not-found.
            None => return Ok(None),
        };

        Ok(Some(Interaction {
            session_id,
            category: session.category,
            user_message,
            bot_response,
        }))
    }
}
