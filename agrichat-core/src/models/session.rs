use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed vocabulary of assistance categories a session is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionCategory {
    General,
    PlantDoctor,
    Knowledge,
}

impl SessionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCategory::General => "general",
            SessionCategory::PlantDoctor => "plant_doctor",
            SessionCategory::Knowledge => "knowledge",
        }
    }
}

/// Session lifecycle. Transitions are active -> archived or active -> deleted;
/// archived and deleted records are immutable apart from the archive backlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: String,
    pub category: SessionCategory,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub metadata: serde_json::Value,
    pub archive_path: Option<String>,
    /// Set before a cloud archive upload starts and cleared only once the
    /// backlink write is confirmed, so a crash leaves a detectable state.
    pub archive_pending: bool,
}
