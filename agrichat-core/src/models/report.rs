use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Diagnosed,
    Reviewed,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReportPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Plant-doctor diagnosis report. Symptom text is validated at the boundary
/// (trimmed, at least 10 characters) before any write.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DiagnosisReport {
    pub id: Uuid,
    pub user_id: String,
    pub plant_type: Option<String>,
    pub symptoms: String,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    /// 0-100 when present.
    pub confidence: Option<i32>,
    pub image_urls: Vec<String>,
    pub status: ReportStatus,
    pub priority: ReportPriority,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_is_closed() {
        let parsed: ReportStatus = serde_json::from_str("\"diagnosed\"").unwrap();
        assert_eq!(parsed, ReportStatus::Diagnosed);
        assert!(serde_json::from_str::<ReportStatus>("\"archived\"").is_err());
    }

    #[test]
    fn priority_defaults_via_caller_not_serde() {
        assert_eq!(
            serde_json::to_string(&ReportPriority::Normal).unwrap(),
            "\"normal\""
        );
    }
}
