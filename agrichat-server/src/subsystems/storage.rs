//! Storage subsystem — knowledge-base entries and plant-doctor diagnosis
//! reports. Records are validated at the boundary before any write.

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use agrichat_core::error::AgriChatError;
use agrichat_core::models::{DiagnosisReport, KnowledgeEntry, ReportPriority, ReportStatus};
use agrichat_core::SessionArchiver;

const KNOWLEDGE_COLUMNS: &str = "id, title, content, category, tags, author_id, view_count, \
                                 is_published, created_at, updated_at, archive_path";

const REPORT_COLUMNS: &str = "id, user_id, plant_type, symptoms, diagnosis, treatment, \
                              confidence, image_urls, status, priority, metadata, \
                              created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct NewKnowledgeEntry {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author_id: Option<String>,
    #[serde(default = "default_published")]
    pub is_published: bool,
    /// Upload a JSON copy of the entry to cloud storage after the insert.
    #[serde(default)]
    pub archive_to_cloud: bool,
}

fn default_published() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct NewDiagnosisReport {
    pub user_id: String,
    pub plant_type: Option<String>,
    pub symptoms: String,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub confidence: Option<i32>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub status: Option<ReportStatus>,
    pub priority: Option<ReportPriority>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct StorageService {
    pool: PgPool,
    archiver: Option<SessionArchiver>,
}

impl StorageService {
    pub fn new(pool: PgPool, archiver: Option<SessionArchiver>) -> Self {
        Self { pool, archiver }
    }

    pub async fn create_knowledge_entry(
        &self,
        new: NewKnowledgeEntry,
    ) -> Result<KnowledgeEntry, AgriChatError> {
        if new.title.trim().is_empty() {
            return Err(AgriChatError::Validation("title must not be empty".into()));
        }
        if new.content.trim().is_empty() {
            return Err(AgriChatError::Validation("content must not be empty".into()));
        }

        let archive_to_cloud = new.archive_to_cloud;
        let now = Utc::now();
        let mut entry = KnowledgeEntry {
            id: Uuid::new_v4(),
            title: new.title,
            content: new.content,
            category: new.category,
            tags: new.tags,
            author_id: new.author_id,
            view_count: 0,
            is_published: new.is_published,
            created_at: now,
            updated_at: now,
            archive_path: None,
        };

        sqlx::query(
            "INSERT INTO knowledge_entries \
             (id, title, content, category, tags, author_id, view_count, is_published, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.id)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.category)
        .bind(&entry.tags)
        .bind(&entry.author_id)
        .bind(entry.view_count)
        .bind(entry.is_published)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        if archive_to_cloud {
            self.archive_knowledge_to_cloud(&mut entry).await;
        }

        tracing::info!(entry_id = %entry.id, category = %entry.category, "Knowledge entry created");
        Ok(entry)
    }

    /// Best-effort cloud copy of a knowledge entry with an archive-path
    /// backlink. The entry already exists durably; upload or backlink
    /// failures are logged and swallowed.
    async fn archive_knowledge_to_cloud(&self, entry: &mut KnowledgeEntry) {
        let archiver = match &self.archiver {
            Some(a) => a,
            None => {
                tracing::warn!(entry_id = %entry.id, "Cloud archive requested but no archiver configured");
                return;
            }
        };

        let path = match archiver.archive_knowledge(entry).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(entry_id = %entry.id, error = %e, "Knowledge cloud archive failed");
                return;
            }
        };

        let backlink = sqlx::query("UPDATE knowledge_entries SET archive_path = $2 WHERE id = $1")
            .bind(entry.id)
            .bind(&path)
            .execute(&self.pool)
            .await;
        match backlink {
            Ok(_) => entry.archive_path = Some(path),
            Err(e) => {
                tracing::error!(entry_id = %entry.id, object = %path, error = %e,
                    "Knowledge archive backlink write failed");
            }
        }
    }

    pub async fn knowledge_entries(
        &self,
        category: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<KnowledgeEntry>, AgriChatError> {
        let rows = sqlx::query_as::<_, KnowledgeEntry>(&format!(
            "SELECT {} FROM knowledge_entries \
             WHERE category = COALESCE($1, category) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            KNOWLEDGE_COLUMNS
        ))
        .bind(category)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn create_report(
        &self,
        new: NewDiagnosisReport,
    ) -> Result<DiagnosisReport, AgriChatError> {
        let symptoms = new.symptoms.trim().to_string();
        if symptoms.chars().count() < 10 {
            return Err(AgriChatError::Validation(
                "symptoms description must be at least 10 characters long".into(),
            ));
        }
        if let Some(confidence) = new.confidence {
            if !(0..=100).contains(&confidence) {
                return Err(AgriChatError::Validation(
                    "confidence must be between 0 and 100".into(),
                ));
            }
        }

        let now = Utc::now();
        let report = DiagnosisReport {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            plant_type: new.plant_type,
            symptoms,
            diagnosis: new.diagnosis,
            treatment: new.treatment,
            confidence: new.confidence,
            image_urls: new.image_urls,
            status: new.status.unwrap_or(ReportStatus::Pending),
            priority: new.priority.unwrap_or(ReportPriority::Normal),
            metadata: new.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO diagnosis_reports \
             (id, user_id, plant_type, symptoms, diagnosis, treatment, confidence, image_urls, \
              status, priority, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(report.id)
        .bind(&report.user_id)
        .bind(&report.plant_type)
        .bind(&report.symptoms)
        .bind(&report.diagnosis)
        .bind(&report.treatment)
        .bind(report.confidence)
        .bind(&report.image_urls)
        .bind(report.status)
        .bind(report.priority)
        .bind(&report.metadata)
        .bind(report.created_at)
        .bind(report.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(report_id = %report.id, user_id = %report.user_id, "Diagnosis report created");
        Ok(report)
    }

    pub async fn reports(
        &self,
        user_id: Option<&str>,
        status: Option<ReportStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DiagnosisReport>, AgriChatError> {
        let rows = sqlx::query_as::<_, DiagnosisReport>(&format!(
            "SELECT {} FROM diagnosis_reports \
             WHERE user_id = COALESCE($1, user_id) AND status = COALESCE($2, status) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4",
            REPORT_COLUMNS
        ))
        .bind(user_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
