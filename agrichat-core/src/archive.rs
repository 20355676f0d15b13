//! Session archiver — gzip-compressed JSON snapshots in cloud object storage.
//!
//! Uploads go through the GCS JSON media-upload endpoint via reqwest. The
//! archiver only produces the object; the session service owns the
//! pending-marker / backlink protocol around it.

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::Client;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

use crate::config::ArchiveConfig;
use crate::error::AgriChatError;
use crate::models::{ChatMessage, ChatSession, KnowledgeEntry};

const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// Payload written to the archive object.
#[derive(Debug, Serialize)]
struct ArchivePayload<'a> {
    session: &'a ChatSession,
    messages: &'a [ChatMessage],
    archived_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionArchiver {
    client: Client,
    bucket: String,
    access_token: Option<String>,
    base_url: String,
}

/// Date-partitioned object name: `chat_sessions/{yyyy}/{mm}/{dd}/{id}.json.gz`.
pub fn object_name(session: &ChatSession, at: DateTime<Utc>) -> String {
    format!(
        "chat_sessions/{}/{}.json.gz",
        at.format("%Y/%m/%d"),
        session.id
    )
}

/// Knowledge entries are archived uncompressed:
/// `knowledge_entries/{yyyy}/{mm}/{dd}/{id}.json`.
pub fn knowledge_object_name(entry: &KnowledgeEntry, at: DateTime<Utc>) -> String {
    format!(
        "knowledge_entries/{}/{}.json",
        at.format("%Y/%m/%d"),
        entry.id
    )
}

impl SessionArchiver {
    pub fn new(config: &ArchiveConfig) -> Result<Self, AgriChatError> {
        Self::with_base_url(config, GCS_BASE_URL.to_string())
    }

    /// Create an archiver against a custom endpoint (for testing).
    pub fn with_base_url(
        config: &ArchiveConfig,
        base_url: String,
    ) -> Result<Self, AgriChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            access_token: config.access_token.clone(),
            base_url,
        })
    }

    /// Serialize, compress and upload a session snapshot. Returns the object
    /// name on success; a single attempt, no retry.
    pub async fn archive_session(
        &self,
        session: &ChatSession,
        messages: &[ChatMessage],
    ) -> Result<String, AgriChatError> {
        let archived_at = Utc::now();
        let name = object_name(session, archived_at);

        let payload = ArchivePayload {
            session,
            messages,
            archived_at,
        };
        let body = compress_json(&payload)?;
        self.upload(&name, body, "application/gzip").await?;

        tracing::info!(session_id = %session.id, object = %name, "Session archived to cloud storage");
        Ok(name)
    }

    /// Upload a knowledge entry as plain JSON. Returns the object name.
    pub async fn archive_knowledge(
        &self,
        entry: &KnowledgeEntry,
    ) -> Result<String, AgriChatError> {
        let name = knowledge_object_name(entry, Utc::now());
        let body = serde_json::to_vec_pretty(entry)?;
        self.upload(&name, body, "application/json").await?;

        tracing::info!(entry_id = %entry.id, object = %name, "Knowledge entry archived to cloud storage");
        Ok(name)
    }

    async fn upload(
        &self,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), AgriChatError> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url, self.bucket, name
        );

        let mut request = self
            .client
            .post(&url)
            .header("content-type", content_type)
            .body(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "Archive upload failed");
            return Err(AgriChatError::Other(format!(
                "archive upload failed ({}): {}",
                status, body
            )));
        }
        Ok(())
    }
}

fn compress_json<T: Serialize>(value: &T) -> Result<Vec<u8>, AgriChatError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageRole, SessionCategory, SessionStatus};
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_session() -> ChatSession {
        let now = Utc::now();
        ChatSession {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            category: SessionCategory::PlantDoctor,
            status: SessionStatus::Archived,
            created_at: now,
            updated_at: now,
            archived_at: Some(now),
            message_count: 1,
            metadata: serde_json::json!({"plant_type": "tomato"}),
            archive_path: None,
            archive_pending: true,
        }
    }

    fn test_message(session_id: Uuid) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            seq: 1,
            role: MessageRole::User,
            content: "leaves are yellow".to_string(),
            created_at: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn object_name_is_date_partitioned() {
        let mut session = test_session();
        session.id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(
            object_name(&session, at),
            "chat_sessions/2026/03/07/00000000-0000-0000-0000-000000000000.json.gz"
        );
    }

    #[test]
    fn compressed_payload_decompresses_to_original_json() {
        let session = test_session();
        let messages = vec![test_message(session.id)];
        let payload = ArchivePayload {
            session: &session,
            messages: &messages,
            archived_at: Utc::now(),
        };

        let compressed = compress_json(&payload).expect("compress");
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut decoded = String::new();
        decoder.read_to_string(&mut decoded).expect("gunzip");

        let value: serde_json::Value = serde_json::from_str(&decoded).expect("json");
        assert_eq!(value["session"]["user_id"], "u1");
        assert_eq!(value["messages"][0]["content"], "leaves are yellow");
        assert!(value["archived_at"].is_string());
    }

    #[tokio::test]
    async fn upload_hits_media_endpoint_and_returns_object_name() {
        let mock_server = MockServer::start().await;
        let config = ArchiveConfig {
            bucket: "test-bucket".to_string(),
            access_token: Some("token-123".to_string()),
        };
        let archiver =
            SessionArchiver::with_base_url(&config, mock_server.uri()).expect("archiver");

        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/test-bucket/o"))
            .and(query_param("uploadType", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bucket": "test-bucket"
            })))
            .mount(&mock_server)
            .await;

        let session = test_session();
        let messages = vec![test_message(session.id)];
        let name = archiver
            .archive_session(&session, &messages)
            .await
            .expect("upload should succeed");

        assert!(name.starts_with("chat_sessions/"));
        assert!(name.ends_with(&format!("{}.json.gz", session.id)));
    }

    fn test_entry() -> KnowledgeEntry {
        let now = Utc::now();
        KnowledgeEntry {
            id: Uuid::new_v4(),
            title: "Drip irrigation basics".to_string(),
            content: "Delivers water directly to the root zone.".to_string(),
            category: "irrigation".to_string(),
            tags: vec!["water".to_string()],
            author_id: None,
            view_count: 0,
            is_published: true,
            created_at: now,
            updated_at: now,
            archive_path: None,
        }
    }

    #[test]
    fn knowledge_object_name_is_date_partitioned_and_uncompressed() {
        let mut entry = test_entry();
        entry.id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(
            knowledge_object_name(&entry, at),
            "knowledge_entries/2026/03/07/00000000-0000-0000-0000-000000000000.json"
        );
    }

    #[tokio::test]
    async fn knowledge_upload_sends_plain_json() {
        let mock_server = MockServer::start().await;
        let config = ArchiveConfig {
            bucket: "test-bucket".to_string(),
            access_token: None,
        };
        let archiver =
            SessionArchiver::with_base_url(&config, mock_server.uri()).expect("archiver");

        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/test-bucket/o"))
            .and(query_param("uploadType", "media"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let entry = test_entry();
        let name = archiver
            .archive_knowledge(&entry)
            .await
            .expect("upload should succeed");
        assert!(name.starts_with("knowledge_entries/"));
        assert!(name.ends_with(&format!("{}.json", entry.id)));
    }

    #[tokio::test]
    async fn upload_error_is_propagated() {
        let mock_server = MockServer::start().await;
        let config = ArchiveConfig {
            bucket: "test-bucket".to_string(),
            access_token: None,
        };
        let archiver =
            SessionArchiver::with_base_url(&config, mock_server.uri()).expect("archiver");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
            .mount(&mock_server)
            .await;

        let session = test_session();
        let result = archiver.archive_session(&session, &[]).await;
        assert!(result.is_err(), "503 must surface as an error");
    }
}
