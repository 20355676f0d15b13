use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single chat message. `seq` is the per-session ordering key, assigned from
/// the session's atomic message-count increment at write time; timestamps are
/// informational and never used to order messages.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
        let parsed: MessageRole = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(parsed, MessageRole::System);
    }

    #[test]
    fn message_json_round_trip() {
        let msg = ChatMessage {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            seq: 3,
            role: MessageRole::User,
            content: "leaves are yellow".to_string(),
            created_at: Utc::now(),
            metadata: serde_json::json!({"source": "mobile"}),
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.seq, 3);
        assert_eq!(decoded.content, msg.content);
    }
}
