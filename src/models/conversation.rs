use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

text_enum!(
    MessageDirection {
        Inbound => "inbound",
        Outbound => "outbound",
    }
);

text_enum!(
    MessageType {
        Text => "text",
        Outreach => "outreach",
        Questionnaire => "questionnaire",
        TestTask => "test_task",
        TestSubmission => "test_submission",
        DeadlineExtension => "deadline_extension",
        BotReply => "bot_reply",
        Feedback => "feedback",
        Decision => "decision",
    }
);

/// One row of the append-only conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub request_id: Option<Uuid>,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(
        candidate_id: Uuid,
        request_id: Option<Uuid>,
        direction: MessageDirection,
        message_type: MessageType,
        content: impl Into<String>,
        metadata: JsonValue,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id,
            request_id,
            direction,
            message_type,
            content: content.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}
