use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

text_enum!(
    OutreachItemStatus {
        Scheduled => "scheduled",
        Processing => "processing",
        Sent => "sent",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

text_enum!(
    DeliveryMethod {
        Email => "email",
        Telegram => "telegram",
    }
);

/// Initial intro message to a warm candidate, sent at a humanized time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutreachQueueItem {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub request_id: Option<Uuid>,
    pub delivery_method: DeliveryMethod,
    pub subject: Option<String>,
    pub message: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: OutreachItemStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Edits a recruiter may make while an item is still `scheduled`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutreachItemUpdate {
    pub subject: Option<String>,
    pub message: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}
