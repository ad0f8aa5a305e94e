use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::pipeline::PipelineEvent;

text_enum!(
    ActionType {
        SendOutreach => "send_outreach",
        SendQuestionnaire => "send_questionnaire",
        SendTestTask => "send_test_task",
        SendInvite => "send_invite",
        SendRejection => "send_rejection",
    }
);

text_enum!(
    JobStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

impl ActionType {
    /// The pipeline event a successful run of this action produces.
    pub fn pipeline_event(&self) -> PipelineEvent {
        match self {
            ActionType::SendOutreach => PipelineEvent::OutreachSent,
            ActionType::SendQuestionnaire => PipelineEvent::QuestionnaireSent,
            ActionType::SendTestTask => PipelineEvent::TestTaskSent,
            ActionType::SendInvite => PipelineEvent::Invited,
            ActionType::SendRejection => PipelineEvent::Rejected,
        }
    }
}

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AutomationJob {
    pub id: Uuid,
    pub action_type: ActionType,
    pub candidate_id: Uuid,
    pub request_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub payload: JsonValue,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl AutomationJob {
    pub fn pending(
        action_type: ActionType,
        candidate_id: Uuid,
        request_id: Uuid,
        scheduled_for: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type,
            candidate_id,
            request_id,
            scheduled_for,
            status: JobStatus::Pending,
            payload,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}
