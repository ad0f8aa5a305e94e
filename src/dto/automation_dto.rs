use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::models::automation_job::{ActionType, AutomationJob};
use crate::models::candidate_match::FinalDecision;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EnqueueJobRequest {
    pub action_type: ActionType,
    pub candidate_id: Uuid,
    pub request_id: Uuid,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub payload: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EnqueueJobResponse {
    Enqueued { job: AutomationJob },
    Duplicate { existing_job_id: Option<Uuid> },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelJobResponse {
    pub cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub decision: FinalDecision,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OutreachUpdateRequest {
    #[validate(length(min = 1, max = 200))]
    pub subject: Option<String>,
    #[validate(length(min = 1, max = 4000))]
    pub message: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TestTaskReviewRequest {
    pub approved: bool,
    #[validate(length(max = 4000))]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisEnqueueResponse {
    pub enqueued: bool,
}
