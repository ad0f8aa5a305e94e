use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::candidate::{QuestionnaireStatus, TestTaskStatus};
use crate::models::questionnaire::QuestionSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct QuestionnaireView {
    pub candidate_first_name: String,
    pub status: QuestionnaireStatus,
    pub expires_at: DateTime<Utc>,
    pub questions: Vec<QuestionSnapshot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitQuestionnaireRequest {
    pub answers: BTreeMap<Uuid, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitQuestionnaireResponse {
    pub status: QuestionnaireStatus,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitTestTaskRequest {
    #[validate(length(min = 1, max = 20000))]
    pub submission: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitTestTaskResponse {
    pub status: TestTaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub on_time: bool,
}
