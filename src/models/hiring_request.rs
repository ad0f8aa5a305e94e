use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

text_enum!(
    RequestStatus {
        Active => "active",
        Paused => "paused",
        Closed => "closed",
    }
);

/// A hiring requisition. Read-mostly from the automation core's side.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HiringRequest {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub skills: Vec<String>,
    pub soft_skills: Vec<String>,
    pub status: RequestStatus,
    pub outreach_template: Option<String>,
    pub outreach_template_approved: bool,
    pub test_task_url: Option<String>,
    pub test_task_deadline_days: i32,
    pub questionnaire_competency_ids: Vec<Uuid>,
    pub questionnaire_question_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl HiringRequest {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            skills: Vec::new(),
            soft_skills: Vec::new(),
            status: RequestStatus::Active,
            outreach_template: None,
            outreach_template_approved: false,
            test_task_url: None,
            test_task_deadline_days: 3,
            questionnaire_competency_ids: Vec::new(),
            questionnaire_question_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The outreach template, only once a recruiter has approved it.
    pub fn approved_template(&self) -> Option<&str> {
        if !self.outreach_template_approved {
            return None;
        }
        self.outreach_template
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn has_questionnaire(&self) -> bool {
        !self.questionnaire_competency_ids.is_empty() || !self.questionnaire_question_ids.is_empty()
    }
}
