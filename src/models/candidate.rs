use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::pipeline::PipelineStage;

text_enum!(
    CandidateSource {
        Warm => "warm",
        Cold => "cold",
    }
);

text_enum!(
    OutreachStatus {
        Pending => "pending",
        Scheduled => "scheduled",
        Sent => "sent",
        Responded => "responded",
        Declined => "declined",
        Cancelled => "cancelled",
    }
);

text_enum!(
    TestTaskStatus {
        NotSent => "not_sent",
        Scheduled => "scheduled",
        Sent => "sent",
        SubmittedOnTime => "submitted_on_time",
        SubmittedLate => "submitted_late",
        Evaluating => "evaluating",
        Evaluated => "evaluated",
        Approved => "approved",
        Rejected => "rejected",
    }
);

text_enum!(
    QuestionnaireStatus {
        Sent => "sent",
        InProgress => "in_progress",
        Completed => "completed",
        Expired => "expired",
        Skipped => "skipped",
    }
);

impl TestTaskStatus {
    /// A task the candidate has been given and has not yet handed in.
    pub fn is_awaiting_submission(&self) -> bool {
        matches!(self, TestTaskStatus::Sent)
    }

    pub fn is_submitted(&self) -> bool {
        matches!(
            self,
            TestTaskStatus::SubmittedOnTime
                | TestTaskStatus::SubmittedLate
                | TestTaskStatus::Evaluating
                | TestTaskStatus::Evaluated
                | TestTaskStatus::Approved
                | TestTaskStatus::Rejected
        )
    }
}

impl QuestionnaireStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, QuestionnaireStatus::Sent | QuestionnaireStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Candidate {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: CandidateSource,
    pub resume_text: Option<String>,

    pub score: Option<i32>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub recommendation: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,

    pub pipeline_stage: PipelineStage,

    pub outreach_status: OutreachStatus,
    pub outreach_sent_at: Option<DateTime<Utc>>,
    pub outreach_message_id: Option<i64>,
    /// Stored as submitted by the form: an array, a JSON-encoded string or null.
    pub preferred_contact_methods: Option<JsonValue>,
    pub telegram_username: Option<String>,
    pub telegram_chat_id: Option<i64>,

    pub test_task_status: TestTaskStatus,
    /// When the current `scheduled` claim was taken.
    pub test_task_claimed_at: Option<DateTime<Utc>>,
    pub test_task_sent_at: Option<DateTime<Utc>>,
    pub test_task_original_deadline: Option<DateTime<Utc>>,
    pub test_task_deadline: Option<DateTime<Utc>>,
    pub test_task_extensions: i32,
    pub test_task_token: Option<String>,
    pub test_task_submission: Option<String>,
    pub test_task_submitted_at: Option<DateTime<Utc>>,
    pub test_task_ai_score: Option<i32>,
    pub test_task_ai_evaluation: Option<String>,
    pub test_task_feedback: Option<String>,
    pub test_task_difficulty: Option<String>,

    pub questionnaire_status: Option<QuestionnaireStatus>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(full_name: impl Into<String>, source: CandidateSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            full_name: full_name.into(),
            email: None,
            phone: None,
            source,
            resume_text: None,
            score: None,
            category: None,
            summary: None,
            strengths: Vec::new(),
            concerns: Vec::new(),
            recommendation: None,
            analyzed_at: None,
            pipeline_stage: PipelineStage::New,
            outreach_status: OutreachStatus::Pending,
            outreach_sent_at: None,
            outreach_message_id: None,
            preferred_contact_methods: None,
            telegram_username: None,
            telegram_chat_id: None,
            test_task_status: TestTaskStatus::NotSent,
            test_task_claimed_at: None,
            test_task_sent_at: None,
            test_task_original_deadline: None,
            test_task_deadline: None,
            test_task_extensions: 0,
            test_task_token: None,
            test_task_submission: None,
            test_task_submitted_at: None,
            test_task_ai_score: None,
            test_task_ai_evaluation: None,
            test_task_feedback: None,
            test_task_difficulty: None,
            questionnaire_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn first_name(&self) -> &str {
        self.full_name
            .split_whitespace()
            .next()
            .unwrap_or(self.full_name.as_str())
    }

    /// Telegram handle without the leading `@`, if any.
    pub fn telegram_handle(&self) -> Option<&str> {
        self.telegram_username
            .as_deref()
            .map(|u| u.trim().trim_start_matches('@'))
            .filter(|u| !u.is_empty())
    }
}

/// Column-level write to a candidate row. `None` leaves the column as stored,
/// so concurrent writers touching other columns never undo each other.
#[derive(Debug, Clone, Default)]
pub struct CandidatePatch {
    pub score: Option<i32>,
    pub category: Option<String>,
    pub summary: Option<String>,
    pub strengths: Option<Vec<String>>,
    pub concerns: Option<Vec<String>>,
    pub recommendation: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,

    pub pipeline_stage: Option<PipelineStage>,

    pub outreach_status: Option<OutreachStatus>,
    pub outreach_sent_at: Option<DateTime<Utc>>,
    pub outreach_message_id: Option<i64>,
    pub telegram_chat_id: Option<i64>,

    pub test_task_status: Option<TestTaskStatus>,
    pub test_task_sent_at: Option<DateTime<Utc>>,
    pub test_task_original_deadline: Option<DateTime<Utc>>,
    pub test_task_deadline: Option<DateTime<Utc>>,
    pub test_task_extensions: Option<i32>,
    pub test_task_token: Option<String>,
    pub test_task_submission: Option<String>,
    pub test_task_submitted_at: Option<DateTime<Utc>>,
    pub test_task_ai_score: Option<i32>,
    pub test_task_ai_evaluation: Option<String>,
    pub test_task_feedback: Option<String>,
    pub test_task_difficulty: Option<String>,

    pub questionnaire_status: Option<QuestionnaireStatus>,
}

/// Values the stored row must still hold for a patch to apply.
/// `None` matches anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateGuard {
    pub pipeline_stage: Option<PipelineStage>,
    pub outreach_status: Option<OutreachStatus>,
    pub test_task_status: Option<TestTaskStatus>,
    pub test_task_extensions: Option<i32>,
    pub questionnaire_status: Option<QuestionnaireStatus>,
}

impl CandidateGuard {
    pub fn stage(stage: PipelineStage) -> Self {
        Self {
            pipeline_stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn test_task(status: TestTaskStatus) -> Self {
        Self {
            test_task_status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, c: &Candidate) -> bool {
        self.pipeline_stage.map_or(true, |v| c.pipeline_stage == v)
            && self.outreach_status.map_or(true, |v| c.outreach_status == v)
            && self.test_task_status.map_or(true, |v| c.test_task_status == v)
            && self.test_task_extensions.map_or(true, |v| c.test_task_extensions == v)
            && self
                .questionnaire_status
                .map_or(true, |v| c.questionnaire_status == Some(v))
    }
}

impl CandidatePatch {
    /// Applies the set fields to an in-memory row.
    pub fn apply_to(&self, c: &mut Candidate) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }
        set_opt(&mut c.score, &self.score);
        set_opt(&mut c.category, &self.category);
        set_opt(&mut c.summary, &self.summary);
        set(&mut c.strengths, &self.strengths);
        set(&mut c.concerns, &self.concerns);
        set_opt(&mut c.recommendation, &self.recommendation);
        set_opt(&mut c.analyzed_at, &self.analyzed_at);
        set(&mut c.pipeline_stage, &self.pipeline_stage);
        set(&mut c.outreach_status, &self.outreach_status);
        set_opt(&mut c.outreach_sent_at, &self.outreach_sent_at);
        set_opt(&mut c.outreach_message_id, &self.outreach_message_id);
        set_opt(&mut c.telegram_chat_id, &self.telegram_chat_id);
        set(&mut c.test_task_status, &self.test_task_status);
        set_opt(&mut c.test_task_sent_at, &self.test_task_sent_at);
        set_opt(&mut c.test_task_original_deadline, &self.test_task_original_deadline);
        set_opt(&mut c.test_task_deadline, &self.test_task_deadline);
        set(&mut c.test_task_extensions, &self.test_task_extensions);
        set_opt(&mut c.test_task_token, &self.test_task_token);
        set_opt(&mut c.test_task_submission, &self.test_task_submission);
        set_opt(&mut c.test_task_submitted_at, &self.test_task_submitted_at);
        set_opt(&mut c.test_task_ai_score, &self.test_task_ai_score);
        set_opt(&mut c.test_task_ai_evaluation, &self.test_task_ai_evaluation);
        set_opt(&mut c.test_task_feedback, &self.test_task_feedback);
        set_opt(&mut c.test_task_difficulty, &self.test_task_difficulty);
        if self.questionnaire_status.is_some() {
            c.questionnaire_status = self.questionnaire_status;
        }
    }
}
