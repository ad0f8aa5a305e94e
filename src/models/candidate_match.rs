use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::automation_job::ActionType;

text_enum!(
    FinalDecision {
        Invite => "invite",
        Reject => "reject",
    }
);

impl FinalDecision {
    pub fn action_type(&self) -> ActionType {
        match self {
            FinalDecision::Invite => ActionType::SendInvite,
            FinalDecision::Reject => ActionType::SendRejection,
        }
    }
}

/// Scored (candidate, request) pairing. Unique per pair, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateRequestMatch {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub request_id: Uuid,
    pub match_score: i32,
    pub explanation: Option<String>,
    pub missing: Vec<String>,
    pub recommendation: Option<String>,
    pub status: String,
    pub final_decision: Option<FinalDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRequestMatch {
    pub fn new(candidate_id: Uuid, request_id: Uuid, match_score: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            candidate_id,
            request_id,
            match_score,
            explanation: None,
            missing: Vec::new(),
            recommendation: None,
            status: "new".to_string(),
            final_decision: None,
            created_at: now,
            updated_at: now,
        }
    }
}
