use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::automation_job::JobStatus;

/// Queue entry asking for a candidate to be scored and matched.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub status: JobStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn pending(candidate_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            candidate_id,
            status: JobStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// Candidate assessment as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: i32,
    pub category: String,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub recommendation: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Candidate-to-request fit as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_score: i32,
    #[serde(default)]
    pub alignment: String,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}
