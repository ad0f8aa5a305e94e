use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::candidate::QuestionnaireStatus;

/// A soft-skill question in the bank, grouped by competency.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionBankItem {
    pub id: Uuid,
    pub competency_id: Uuid,
    pub text: String,
    pub is_active: bool,
}

/// Copy of a question as it looked when the questionnaire was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSnapshot {
    pub question_id: Uuid,
    pub competency_id: Option<Uuid>,
    pub text: String,
}

impl From<&QuestionBankItem> for QuestionSnapshot {
    fn from(item: &QuestionBankItem) -> Self {
        Self {
            question_id: item.id,
            competency_id: Some(item.competency_id),
            text: item.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuestionnaireResponse {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub request_id: Uuid,
    pub token: String,
    pub questions: Json<Vec<QuestionSnapshot>>,
    /// Free-text answers keyed by question id.
    pub answers: Json<BTreeMap<Uuid, String>>,
    pub status: QuestionnaireStatus,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ai_evaluation: Option<JsonValue>,
}

impl QuestionnaireResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
