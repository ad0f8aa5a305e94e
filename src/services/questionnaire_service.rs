use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use sqlx::types::Json;
use uuid::Uuid;

use crate::dto::cron_dto::{CronReport, ItemOutcome};
use crate::dto::public_dto::QuestionnaireView;
use crate::error::{Error, Result};
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch, QuestionnaireStatus};
use crate::models::conversation::MessageType;
use crate::models::hiring_request::HiringRequest;
use crate::models::pipeline::PipelineEvent;
use crate::models::questionnaire::{QuestionSnapshot, QuestionnaireResponse};
use crate::services::llm_service::{Prompt, PromptKind};
use crate::services::ServiceContext;
use crate::utils::ai_json::parse_json_object;
use crate::utils::token::{generate_access_token, LINK_TOKEN_LEN};

/// How long a questionnaire link stays valid.
pub const QUESTIONNAIRE_TTL_DAYS: i64 = 5;

#[derive(Clone)]
pub struct QuestionnaireService {
    ctx: ServiceContext,
}

impl QuestionnaireService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn access_url(&self, token: &str) -> String {
        self.ctx.link(&format!("questionnaire/{}", token))
    }

    /// 3 or 4 random active questions per configured competency, then the
    /// explicitly configured ones. First occurrence of a question wins.
    pub async fn select_questions(
        &self,
        request: &HiringRequest,
        rng: &mut StdRng,
    ) -> Result<Vec<QuestionSnapshot>> {
        let mut selected = Vec::new();

        for competency_id in &request.questionnaire_competency_ids {
            let mut pool = self
                .ctx
                .repos
                .questionnaires
                .active_questions_for_competency(*competency_id)
                .await?;
            pool.shuffle(rng);
            let count = rng.gen_range(3..=4);
            selected.extend(pool.iter().take(count).map(QuestionSnapshot::from));
        }

        if !request.questionnaire_question_ids.is_empty() {
            let explicit = self
                .ctx
                .repos
                .questionnaires
                .questions_by_ids(&request.questionnaire_question_ids)
                .await?;
            selected.extend(explicit.iter().map(QuestionSnapshot::from));
        }

        let mut seen = HashSet::new();
        selected.retain(|q| seen.insert(q.question_id));
        Ok(selected)
    }

    /// The pair's still open questionnaire, or a fresh one.
    pub async fn open_or_create(
        &self,
        candidate: &Candidate,
        request: &HiringRequest,
    ) -> Result<QuestionnaireResponse> {
        if let Some(open) = self
            .ctx
            .repos
            .questionnaires
            .find_open_response(candidate.id, request.id, Utc::now())
            .await?
        {
            tracing::debug!(questionnaire_id = %open.id, "Reusing open questionnaire");
            return Ok(open);
        }
        self.create(candidate, request).await
    }

    /// Stores a fresh token-addressed questionnaire for the candidate.
    pub async fn create(
        &self,
        candidate: &Candidate,
        request: &HiringRequest,
    ) -> Result<QuestionnaireResponse> {
        if !request.has_questionnaire() {
            return Err(Error::Precondition(format!(
                "Request {} has no questionnaire questions configured",
                request.id
            )));
        }

        let mut rng = StdRng::from_entropy();
        let questions = self.select_questions(request, &mut rng).await?;
        if questions.is_empty() {
            return Err(Error::Precondition(format!(
                "No active questionnaire questions for request {}",
                request.id
            )));
        }

        let sent_at = Utc::now();
        let response = QuestionnaireResponse {
            id: Uuid::new_v4(),
            candidate_id: candidate.id,
            request_id: request.id,
            token: generate_access_token(LINK_TOKEN_LEN),
            questions: Json(questions),
            answers: Json(BTreeMap::new()),
            status: QuestionnaireStatus::Sent,
            sent_at,
            expires_at: sent_at + Duration::days(QUESTIONNAIRE_TTL_DAYS),
            completed_at: None,
            ai_evaluation: None,
        };
        self.ctx
            .repos
            .questionnaires
            .insert_response(&response)
            .await?;
        tracing::info!(
            candidate_id = %candidate.id,
            request_id = %request.id,
            questions = response.questions.0.len(),
            "Questionnaire created"
        );
        Ok(response)
    }

    async fn by_token(&self, token: &str) -> Result<QuestionnaireResponse> {
        self.ctx
            .repos
            .questionnaires
            .get_response_by_token(token)
            .await?
            .ok_or_else(|| Error::NotFound("Questionnaire not found".to_string()))
    }

    /// Public view. The first open marks the questionnaire `in_progress`.
    pub async fn view(&self, token: &str) -> Result<QuestionnaireView> {
        let mut response = self.by_token(token).await?;
        if response.status == QuestionnaireStatus::Expired || response.is_expired(Utc::now()) {
            return Err(Error::Gone("Questionnaire link has expired".to_string()));
        }
        let candidate = self.ctx.candidate(response.candidate_id).await?;

        if response.status == QuestionnaireStatus::Sent
            && self
                .ctx
                .repos
                .questionnaires
                .transition_response(response.id, QuestionnaireStatus::Sent, QuestionnaireStatus::InProgress)
                .await?
        {
            response.status = QuestionnaireStatus::InProgress;
            let patch = CandidatePatch {
                questionnaire_status: Some(QuestionnaireStatus::InProgress),
                ..CandidatePatch::default()
            };
            let guard = CandidateGuard {
                questionnaire_status: Some(QuestionnaireStatus::Sent),
                ..CandidateGuard::default()
            };
            self.ctx
                .repos
                .candidates
                .patch(candidate.id, &patch, &guard)
                .await?;
        }

        Ok(QuestionnaireView {
            candidate_first_name: candidate.first_name().to_string(),
            status: response.status,
            expires_at: response.expires_at,
            questions: response.questions.0.clone(),
        })
    }

    pub async fn submit(
        &self,
        token: &str,
        answers: BTreeMap<Uuid, String>,
    ) -> Result<QuestionnaireResponse> {
        if answers.values().all(|a| a.trim().is_empty()) {
            return Err(Error::BadRequest("At least one answer is required".to_string()));
        }
        let mut response = self.by_token(token).await?;
        let now = Utc::now();
        match response.status {
            QuestionnaireStatus::Completed => {
                return Err(Error::Precondition(
                    "Questionnaire has already been submitted".to_string(),
                ))
            }
            QuestionnaireStatus::Expired | QuestionnaireStatus::Skipped => {
                return Err(Error::Gone("Questionnaire is no longer open".to_string()))
            }
            _ if response.is_expired(now) => {
                return Err(Error::Gone("Questionnaire link has expired".to_string()))
            }
            _ => {}
        }

        let known: HashSet<Uuid> = response.questions.0.iter().map(|q| q.question_id).collect();
        if let Some(unknown) = answers.keys().find(|id| !known.contains(id)) {
            return Err(Error::BadRequest(format!(
                "Question {} is not part of this questionnaire",
                unknown
            )));
        }

        if !self
            .ctx
            .repos
            .questionnaires
            .complete_response(response.id, &answers, now)
            .await?
        {
            return Err(Error::Precondition(
                "Questionnaire is no longer open for answers".to_string(),
            ));
        }
        response.answers = Json(answers);
        response.status = QuestionnaireStatus::Completed;
        response.completed_at = Some(now);

        let candidate = self.ctx.candidate(response.candidate_id).await?;
        self.ctx
            .patch_candidate(
                candidate.id,
                CandidatePatch {
                    questionnaire_status: Some(QuestionnaireStatus::Completed),
                    ..CandidatePatch::default()
                },
            )
            .await?;
        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::QuestionnaireCompleted)
            .await?;
        self.ctx
            .conversations
            .log_inbound(
                candidate.id,
                Some(response.request_id),
                MessageType::Questionnaire,
                "Анкету заповнено",
                json!({ "questionnaire_id": response.id, "answers": response.answers.0.len() }),
            )
            .await?;
        tracing::info!(candidate_id = %candidate.id, questionnaire_id = %response.id, "Questionnaire completed");
        Ok(response)
    }

    /// AI evaluation of completed questionnaires that have none yet.
    /// Failures stay unevaluated and are retried on the next pass.
    pub async fn evaluate_pending(&self, limit: i64) -> Result<CronReport> {
        let mut report = CronReport::default();
        let pending = self.ctx.repos.questionnaires.list_unevaluated(limit).await?;
        for response in pending {
            let outcome = match self.evaluate(&response).await {
                Ok(()) => ItemOutcome::Succeeded,
                Err(e) => {
                    tracing::error!(questionnaire_id = %response.id, error = %e, "Questionnaire evaluation failed");
                    ItemOutcome::Failed
                }
            };
            report.record(outcome);
        }
        Ok(report)
    }

    async fn evaluate(&self, response: &QuestionnaireResponse) -> Result<()> {
        let qa: Vec<_> = response
            .questions
            .0
            .iter()
            .map(|q| {
                json!({
                    "question": q.text,
                    "answer": response.answers.0.get(&q.question_id).cloned().unwrap_or_default()
                })
            })
            .collect();
        let request = self.ctx.request(response.request_id).await?;
        let prompt = Prompt::new(
            PromptKind::QuestionnaireEvaluation,
            "Ти HR-аналітик. Оціни відповіді кандидата на питання про soft skills. \
             Поверни JSON: {\"overall_score\": 1-10, \"summary\": \"...\"}.",
            json!({
                "request_title": request.title,
                "soft_skills": request.soft_skills,
                "answers": qa
            }),
        );
        let text = self.ctx.llm.generate(&prompt).await?;
        let evaluation: serde_json::Value = parse_json_object(&text)?;
        self.ctx
            .repos
            .questionnaires
            .set_evaluation(response.id, &evaluation)
            .await?;
        tracing::info!(questionnaire_id = %response.id, "Questionnaire evaluated");
        Ok(())
    }

    /// Marks overdue open questionnaires `expired`. Returns how many.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let overdue = self.ctx.repos.questionnaires.list_overdue(now).await?;
        let mut count = 0;
        for response in overdue {
            if !self
                .ctx
                .repos
                .questionnaires
                .transition_response(response.id, response.status, QuestionnaireStatus::Expired)
                .await?
            {
                // submitted in the meantime
                continue;
            }
            count += 1;
            if let Some(open) = self
                .ctx
                .repos
                .candidates
                .get(response.candidate_id)
                .await?
                .and_then(|c| c.questionnaire_status)
                .filter(QuestionnaireStatus::is_open)
            {
                let patch = CandidatePatch {
                    questionnaire_status: Some(QuestionnaireStatus::Expired),
                    ..CandidatePatch::default()
                };
                let guard = CandidateGuard {
                    questionnaire_status: Some(open),
                    ..CandidateGuard::default()
                };
                self.ctx
                    .repos
                    .candidates
                    .patch(response.candidate_id, &patch, &guard)
                    .await?;
            }
            tracing::info!(questionnaire_id = %response.id, "Questionnaire expired");
        }
        Ok(count)
    }
}
