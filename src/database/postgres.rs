use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::repositories::{
    AnalysisQueueRepository, AutomationQueueRepository, CandidateRepository,
    ConversationRepository, MatchRepository, OutreachQueueRepository, QuestionnaireRepository,
    RequestRepository,
};
use crate::error::Result;
use crate::models::analysis::AnalysisJob;
use crate::models::automation_job::{ActionType, AutomationJob, JobStatus};
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch, QuestionnaireStatus};
use crate::models::candidate_match::{CandidateRequestMatch, FinalDecision};
use crate::models::conversation::ConversationEntry;
use crate::models::hiring_request::HiringRequest;
use crate::models::outreach_item::{OutreachItemUpdate, OutreachQueueItem};
use crate::models::questionnaire::{QuestionBankItem, QuestionnaireResponse};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateRepository for PgStore {
    async fn insert(&self, c: &Candidate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candidates (
                id, full_name, email, phone, source, resume_text,
                pipeline_stage, outreach_status, preferred_contact_methods,
                telegram_username, telegram_chat_id, test_task_status,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(c.id)
        .bind(&c.full_name)
        .bind(&c.email)
        .bind(&c.phone)
        .bind(c.source)
        .bind(&c.resume_text)
        .bind(c.pipeline_stage)
        .bind(c.outreach_status)
        .bind(&c.preferred_contact_methods)
        .bind(&c.telegram_username)
        .bind(c.telegram_chat_id)
        .bind(c.test_task_status)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>> {
        let candidate = sqlx::query_as::<_, Candidate>(r#"SELECT * FROM candidates WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(candidate)
    }

    async fn find_by_chat(
        &self,
        chat_id: i64,
        username: Option<&str>,
    ) -> Result<Option<Candidate>> {
        let by_chat = sqlx::query_as::<_, Candidate>(
            r#"SELECT * FROM candidates WHERE telegram_chat_id = $1 ORDER BY created_at DESC LIMIT 1"#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        if by_chat.is_some() {
            return Ok(by_chat);
        }

        let Some(username) = username.map(|u| u.trim_start_matches('@')).filter(|u| !u.is_empty())
        else {
            return Ok(None);
        };
        let by_username = sqlx::query_as::<_, Candidate>(
            r#"
            SELECT * FROM candidates
            WHERE LOWER(LTRIM(telegram_username, '@')) = LOWER($1)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(by_username)
    }

    async fn find_by_test_token(&self, token: &str) -> Result<Option<Candidate>> {
        let candidate = sqlx::query_as::<_, Candidate>(
            r#"SELECT * FROM candidates WHERE test_task_token = $1"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(candidate)
    }

    async fn patch(
        &self,
        id: Uuid,
        p: &CandidatePatch,
        g: &CandidateGuard,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE candidates SET
                score = COALESCE($2, score),
                category = COALESCE($3, category),
                summary = COALESCE($4, summary),
                strengths = COALESCE($5, strengths),
                concerns = COALESCE($6, concerns),
                recommendation = COALESCE($7, recommendation),
                analyzed_at = COALESCE($8, analyzed_at),
                pipeline_stage = COALESCE($9, pipeline_stage),
                outreach_status = COALESCE($10, outreach_status),
                outreach_sent_at = COALESCE($11, outreach_sent_at),
                outreach_message_id = COALESCE($12, outreach_message_id),
                telegram_chat_id = COALESCE($13, telegram_chat_id),
                test_task_status = COALESCE($14, test_task_status),
                test_task_sent_at = COALESCE($15, test_task_sent_at),
                test_task_original_deadline = COALESCE($16, test_task_original_deadline),
                test_task_deadline = COALESCE($17, test_task_deadline),
                test_task_extensions = COALESCE($18, test_task_extensions),
                test_task_token = COALESCE($19, test_task_token),
                test_task_submission = COALESCE($20, test_task_submission),
                test_task_submitted_at = COALESCE($21, test_task_submitted_at),
                test_task_ai_score = COALESCE($22, test_task_ai_score),
                test_task_ai_evaluation = COALESCE($23, test_task_ai_evaluation),
                test_task_feedback = COALESCE($24, test_task_feedback),
                test_task_difficulty = COALESCE($25, test_task_difficulty),
                questionnaire_status = COALESCE($26, questionnaire_status),
                updated_at = NOW()
            WHERE id = $1
              AND ($27::text IS NULL OR pipeline_stage = $27)
              AND ($28::text IS NULL OR outreach_status = $28)
              AND ($29::text IS NULL OR test_task_status = $29)
              AND ($30::int IS NULL OR test_task_extensions = $30)
              AND ($31::text IS NULL OR questionnaire_status = $31)
            "#,
        )
        .bind(id)
        .bind(p.score)
        .bind(&p.category)
        .bind(&p.summary)
        .bind(&p.strengths)
        .bind(&p.concerns)
        .bind(&p.recommendation)
        .bind(p.analyzed_at)
        .bind(p.pipeline_stage)
        .bind(p.outreach_status)
        .bind(p.outreach_sent_at)
        .bind(p.outreach_message_id)
        .bind(p.telegram_chat_id)
        .bind(p.test_task_status)
        .bind(p.test_task_sent_at)
        .bind(p.test_task_original_deadline)
        .bind(p.test_task_deadline)
        .bind(p.test_task_extensions)
        .bind(&p.test_task_token)
        .bind(&p.test_task_submission)
        .bind(p.test_task_submitted_at)
        .bind(p.test_task_ai_score)
        .bind(&p.test_task_ai_evaluation)
        .bind(&p.test_task_feedback)
        .bind(&p.test_task_difficulty)
        .bind(p.questionnaire_status)
        .bind(g.pipeline_stage)
        .bind(g.outreach_status)
        .bind(g.test_task_status)
        .bind(g.test_task_extensions)
        .bind(g.questionnaire_status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_test_task(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE candidates
            SET test_task_status = 'scheduled', test_task_claimed_at = $2, updated_at = NOW()
            WHERE id = $1
              AND (
                test_task_status = 'not_sent'
                OR (test_task_status = 'scheduled'
                    AND (test_task_claimed_at IS NULL OR test_task_claimed_at < $3))
              )
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_test_task(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE candidates
            SET test_task_status = 'not_sent', test_task_claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND test_task_status = 'scheduled'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_submitted_test_tasks(&self, limit: i64) -> Result<Vec<Candidate>> {
        let rows = sqlx::query_as::<_, Candidate>(
            r#"
            SELECT * FROM candidates
            WHERE test_task_status IN ('submitted_on_time', 'submitted_late')
            ORDER BY test_task_submitted_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl RequestRepository for PgStore {
    async fn insert(&self, r: &HiringRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hiring_requests (
                id, title, description, skills, soft_skills, status,
                outreach_template, outreach_template_approved, test_task_url,
                test_task_deadline_days, questionnaire_competency_ids,
                questionnaire_question_ids, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(r.id)
        .bind(&r.title)
        .bind(&r.description)
        .bind(&r.skills)
        .bind(&r.soft_skills)
        .bind(r.status)
        .bind(&r.outreach_template)
        .bind(r.outreach_template_approved)
        .bind(&r.test_task_url)
        .bind(r.test_task_deadline_days)
        .bind(&r.questionnaire_competency_ids)
        .bind(&r.questionnaire_question_ids)
        .bind(r.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<HiringRequest>> {
        let request =
            sqlx::query_as::<_, HiringRequest>(r#"SELECT * FROM hiring_requests WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(request)
    }

    async fn list_active(&self) -> Result<Vec<HiringRequest>> {
        let rows = sqlx::query_as::<_, HiringRequest>(
            r#"SELECT * FROM hiring_requests WHERE status = 'active' ORDER BY created_at ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MatchRepository for PgStore {
    async fn upsert(&self, m: &CandidateRequestMatch) -> Result<CandidateRequestMatch> {
        let row = sqlx::query_as::<_, CandidateRequestMatch>(
            r#"
            INSERT INTO candidate_request_matches (
                id, candidate_id, request_id, match_score, explanation, missing,
                recommendation, status, final_decision, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (candidate_id, request_id) DO UPDATE SET
                match_score = EXCLUDED.match_score,
                explanation = EXCLUDED.explanation,
                missing = EXCLUDED.missing,
                recommendation = EXCLUDED.recommendation,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(m.id)
        .bind(m.candidate_id)
        .bind(m.request_id)
        .bind(m.match_score)
        .bind(&m.explanation)
        .bind(&m.missing)
        .bind(&m.recommendation)
        .bind(&m.status)
        .bind(m.final_decision)
        .bind(m.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CandidateRequestMatch>> {
        let row = sqlx::query_as::<_, CandidateRequestMatch>(
            r#"SELECT * FROM candidate_request_matches WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn best_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateRequestMatch>> {
        let row = sqlx::query_as::<_, CandidateRequestMatch>(
            r#"
            SELECT * FROM candidate_request_matches
            WHERE candidate_id = $1
            ORDER BY match_score DESC, updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_final_decision(
        &self,
        id: Uuid,
        decision: FinalDecision,
    ) -> Result<Option<CandidateRequestMatch>> {
        let row = sqlx::query_as::<_, CandidateRequestMatch>(
            r#"
            UPDATE candidate_request_matches
            SET final_decision = $2, status = 'decided', updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(decision)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl AutomationQueueRepository for PgStore {
    async fn find_active(
        &self,
        action_type: ActionType,
        candidate_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<AutomationJob>> {
        let row = sqlx::query_as::<_, AutomationJob>(
            r#"
            SELECT * FROM automation_queue
            WHERE action_type = $1 AND candidate_id = $2 AND request_id = $3
              AND status IN ('pending', 'processing')
            LIMIT 1
            "#,
        )
        .bind(action_type)
        .bind(candidate_id)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert(&self, job: &AutomationJob) -> Result<Option<AutomationJob>> {
        let row = sqlx::query_as::<_, AutomationJob>(
            r#"
            INSERT INTO automation_queue (
                id, action_type, candidate_id, request_id, scheduled_for,
                status, payload, retry_count, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.action_type)
        .bind(job.candidate_id)
        .bind(job.request_id)
        .bind(job.scheduled_for)
        .bind(job.status)
        .bind(&job.payload)
        .bind(job.retry_count)
        .bind(job.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AutomationJob>> {
        let row =
            sqlx::query_as::<_, AutomationJob>(r#"SELECT * FROM automation_queue WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<AutomationJob>> {
        let rows = sqlx::query_as::<_, AutomationJob>(
            r#"
            SELECT * FROM automation_queue
            WHERE status = 'pending' AND retry_count < $2 AND scheduled_for <= $1
            ORDER BY scheduled_for ASC, created_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<AutomationJob>> {
        let row = sqlx::query_as::<_, AutomationJob>(
            r#"
            UPDATE automation_queue SET status = 'processing'
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE automation_queue
            SET status = 'completed', error_message = NULL, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_count: i32,
        status: JobStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE automation_queue
            SET status = $2, retry_count = $3, error_message = $4, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(retry_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE automation_queue SET status = 'cancelled' WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<AutomationJob>> {
        let rows = sqlx::query_as::<_, AutomationJob>(
            r#"SELECT * FROM automation_queue WHERE candidate_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl OutreachQueueRepository for PgStore {
    async fn insert(&self, item: &OutreachQueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outreach_queue (
                id, candidate_id, request_id, delivery_method, subject, message,
                scheduled_for, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(item.id)
        .bind(item.candidate_id)
        .bind(item.request_id)
        .bind(item.delivery_method)
        .bind(&item.subject)
        .bind(&item.message)
        .bind(item.scheduled_for)
        .bind(item.status)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutreachQueueItem>> {
        let row =
            sqlx::query_as::<_, OutreachQueueItem>(r#"SELECT * FROM outreach_queue WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn find_active_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<OutreachQueueItem>> {
        let row = sqlx::query_as::<_, OutreachQueueItem>(
            r#"
            SELECT * FROM outreach_queue
            WHERE candidate_id = $1 AND status IN ('scheduled', 'processing')
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_scheduled(
        &self,
        id: Uuid,
        update: &OutreachItemUpdate,
    ) -> Result<Option<OutreachQueueItem>> {
        let row = sqlx::query_as::<_, OutreachQueueItem>(
            r#"
            UPDATE outreach_queue SET
                subject = COALESCE($2, subject),
                message = COALESCE($3, message),
                scheduled_for = COALESCE($4, scheduled_for),
                updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&update.subject)
        .bind(&update.message)
        .bind(update.scheduled_for)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn cancel(&self, id: Uuid) -> Result<Option<OutreachQueueItem>> {
        let row = sqlx::query_as::<_, OutreachQueueItem>(
            r#"
            UPDATE outreach_queue SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutreachQueueItem>> {
        let rows = sqlx::query_as::<_, OutreachQueueItem>(
            r#"
            UPDATE outreach_queue SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM outreach_queue
                WHERE status = 'scheduled' AND scheduled_for <= $1
                ORDER BY scheduled_for ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut rows = rows;
        rows.sort_by_key(|item| item.scheduled_for);
        Ok(rows)
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outreach_queue
            SET status = 'sent', sent_at = $2, error_message = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outreach_queue
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn append(&self, e: &ConversationEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candidate_conversations (
                id, candidate_id, request_id, direction, message_type, content, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(e.id)
        .bind(e.candidate_id)
        .bind(e.request_id)
        .bind(e.direction)
        .bind(e.message_type)
        .bind(&e.content)
        .bind(&e.metadata)
        .bind(e.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<ConversationEntry>> {
        let rows = sqlx::query_as::<_, ConversationEntry>(
            r#"
            SELECT * FROM candidate_conversations
            WHERE candidate_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn latest_request_id(&self, candidate_id: Uuid) -> Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT request_id FROM candidate_conversations
            WHERE candidate_id = $1 AND request_id IS NOT NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl QuestionnaireRepository for PgStore {
    async fn insert_question(&self, item: &QuestionBankItem) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO questionnaire_questions (id, competency_id, text, is_active) VALUES ($1, $2, $3, $4)"#,
        )
        .bind(item.id)
        .bind(item.competency_id)
        .bind(&item.text)
        .bind(item.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_questions_for_competency(
        &self,
        competency_id: Uuid,
    ) -> Result<Vec<QuestionBankItem>> {
        let rows = sqlx::query_as::<_, QuestionBankItem>(
            r#"SELECT * FROM questionnaire_questions WHERE competency_id = $1 AND is_active"#,
        )
        .bind(competency_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<QuestionBankItem>> {
        let rows = sqlx::query_as::<_, QuestionBankItem>(
            r#"SELECT * FROM questionnaire_questions WHERE id = ANY($1)"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        // keep the configured order
        let mut ordered = Vec::with_capacity(rows.len());
        for id in ids {
            if let Some(q) = rows.iter().find(|q| q.id == *id) {
                ordered.push(q.clone());
            }
        }
        Ok(ordered)
    }

    async fn insert_response(&self, r: &QuestionnaireResponse) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO questionnaire_responses (
                id, candidate_id, request_id, token, questions, answers,
                status, sent_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(r.id)
        .bind(r.candidate_id)
        .bind(r.request_id)
        .bind(&r.token)
        .bind(&r.questions)
        .bind(&r.answers)
        .bind(r.status)
        .bind(r.sent_at)
        .bind(r.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_response_by_token(&self, token: &str) -> Result<Option<QuestionnaireResponse>> {
        let row = sqlx::query_as::<_, QuestionnaireResponse>(
            r#"SELECT * FROM questionnaire_responses WHERE token = $1"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_open_response(
        &self,
        candidate_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QuestionnaireResponse>> {
        let row = sqlx::query_as::<_, QuestionnaireResponse>(
            r#"
            SELECT * FROM questionnaire_responses
            WHERE candidate_id = $1 AND request_id = $2
              AND status IN ('sent', 'in_progress') AND expires_at > $3
            ORDER BY sent_at DESC
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .bind(request_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_responses_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<QuestionnaireResponse>> {
        let rows = sqlx::query_as::<_, QuestionnaireResponse>(
            r#"SELECT * FROM questionnaire_responses WHERE candidate_id = $1 ORDER BY sent_at ASC"#,
        )
        .bind(candidate_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn transition_response(
        &self,
        id: Uuid,
        from: QuestionnaireStatus,
        to: QuestionnaireStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE questionnaire_responses SET status = $3 WHERE id = $1 AND status = $2"#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_response(
        &self,
        id: Uuid,
        answers: &BTreeMap<Uuid, String>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE questionnaire_responses
            SET answers = $2, status = 'completed', completed_at = $3
            WHERE id = $1 AND status IN ('sent', 'in_progress') AND expires_at > $3
            "#,
        )
        .bind(id)
        .bind(Json(answers))
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_unevaluated(&self, limit: i64) -> Result<Vec<QuestionnaireResponse>> {
        let rows = sqlx::query_as::<_, QuestionnaireResponse>(
            r#"
            SELECT * FROM questionnaire_responses
            WHERE status = 'completed' AND ai_evaluation IS NULL
            ORDER BY completed_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_evaluation(&self, id: Uuid, evaluation: &serde_json::Value) -> Result<()> {
        sqlx::query(r#"UPDATE questionnaire_responses SET ai_evaluation = $2 WHERE id = $1"#)
            .bind(id)
            .bind(evaluation)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<QuestionnaireResponse>> {
        let rows = sqlx::query_as::<_, QuestionnaireResponse>(
            r#"
            SELECT * FROM questionnaire_responses
            WHERE status IN ('sent', 'in_progress') AND expires_at <= $1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AnalysisQueueRepository for PgStore {
    async fn find_active(&self, candidate_id: Uuid) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query_as::<_, AnalysisJob>(
            r#"
            SELECT * FROM analysis_queue
            WHERE candidate_id = $1 AND status IN ('pending', 'processing')
            LIMIT 1
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert(&self, job: &AnalysisJob) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query_as::<_, AnalysisJob>(
            r#"
            INSERT INTO analysis_queue (id, candidate_id, status, retry_count, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.candidate_id)
        .bind(job.status)
        .bind(job.retry_count)
        .bind(job.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn claim_due(&self, limit: i64, max_retries: i32) -> Result<Vec<AnalysisJob>> {
        let mut rows = sqlx::query_as::<_, AnalysisJob>(
            r#"
            UPDATE analysis_queue SET status = 'processing'
            WHERE id IN (
                SELECT id FROM analysis_queue
                WHERE status = 'pending' AND retry_count < $2
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;
        rows.sort_by_key(|job| job.created_at);
        Ok(rows)
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analysis_queue
            SET status = 'completed', error_message = NULL, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_count: i32,
        status: JobStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analysis_queue
            SET status = $2, retry_count = $3, error_message = $4, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(retry_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
