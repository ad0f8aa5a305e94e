//! Process-local store with the same claim and dedup semantics as the
//! Postgres one. Used by the test suite and for running without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::database::repositories::{
    AnalysisQueueRepository, AutomationQueueRepository, CandidateRepository,
    ConversationRepository, MatchRepository, OutreachQueueRepository, QuestionnaireRepository,
    RequestRepository,
};
use crate::error::{Error, Result};
use crate::models::analysis::AnalysisJob;
use crate::models::automation_job::{ActionType, AutomationJob, JobStatus};
use crate::models::candidate::{
    Candidate, CandidateGuard, CandidatePatch, QuestionnaireStatus, TestTaskStatus,
};
use crate::models::candidate_match::{CandidateRequestMatch, FinalDecision};
use crate::models::conversation::ConversationEntry;
use crate::models::hiring_request::{HiringRequest, RequestStatus};
use crate::models::outreach_item::{OutreachItemStatus, OutreachItemUpdate, OutreachQueueItem};
use crate::models::questionnaire::{QuestionBankItem, QuestionnaireResponse};

#[derive(Default)]
struct Tables {
    candidates: Vec<Candidate>,
    requests: Vec<HiringRequest>,
    matches: Vec<CandidateRequestMatch>,
    automation: Vec<AutomationJob>,
    outreach: Vec<OutreachQueueItem>,
    conversations: Vec<ConversationEntry>,
    questions: Vec<QuestionBankItem>,
    responses: Vec<QuestionnaireResponse>,
    analysis: Vec<AnalysisJob>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }
}

fn duplicate_key(table: &str) -> Error {
    Error::Internal(format!("duplicate key in {}", table))
}

#[async_trait]
impl CandidateRepository for MemoryStore {
    async fn insert(&self, candidate: &Candidate) -> Result<()> {
        let mut t = self.lock()?;
        if t.candidates.iter().any(|c| c.id == candidate.id) {
            return Err(duplicate_key("candidates"));
        }
        t.candidates.push(candidate.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>> {
        Ok(self.lock()?.candidates.iter().find(|c| c.id == id).cloned())
    }

    async fn find_by_chat(
        &self,
        chat_id: i64,
        username: Option<&str>,
    ) -> Result<Option<Candidate>> {
        let t = self.lock()?;
        let newest_first = || {
            let mut all: Vec<&Candidate> = t.candidates.iter().collect();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            all
        };
        if let Some(c) = newest_first()
            .into_iter()
            .find(|c| c.telegram_chat_id == Some(chat_id))
        {
            return Ok(Some(c.clone()));
        }
        let Some(username) = username.map(|u| u.trim_start_matches('@')).filter(|u| !u.is_empty())
        else {
            return Ok(None);
        };
        Ok(newest_first()
            .into_iter()
            .find(|c| {
                c.telegram_handle()
                    .is_some_and(|h| h.eq_ignore_ascii_case(username))
            })
            .cloned())
    }

    async fn find_by_test_token(&self, token: &str) -> Result<Option<Candidate>> {
        Ok(self
            .lock()?
            .candidates
            .iter()
            .find(|c| c.test_task_token.as_deref() == Some(token))
            .cloned())
    }

    async fn patch(
        &self,
        id: Uuid,
        patch: &CandidatePatch,
        guard: &CandidateGuard,
    ) -> Result<bool> {
        let mut t = self.lock()?;
        match t.candidates.iter_mut().find(|c| c.id == id) {
            Some(c) if guard.matches(c) => {
                patch.apply_to(c);
                c.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_test_task(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.lock()?;
        let Some(c) = t.candidates.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        let claimable = match c.test_task_status {
            TestTaskStatus::NotSent => true,
            TestTaskStatus::Scheduled => c.test_task_claimed_at.map_or(true, |at| at < stale_before),
            _ => false,
        };
        if claimable {
            c.test_task_status = TestTaskStatus::Scheduled;
            c.test_task_claimed_at = Some(now);
            c.updated_at = now;
        }
        Ok(claimable)
    }

    async fn release_test_task(&self, id: Uuid) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(c) = t
            .candidates
            .iter_mut()
            .find(|c| c.id == id && c.test_task_status == TestTaskStatus::Scheduled)
        {
            c.test_task_status = TestTaskStatus::NotSent;
            c.test_task_claimed_at = None;
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_submitted_test_tasks(&self, limit: i64) -> Result<Vec<Candidate>> {
        let t = self.lock()?;
        let mut rows: Vec<Candidate> = t
            .candidates
            .iter()
            .filter(|c| {
                matches!(
                    c.test_task_status,
                    TestTaskStatus::SubmittedOnTime | TestTaskStatus::SubmittedLate
                )
            })
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.test_task_submitted_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl RequestRepository for MemoryStore {
    async fn insert(&self, request: &HiringRequest) -> Result<()> {
        let mut t = self.lock()?;
        if t.requests.iter().any(|r| r.id == request.id) {
            return Err(duplicate_key("hiring_requests"));
        }
        t.requests.push(request.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<HiringRequest>> {
        Ok(self.lock()?.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<HiringRequest>> {
        let t = self.lock()?;
        let mut rows: Vec<HiringRequest> = t
            .requests
            .iter()
            .filter(|r| r.status == RequestStatus::Active)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }
}

#[async_trait]
impl MatchRepository for MemoryStore {
    async fn upsert(&self, m: &CandidateRequestMatch) -> Result<CandidateRequestMatch> {
        let mut t = self.lock()?;
        if let Some(existing) = t
            .matches
            .iter_mut()
            .find(|x| x.candidate_id == m.candidate_id && x.request_id == m.request_id)
        {
            existing.match_score = m.match_score;
            existing.explanation = m.explanation.clone();
            existing.missing = m.missing.clone();
            existing.recommendation = m.recommendation.clone();
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }
        t.matches.push(m.clone());
        Ok(m.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<CandidateRequestMatch>> {
        Ok(self.lock()?.matches.iter().find(|m| m.id == id).cloned())
    }

    async fn best_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<CandidateRequestMatch>> {
        let t = self.lock()?;
        Ok(t.matches
            .iter()
            .filter(|m| m.candidate_id == candidate_id)
            .max_by(|a, b| {
                a.match_score
                    .cmp(&b.match_score)
                    .then(a.updated_at.cmp(&b.updated_at))
            })
            .cloned())
    }

    async fn set_final_decision(
        &self,
        id: Uuid,
        decision: FinalDecision,
    ) -> Result<Option<CandidateRequestMatch>> {
        let mut t = self.lock()?;
        Ok(t.matches.iter_mut().find(|m| m.id == id).map(|m| {
            m.final_decision = Some(decision);
            m.status = "decided".to_string();
            m.updated_at = Utc::now();
            m.clone()
        }))
    }
}

#[async_trait]
impl AutomationQueueRepository for MemoryStore {
    async fn find_active(
        &self,
        action_type: ActionType,
        candidate_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<AutomationJob>> {
        let t = self.lock()?;
        Ok(t.automation
            .iter()
            .find(|j| {
                j.action_type == action_type
                    && j.candidate_id == candidate_id
                    && j.request_id == request_id
                    && j.status.is_active()
            })
            .cloned())
    }

    async fn insert(&self, job: &AutomationJob) -> Result<Option<AutomationJob>> {
        let mut t = self.lock()?;
        let conflict = job.status.is_active()
            && t.automation.iter().any(|j| {
                j.action_type == job.action_type
                    && j.candidate_id == job.candidate_id
                    && j.request_id == job.request_id
                    && j.status.is_active()
            });
        if conflict || t.automation.iter().any(|j| j.id == job.id) {
            return Ok(None);
        }
        t.automation.push(job.clone());
        Ok(Some(job.clone()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<AutomationJob>> {
        Ok(self.lock()?.automation.iter().find(|j| j.id == id).cloned())
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<AutomationJob>> {
        let t = self.lock()?;
        let mut rows: Vec<AutomationJob> = t
            .automation
            .iter()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && j.retry_count < max_retries
                    && j.scheduled_for <= now
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.scheduled_for
                .cmp(&b.scheduled_for)
                .then(a.created_at.cmp(&b.created_at))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<AutomationJob>> {
        let mut t = self.lock()?;
        Ok(t.automation
            .iter_mut()
            .find(|j| j.id == id && j.status == JobStatus::Pending)
            .map(|j| {
                j.status = JobStatus::Processing;
                j.clone()
            }))
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(j) = t.automation.iter_mut().find(|j| j.id == id) {
            j.status = JobStatus::Completed;
            j.error_message = None;
            j.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_count: i32,
        status: JobStatus,
    ) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(j) = t.automation.iter_mut().find(|j| j.id == id) {
            j.status = status;
            j.retry_count = retry_count;
            j.error_message = Some(error.to_string());
            j.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> Result<bool> {
        let mut t = self.lock()?;
        match t
            .automation
            .iter_mut()
            .find(|j| j.id == id && j.status == JobStatus::Pending)
        {
            Some(j) => {
                j.status = JobStatus::Cancelled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<AutomationJob>> {
        let t = self.lock()?;
        let mut rows: Vec<AutomationJob> = t
            .automation
            .iter()
            .filter(|j| j.candidate_id == candidate_id)
            .cloned()
            .collect();
        rows.sort_by_key(|j| j.created_at);
        Ok(rows)
    }
}

#[async_trait]
impl OutreachQueueRepository for MemoryStore {
    async fn insert(&self, item: &OutreachQueueItem) -> Result<()> {
        let mut t = self.lock()?;
        if t.outreach.iter().any(|i| i.id == item.id) {
            return Err(duplicate_key("outreach_queue"));
        }
        t.outreach.push(item.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutreachQueueItem>> {
        Ok(self.lock()?.outreach.iter().find(|i| i.id == id).cloned())
    }

    async fn find_active_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Option<OutreachQueueItem>> {
        let t = self.lock()?;
        Ok(t.outreach
            .iter()
            .find(|i| {
                i.candidate_id == candidate_id
                    && matches!(
                        i.status,
                        OutreachItemStatus::Scheduled | OutreachItemStatus::Processing
                    )
            })
            .cloned())
    }

    async fn update_scheduled(
        &self,
        id: Uuid,
        update: &OutreachItemUpdate,
    ) -> Result<Option<OutreachQueueItem>> {
        let mut t = self.lock()?;
        Ok(t.outreach
            .iter_mut()
            .find(|i| i.id == id && i.status == OutreachItemStatus::Scheduled)
            .map(|i| {
                if let Some(subject) = &update.subject {
                    i.subject = Some(subject.clone());
                }
                if let Some(message) = &update.message {
                    i.message = message.clone();
                }
                if let Some(at) = update.scheduled_for {
                    i.scheduled_for = at;
                }
                i.updated_at = Utc::now();
                i.clone()
            }))
    }

    async fn cancel(&self, id: Uuid) -> Result<Option<OutreachQueueItem>> {
        let mut t = self.lock()?;
        Ok(t.outreach
            .iter_mut()
            .find(|i| i.id == id && i.status == OutreachItemStatus::Scheduled)
            .map(|i| {
                i.status = OutreachItemStatus::Cancelled;
                i.updated_at = Utc::now();
                i.clone()
            }))
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutreachQueueItem>> {
        let mut t = self.lock()?;
        let mut due: Vec<&mut OutreachQueueItem> = t
            .outreach
            .iter_mut()
            .filter(|i| i.status == OutreachItemStatus::Scheduled && i.scheduled_for <= now)
            .collect();
        due.sort_by_key(|i| i.scheduled_for);
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|i| {
                i.status = OutreachItemStatus::Processing;
                i.updated_at = Utc::now();
                i.clone()
            })
            .collect())
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(i) = t.outreach.iter_mut().find(|i| i.id == id) {
            i.status = OutreachItemStatus::Sent;
            i.sent_at = Some(sent_at);
            i.error_message = None;
            i.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(i) = t.outreach.iter_mut().find(|i| i.id == id) {
            i.status = OutreachItemStatus::Failed;
            i.error_message = Some(error.to_string());
            i.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn append(&self, entry: &ConversationEntry) -> Result<()> {
        self.lock()?.conversations.push(entry.clone());
        Ok(())
    }

    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<ConversationEntry>> {
        let t = self.lock()?;
        Ok(t.conversations
            .iter()
            .filter(|e| e.candidate_id == candidate_id)
            .cloned()
            .collect())
    }

    async fn latest_request_id(&self, candidate_id: Uuid) -> Result<Option<Uuid>> {
        let t = self.lock()?;
        Ok(t.conversations
            .iter()
            .rev()
            .filter(|e| e.candidate_id == candidate_id)
            .find_map(|e| e.request_id))
    }
}

#[async_trait]
impl QuestionnaireRepository for MemoryStore {
    async fn insert_question(&self, item: &QuestionBankItem) -> Result<()> {
        self.lock()?.questions.push(item.clone());
        Ok(())
    }

    async fn active_questions_for_competency(
        &self,
        competency_id: Uuid,
    ) -> Result<Vec<QuestionBankItem>> {
        let t = self.lock()?;
        Ok(t.questions
            .iter()
            .filter(|q| q.competency_id == competency_id && q.is_active)
            .cloned()
            .collect())
    }

    async fn questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<QuestionBankItem>> {
        let t = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| t.questions.iter().find(|q| q.id == *id).cloned())
            .collect())
    }

    async fn insert_response(&self, response: &QuestionnaireResponse) -> Result<()> {
        let mut t = self.lock()?;
        if t.responses.iter().any(|r| r.token == response.token) {
            return Err(duplicate_key("questionnaire_responses"));
        }
        t.responses.push(response.clone());
        Ok(())
    }

    async fn get_response_by_token(&self, token: &str) -> Result<Option<QuestionnaireResponse>> {
        Ok(self
            .lock()?
            .responses
            .iter()
            .find(|r| r.token == token)
            .cloned())
    }

    async fn find_open_response(
        &self,
        candidate_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QuestionnaireResponse>> {
        let t = self.lock()?;
        Ok(t.responses
            .iter()
            .filter(|r| {
                r.candidate_id == candidate_id
                    && r.request_id == request_id
                    && r.status.is_open()
                    && !r.is_expired(now)
            })
            .max_by_key(|r| r.sent_at)
            .cloned())
    }

    async fn list_responses_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<QuestionnaireResponse>> {
        let t = self.lock()?;
        let mut rows: Vec<QuestionnaireResponse> = t
            .responses
            .iter()
            .filter(|r| r.candidate_id == candidate_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.sent_at);
        Ok(rows)
    }

    async fn transition_response(
        &self,
        id: Uuid,
        from: QuestionnaireStatus,
        to: QuestionnaireStatus,
    ) -> Result<bool> {
        let mut t = self.lock()?;
        match t.responses.iter_mut().find(|r| r.id == id && r.status == from) {
            Some(r) => {
                r.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_response(
        &self,
        id: Uuid,
        answers: &BTreeMap<Uuid, String>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut t = self.lock()?;
        match t
            .responses
            .iter_mut()
            .find(|r| r.id == id && r.status.is_open() && !r.is_expired(completed_at))
        {
            Some(r) => {
                r.answers = Json(answers.clone());
                r.status = QuestionnaireStatus::Completed;
                r.completed_at = Some(completed_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_unevaluated(&self, limit: i64) -> Result<Vec<QuestionnaireResponse>> {
        let t = self.lock()?;
        let mut rows: Vec<QuestionnaireResponse> = t
            .responses
            .iter()
            .filter(|r| r.status == QuestionnaireStatus::Completed && r.ai_evaluation.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.completed_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn set_evaluation(&self, id: Uuid, evaluation: &serde_json::Value) -> Result<()> {
        let mut t = self.lock()?;
        let slot = t
            .responses
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::NotFound("Questionnaire not found".to_string()))?;
        slot.ai_evaluation = Some(evaluation.clone());
        Ok(())
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<QuestionnaireResponse>> {
        let t = self.lock()?;
        let mut rows: Vec<QuestionnaireResponse> = t
            .responses
            .iter()
            .filter(|r| r.status.is_open() && r.expires_at <= now)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.expires_at);
        Ok(rows)
    }
}

#[async_trait]
impl AnalysisQueueRepository for MemoryStore {
    async fn find_active(&self, candidate_id: Uuid) -> Result<Option<AnalysisJob>> {
        let t = self.lock()?;
        Ok(t.analysis
            .iter()
            .find(|j| j.candidate_id == candidate_id && j.status.is_active())
            .cloned())
    }

    async fn insert(&self, job: &AnalysisJob) -> Result<Option<AnalysisJob>> {
        let mut t = self.lock()?;
        if t
            .analysis
            .iter()
            .any(|j| j.candidate_id == job.candidate_id && j.status.is_active())
        {
            return Ok(None);
        }
        t.analysis.push(job.clone());
        Ok(Some(job.clone()))
    }

    async fn claim_due(&self, limit: i64, max_retries: i32) -> Result<Vec<AnalysisJob>> {
        let mut t = self.lock()?;
        let mut due: Vec<&mut AnalysisJob> = t
            .analysis
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending && j.retry_count < max_retries)
            .collect();
        due.sort_by_key(|j| j.created_at);
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|j| {
                j.status = JobStatus::Processing;
                j.clone()
            })
            .collect())
    }

    async fn complete(&self, id: Uuid) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(j) = t.analysis.iter_mut().find(|j| j.id == id) {
            j.status = JobStatus::Completed;
            j.error_message = None;
            j.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_count: i32,
        status: JobStatus,
    ) -> Result<()> {
        let mut t = self.lock()?;
        if let Some(j) = t.analysis.iter_mut().find(|j| j.id == id) {
            j.status = status;
            j.retry_count = retry_count;
            j.error_message = Some(error.to_string());
            j.processed_at = Some(Utc::now());
        }
        Ok(())
    }
}
