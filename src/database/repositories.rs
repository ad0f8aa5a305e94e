//! Typed persistence seams. Services only ever talk to these traits; the
//! Postgres store backs them in production and the in-memory store in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::memory::MemoryStore;
use crate::database::postgres::PgStore;
use crate::error::Result;
use crate::models::analysis::AnalysisJob;
use crate::models::automation_job::{ActionType, AutomationJob, JobStatus};
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch, QuestionnaireStatus};
use crate::models::candidate_match::{CandidateRequestMatch, FinalDecision};
use crate::models::conversation::ConversationEntry;
use crate::models::hiring_request::HiringRequest;
use crate::models::outreach_item::{OutreachItemUpdate, OutreachQueueItem};
use crate::models::questionnaire::{QuestionBankItem, QuestionnaireResponse};

#[async_trait]
pub trait CandidateRepository: Send + Sync {
    async fn insert(&self, candidate: &Candidate) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Candidate>>;
    /// Resolves a Telegram sender: by chat id first, then by username.
    async fn find_by_chat(&self, chat_id: i64, username: Option<&str>)
        -> Result<Option<Candidate>>;
    async fn find_by_test_token(&self, token: &str) -> Result<Option<Candidate>>;
    /// Writes the set columns of `patch` if the row still satisfies `guard`.
    /// False when the row is missing or the guard no longer holds.
    async fn patch(&self, id: Uuid, patch: &CandidatePatch, guard: &CandidateGuard)
        -> Result<bool>;
    /// `not_sent -> scheduled`, or takes over a `scheduled` claim taken
    /// before `stale_before`. False when a live claim or a sent task exists.
    async fn claim_test_task(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;
    /// `scheduled -> not_sent`, after a failed send.
    async fn release_test_task(&self, id: Uuid) -> Result<()>;
    async fn list_submitted_test_tasks(&self, limit: i64) -> Result<Vec<Candidate>>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, request: &HiringRequest) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<HiringRequest>>;
    async fn list_active(&self) -> Result<Vec<HiringRequest>>;
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Inserts or refreshes the scores of the (candidate, request) pair.
    /// Workflow status and final decision of an existing row are kept.
    async fn upsert(&self, m: &CandidateRequestMatch) -> Result<CandidateRequestMatch>;
    async fn get(&self, id: Uuid) -> Result<Option<CandidateRequestMatch>>;
    async fn best_for_candidate(&self, candidate_id: Uuid)
        -> Result<Option<CandidateRequestMatch>>;
    async fn set_final_decision(
        &self,
        id: Uuid,
        decision: FinalDecision,
    ) -> Result<Option<CandidateRequestMatch>>;
}

#[async_trait]
pub trait AutomationQueueRepository: Send + Sync {
    /// A `pending` or `processing` job for the triple, if one exists.
    async fn find_active(
        &self,
        action_type: ActionType,
        candidate_id: Uuid,
        request_id: Uuid,
    ) -> Result<Option<AutomationJob>>;
    /// `None` when a concurrent producer inserted the same active triple.
    async fn insert(&self, job: &AutomationJob) -> Result<Option<AutomationJob>>;
    async fn get(&self, id: Uuid) -> Result<Option<AutomationJob>>;
    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<AutomationJob>>;
    /// Atomic `pending -> processing`. `None` if the job was not pending.
    async fn claim(&self, id: Uuid) -> Result<Option<AutomationJob>>;
    async fn complete(&self, id: Uuid) -> Result<()>;
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_count: i32,
        status: JobStatus,
    ) -> Result<()>;
    /// Atomic `pending -> cancelled`.
    async fn cancel(&self, id: Uuid) -> Result<bool>;
    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<AutomationJob>>;
}

#[async_trait]
pub trait OutreachQueueRepository: Send + Sync {
    async fn insert(&self, item: &OutreachQueueItem) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<OutreachQueueItem>>;
    async fn find_active_for_candidate(&self, candidate_id: Uuid)
        -> Result<Option<OutreachQueueItem>>;
    /// Applies the edit only while the item is `scheduled`.
    async fn update_scheduled(
        &self,
        id: Uuid,
        update: &OutreachItemUpdate,
    ) -> Result<Option<OutreachQueueItem>>;
    /// `scheduled -> cancelled`.
    async fn cancel(&self, id: Uuid) -> Result<Option<OutreachQueueItem>>;
    /// Atomically moves due `scheduled` items to `processing`, oldest first.
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<OutreachQueueItem>>;
    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<()>;
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn append(&self, entry: &ConversationEntry) -> Result<()>;
    async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<ConversationEntry>>;
    /// Request referenced by the most recent entry that carries one.
    async fn latest_request_id(&self, candidate_id: Uuid) -> Result<Option<Uuid>>;
}

#[async_trait]
pub trait QuestionnaireRepository: Send + Sync {
    async fn insert_question(&self, item: &QuestionBankItem) -> Result<()>;
    async fn active_questions_for_competency(
        &self,
        competency_id: Uuid,
    ) -> Result<Vec<QuestionBankItem>>;
    async fn questions_by_ids(&self, ids: &[Uuid]) -> Result<Vec<QuestionBankItem>>;
    async fn insert_response(&self, response: &QuestionnaireResponse) -> Result<()>;
    async fn get_response_by_token(&self, token: &str) -> Result<Option<QuestionnaireResponse>>;
    /// The newest `sent`/`in_progress` response of the pair that has not expired.
    async fn find_open_response(
        &self,
        candidate_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QuestionnaireResponse>>;
    async fn list_responses_for_candidate(
        &self,
        candidate_id: Uuid,
    ) -> Result<Vec<QuestionnaireResponse>>;
    /// `from -> to`. False when the status already moved on.
    async fn transition_response(
        &self,
        id: Uuid,
        from: QuestionnaireStatus,
        to: QuestionnaireStatus,
    ) -> Result<bool>;
    /// Stores the answers and marks the response `completed`, only while it
    /// is still open and unexpired at `completed_at`.
    async fn complete_response(
        &self,
        id: Uuid,
        answers: &BTreeMap<Uuid, String>,
        completed_at: DateTime<Utc>,
    ) -> Result<bool>;
    /// Completed responses without an AI evaluation, oldest first.
    async fn list_unevaluated(&self, limit: i64) -> Result<Vec<QuestionnaireResponse>>;
    async fn set_evaluation(&self, id: Uuid, evaluation: &serde_json::Value) -> Result<()>;
    /// Responses still `sent`/`in_progress` whose `expires_at` has passed.
    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<QuestionnaireResponse>>;
}

#[async_trait]
pub trait AnalysisQueueRepository: Send + Sync {
    async fn find_active(&self, candidate_id: Uuid) -> Result<Option<AnalysisJob>>;
    async fn insert(&self, job: &AnalysisJob) -> Result<Option<AnalysisJob>>;
    /// Atomically claims up to `limit` pending jobs, oldest first.
    async fn claim_due(&self, limit: i64, max_retries: i32) -> Result<Vec<AnalysisJob>>;
    async fn complete(&self, id: Uuid) -> Result<()>;
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        retry_count: i32,
        status: JobStatus,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct Repositories {
    pub candidates: Arc<dyn CandidateRepository>,
    pub requests: Arc<dyn RequestRepository>,
    pub matches: Arc<dyn MatchRepository>,
    pub automation: Arc<dyn AutomationQueueRepository>,
    pub outreach: Arc<dyn OutreachQueueRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub questionnaires: Arc<dyn QuestionnaireRepository>,
    pub analysis: Arc<dyn AnalysisQueueRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self::from_store(Arc::new(PgStore::new(pool)))
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(MemoryStore::default()))
    }

    fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CandidateRepository
            + RequestRepository
            + MatchRepository
            + AutomationQueueRepository
            + OutreachQueueRepository
            + ConversationRepository
            + QuestionnaireRepository
            + AnalysisQueueRepository
            + 'static,
    {
        Self {
            candidates: store.clone(),
            requests: store.clone(),
            matches: store.clone(),
            automation: store.clone(),
            outreach: store.clone(),
            conversations: store.clone(),
            questionnaires: store.clone(),
            analysis: store,
        }
    }
}
