use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::database::repositories::AutomationQueueRepository;
use crate::error::Result;
use crate::models::automation_job::{ActionType, AutomationJob, JobStatus};

/// Attempts before a job is parked as `failed`.
pub const MAX_RETRIES: i32 = 3;

#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    Enqueued(AutomationJob),
    /// A `pending`/`processing` job for the same triple already exists.
    Duplicate(Option<Uuid>),
}

/// Retry bookkeeping after a failed attempt: the new retry count and the
/// status the job moves to.
pub fn failure_transition(retry_count: i32) -> (i32, JobStatus) {
    let next = retry_count + 1;
    if next >= MAX_RETRIES {
        (next, JobStatus::Failed)
    } else {
        (next, JobStatus::Pending)
    }
}

#[derive(Clone)]
pub struct AutomationQueue {
    repo: Arc<dyn AutomationQueueRepository>,
}

impl AutomationQueue {
    pub fn new(repo: Arc<dyn AutomationQueueRepository>) -> Self {
        Self { repo }
    }

    pub async fn enqueue(
        &self,
        action_type: ActionType,
        candidate_id: Uuid,
        request_id: Uuid,
        scheduled_for: Option<DateTime<Utc>>,
        payload: Option<JsonValue>,
    ) -> Result<EnqueueOutcome> {
        if let Some(existing) = self
            .repo
            .find_active(action_type, candidate_id, request_id)
            .await?
        {
            tracing::info!(
                %candidate_id,
                %request_id,
                action_type = %action_type,
                job_id = %existing.id,
                "Duplicate automation job, not enqueued"
            );
            return Ok(EnqueueOutcome::Duplicate(Some(existing.id)));
        }

        let job = AutomationJob::pending(
            action_type,
            candidate_id,
            request_id,
            scheduled_for.unwrap_or_else(Utc::now),
            payload.unwrap_or_else(|| JsonValue::Object(Default::default())),
        );
        match self.repo.insert(&job).await? {
            Some(job) => {
                tracing::info!(
                    job_id = %job.id,
                    %candidate_id,
                    action_type = %action_type,
                    scheduled_for = %job.scheduled_for,
                    "Automation job enqueued"
                );
                Ok(EnqueueOutcome::Enqueued(job))
            }
            // lost the race to a concurrent producer
            None => Ok(EnqueueOutcome::Duplicate(None)),
        }
    }

    pub async fn fetch_due(&self, batch_size: i64) -> Result<Vec<AutomationJob>> {
        self.fetch_due_at(Utc::now(), batch_size).await
    }

    pub async fn fetch_due_at(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<AutomationJob>> {
        self.repo.fetch_due(now, batch_size, MAX_RETRIES).await
    }

    /// `None` when another poller claimed the job first.
    pub async fn mark_processing(&self, job_id: Uuid) -> Result<Option<AutomationJob>> {
        self.repo.claim(job_id).await
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        self.repo.complete(job_id).await
    }

    /// Returns the status the job ended up in.
    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        error: &str,
        retry_count: i32,
    ) -> Result<JobStatus> {
        let (retries, status) = failure_transition(retry_count);
        self.repo
            .record_failure(job_id, error, retries, status)
            .await?;
        if status == JobStatus::Failed {
            tracing::error!(%job_id, retries, error, "Automation job failed permanently");
        } else {
            tracing::warn!(%job_id, retries, error, "Automation job failed, will retry");
        }
        Ok(status)
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let cancelled = self.repo.cancel(job_id).await?;
        tracing::info!(%job_id, cancelled, "Automation job cancel requested");
        Ok(cancelled)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<AutomationJob>> {
        self.repo.get(job_id).await
    }

    pub async fn list_for_candidate(&self, candidate_id: Uuid) -> Result<Vec<AutomationJob>> {
        self.repo.list_for_candidate(candidate_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_failure_is_terminal() {
        assert_eq!(failure_transition(0), (1, JobStatus::Pending));
        assert_eq!(failure_transition(1), (2, JobStatus::Pending));
        assert_eq!(failure_transition(2), (3, JobStatus::Failed));
    }
}
