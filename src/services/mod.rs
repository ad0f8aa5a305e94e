use std::sync::Arc;

use uuid::Uuid;

use crate::config::AutomationSettings;
use crate::database::Repositories;
use crate::error::{Error, Result};
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch};
use crate::models::hiring_request::HiringRequest;
use crate::models::pipeline::{PipelineEvent, PipelineStage};
use crate::services::conversation_service::ConversationService;
use crate::services::email_service::EmailGateway;
use crate::services::llm_service::LlmGateway;
use crate::services::telegram_service::MessagingGateway;

pub mod action_handlers;
pub mod analysis_service;
pub mod automation_queue;
pub mod bot_service;
pub mod classifier_service;
pub mod conversation_service;
pub mod cron_service;
pub mod email_service;
pub mod llm_service;
pub mod outreach_queue;
pub mod outreach_scheduler;
pub mod questionnaire_service;
pub mod telegram_service;
pub mod test_task_service;

/// Collaborators shared by every automation service.
#[derive(Clone)]
pub struct ServiceContext {
    pub repos: Repositories,
    pub llm: LlmGateway,
    pub messenger: Arc<dyn MessagingGateway>,
    pub mailer: Arc<dyn EmailGateway>,
    pub settings: Arc<AutomationSettings>,
    pub conversations: ConversationService,
}

impl ServiceContext {
    pub fn new(
        repos: Repositories,
        llm: LlmGateway,
        messenger: Arc<dyn MessagingGateway>,
        mailer: Arc<dyn EmailGateway>,
        settings: Arc<AutomationSettings>,
    ) -> Self {
        let conversations = ConversationService::new(repos.conversations.clone());
        Self {
            repos,
            llm,
            messenger,
            mailer,
            settings,
            conversations,
        }
    }

    pub async fn candidate(&self, id: Uuid) -> Result<Candidate> {
        self.repos
            .candidates
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Candidate {} not found", id)))
    }

    pub async fn request(&self, id: Uuid) -> Result<HiringRequest> {
        self.repos
            .requests
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Request {} not found", id)))
    }

    /// Unconditional column write. Errors if the candidate is gone.
    pub async fn patch_candidate(&self, id: Uuid, patch: CandidatePatch) -> Result<()> {
        if self
            .repos
            .candidates
            .patch(id, &patch, &CandidateGuard::default())
            .await?
        {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Candidate {} not found", id)))
        }
    }

    /// Moves the stored stage along `event` if it still is `from`.
    /// Returns the new stage, or `None` when there was nothing to do.
    pub async fn advance_stage(
        &self,
        candidate_id: Uuid,
        from: PipelineStage,
        event: PipelineEvent,
    ) -> Result<Option<PipelineStage>> {
        let Some(to) = from.next(event) else {
            return Ok(None);
        };
        let patch = CandidatePatch {
            pipeline_stage: Some(to),
            ..CandidatePatch::default()
        };
        if self
            .repos
            .candidates
            .patch(candidate_id, &patch, &CandidateGuard::stage(from))
            .await?
        {
            Ok(Some(to))
        } else {
            tracing::warn!(%candidate_id, %from, ?event, "Stage changed concurrently, transition skipped");
            Ok(None)
        }
    }

    pub fn link(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url, path.trim_start_matches('/'))
    }
}
