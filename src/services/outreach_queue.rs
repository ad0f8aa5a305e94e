//! Humanized first contact with warm candidates.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::dto::cron_dto::{CronReport, ItemOutcome};
use crate::error::{Error, Result};
use crate::models::candidate::{Candidate, CandidateGuard, CandidatePatch, OutreachStatus};
use crate::models::conversation::MessageType;
use crate::models::outreach_item::{
    DeliveryMethod, OutreachItemStatus, OutreachItemUpdate, OutreachQueueItem,
};
use crate::models::pipeline::PipelineEvent;
use crate::services::action_handlers::outreach_keyboard;
use crate::services::ServiceContext;

const DEFAULT_SUBJECT: &str = "Vamos: пропозиція щодо вакансії";

#[derive(Clone)]
pub struct OutreachQueueService {
    ctx: ServiceContext,
}

impl OutreachQueueService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Returns the already active item instead of scheduling a second one.
    pub async fn schedule(
        &self,
        candidate_id: Uuid,
        request_id: Option<Uuid>,
        delivery_method: DeliveryMethod,
        subject: Option<String>,
        message: String,
        scheduled_for: DateTime<Utc>,
    ) -> Result<OutreachQueueItem> {
        self.ctx.candidate(candidate_id).await?;
        if let Some(existing) = self
            .ctx
            .repos
            .outreach
            .find_active_for_candidate(candidate_id)
            .await?
        {
            tracing::info!(%candidate_id, item_id = %existing.id, "Outreach already scheduled");
            return Ok(existing);
        }

        let now = Utc::now();
        let item = OutreachQueueItem {
            id: Uuid::new_v4(),
            candidate_id,
            request_id,
            delivery_method,
            subject,
            message,
            scheduled_for,
            status: OutreachItemStatus::Scheduled,
            sent_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.ctx.repos.outreach.insert(&item).await?;

        self.ctx
            .patch_candidate(
                candidate_id,
                CandidatePatch {
                    outreach_status: Some(OutreachStatus::Scheduled),
                    ..CandidatePatch::default()
                },
            )
            .await?;
        tracing::info!(
            %candidate_id,
            item_id = %item.id,
            delivery_method = %delivery_method,
            scheduled_for = %scheduled_for,
            "Outreach scheduled"
        );
        Ok(item)
    }

    pub async fn update(&self, id: Uuid, update: OutreachItemUpdate) -> Result<OutreachQueueItem> {
        if update.message.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(Error::BadRequest("Outreach message cannot be empty".to_string()));
        }
        match self.ctx.repos.outreach.update_scheduled(id, &update).await? {
            Some(item) => Ok(item),
            None => Err(self.not_editable(id).await),
        }
    }

    pub async fn cancel(&self, id: Uuid) -> Result<OutreachQueueItem> {
        let Some(item) = self.ctx.repos.outreach.cancel(id).await? else {
            return Err(self.not_editable(id).await);
        };
        let patch = CandidatePatch {
            outreach_status: Some(OutreachStatus::Cancelled),
            ..CandidatePatch::default()
        };
        let guard = CandidateGuard {
            outreach_status: Some(OutreachStatus::Scheduled),
            ..CandidateGuard::default()
        };
        self.ctx
            .repos
            .candidates
            .patch(item.candidate_id, &patch, &guard)
            .await?;
        tracing::info!(item_id = %id, candidate_id = %item.candidate_id, "Outreach cancelled");
        Ok(item)
    }

    async fn not_editable(&self, id: Uuid) -> Error {
        match self.ctx.repos.outreach.get(id).await {
            Ok(Some(item)) => Error::Precondition(format!("Outreach item is {}, expected scheduled", item.status)),
            Ok(None) => Error::NotFound(format!("Outreach item {} not found", id)),
            Err(e) => e,
        }
    }

    pub async fn process_due(&self, now: DateTime<Utc>, limit: i64) -> Result<CronReport> {
        let mut report = CronReport::default();
        let items = self.ctx.repos.outreach.claim_due(now, limit).await?;
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.ctx.settings.item_delay).await;
            }
            match self.deliver(&item).await {
                Ok(()) => report.record(ItemOutcome::Succeeded),
                Err(e) => {
                    tracing::error!(item_id = %item.id, candidate_id = %item.candidate_id, error = %e, "Outreach delivery failed");
                    self.ctx.repos.outreach.mark_failed(item.id, &e.to_string()).await?;
                    report.record(ItemOutcome::Failed);
                }
            }
        }
        Ok(report)
    }

    /// Errors only while nothing has gone out yet. Once the message is
    /// delivered the item stays `sent` whatever happens to the bookkeeping.
    async fn deliver(&self, item: &OutreachQueueItem) -> Result<()> {
        let candidate = self.ctx.candidate(item.candidate_id).await?;
        let (via, message_id) = self.send(&candidate, item).await?;
        tracing::info!(item_id = %item.id, candidate_id = %candidate.id, via, "Outreach sent");

        if let Err(e) = self.record_delivery(&candidate, item, via, message_id).await {
            tracing::error!(
                item_id = %item.id,
                candidate_id = %candidate.id,
                error = %e,
                "Outreach delivered but not fully recorded"
            );
        }
        Ok(())
    }

    async fn record_delivery(
        &self,
        candidate: &Candidate,
        item: &OutreachQueueItem,
        via: &str,
        message_id: Option<i64>,
    ) -> Result<()> {
        let sent_at = Utc::now();
        self.ctx.repos.outreach.mark_sent(item.id, sent_at).await?;
        self.ctx
            .patch_candidate(
                candidate.id,
                CandidatePatch {
                    outreach_status: Some(OutreachStatus::Sent),
                    outreach_sent_at: Some(sent_at),
                    outreach_message_id: message_id,
                    ..CandidatePatch::default()
                },
            )
            .await?;
        self.ctx
            .advance_stage(candidate.id, candidate.pipeline_stage, PipelineEvent::OutreachSent)
            .await?;
        self.ctx
            .conversations
            .log_outbound(
                candidate.id,
                item.request_id,
                MessageType::Outreach,
                &item.message,
                json!({ "outreach_item_id": item.id, "via": via }),
            )
            .await
    }

    /// Telegram when asked for and a chat is known, otherwise email.
    async fn send(
        &self,
        candidate: &Candidate,
        item: &OutreachQueueItem,
    ) -> Result<(&'static str, Option<i64>)> {
        if item.delivery_method == DeliveryMethod::Telegram {
            if let Some(chat_id) = candidate.telegram_chat_id {
                let keyboard = match item.request_id {
                    Some(request_id) => {
                        let request = self.ctx.request(request_id).await?;
                        Some(outreach_keyboard(candidate, &request))
                    }
                    None => None,
                };
                let sent = self
                    .ctx
                    .messenger
                    .send_message(chat_id, &item.message, keyboard.as_ref())
                    .await?;
                return Ok(("telegram", Some(sent.message_id)));
            }
        }

        let email = candidate.email.as_deref().ok_or_else(|| {
            Error::Precondition(format!("Candidate {} has no reachable channel", candidate.id))
        })?;
        let subject = item.subject.as_deref().unwrap_or(DEFAULT_SUBJECT);
        self.ctx.mailer.send_email(email, subject, &item.message).await?;
        Ok(("email", None))
    }
}
