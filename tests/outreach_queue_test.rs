mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::TestApp;
use tokio_test::assert_err;
use uuid::Uuid;
use vamos_recruitment::{
    database::{repositories::ConversationRepository, Repositories},
    error::{Error, Result},
    models::{
        candidate::OutreachStatus,
        conversation::ConversationEntry,
        outreach_item::{DeliveryMethod, OutreachItemStatus, OutreachItemUpdate},
        pipeline::PipelineStage,
    },
    services::{cron_service::CronKind, llm_service::LlmGateway},
};

const MESSAGE: &str = "Вітаємо, Олено! Маємо для вас цікаву вакансію у Vamos.";

#[tokio::test]
async fn due_items_go_out_over_telegram_or_email() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let on_telegram = app.seed_candidate(|c| c.telegram_chat_id = Some(700)).await;
    let by_email = app.seed_candidate(|_| {}).await;
    let later = app.seed_candidate(|c| c.telegram_chat_id = Some(701)).await;
    let due = Utc::now() - Duration::minutes(1);

    let first = app
        .state
        .outreach
        .schedule(on_telegram.id, Some(request.id), DeliveryMethod::Telegram, None, MESSAGE.to_string(), due)
        .await
        .unwrap();
    let again = app
        .state
        .outreach
        .schedule(on_telegram.id, Some(request.id), DeliveryMethod::Telegram, None, "інший текст".to_string(), due)
        .await
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(app.candidate(on_telegram.id).await.outreach_status, OutreachStatus::Scheduled);

    // no chat yet, so Telegram falls back to email
    let emailed = app
        .state
        .outreach
        .schedule(
            by_email.id,
            Some(request.id),
            DeliveryMethod::Telegram,
            Some("Vamos: вакансія".to_string()),
            MESSAGE.to_string(),
            due,
        )
        .await
        .unwrap();
    let future = app
        .state
        .outreach
        .schedule(later.id, None, DeliveryMethod::Telegram, None, MESSAGE.to_string(), Utc::now() + Duration::hours(3))
        .await
        .unwrap();

    let report = app.state.cron.run(CronKind::Outreach).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 2);

    let sent = app.messenger.sent_to(700);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, MESSAGE);
    assert!(sent[0].keyboard.is_some());
    let stored = app.candidate(on_telegram.id).await;
    assert_eq!(stored.outreach_status, OutreachStatus::Sent);
    assert_eq!(stored.pipeline_stage, PipelineStage::OutreachSent);
    assert!(stored.outreach_message_id.is_some());

    let emails = app.mailer.sent.lock().unwrap().clone();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "olena@example.com");
    assert_eq!(emails[0].subject, "Vamos: вакансія");
    let stored = app.candidate(by_email.id).await;
    assert_eq!(stored.outreach_status, OutreachStatus::Sent);
    assert_eq!(stored.outreach_message_id, None);

    for (id, status) in [
        (first.id, OutreachItemStatus::Sent),
        (emailed.id, OutreachItemStatus::Sent),
        (future.id, OutreachItemStatus::Scheduled),
    ] {
        let item = app.repos.outreach.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, status);
    }
    assert!(app.messenger.sent_to(701).is_empty());
}

#[tokio::test]
async fn only_scheduled_items_can_be_edited_or_cancelled() {
    let app = TestApp::new();
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(710)).await;
    let item = app
        .state
        .outreach
        .schedule(candidate.id, None, DeliveryMethod::Telegram, None, MESSAGE.to_string(), Utc::now() + Duration::hours(1))
        .await
        .unwrap();

    let edited = app
        .state
        .outreach
        .update(
            item.id,
            OutreachItemUpdate {
                message: Some("Оновлений текст".to_string()),
                ..OutreachItemUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.message, "Оновлений текст");
    let blank = app
        .state
        .outreach
        .update(
            item.id,
            OutreachItemUpdate {
                message: Some("  ".to_string()),
                ..OutreachItemUpdate::default()
            },
        )
        .await;
    assert!(matches!(blank, Err(Error::BadRequest(_))));

    let cancelled = app.state.outreach.cancel(item.id).await.unwrap();
    assert_eq!(cancelled.status, OutreachItemStatus::Cancelled);
    assert_eq!(app.candidate(candidate.id).await.outreach_status, OutreachStatus::Cancelled);

    let late_edit = app
        .state
        .outreach
        .update(
            item.id,
            OutreachItemUpdate {
                message: Some("Ще одна спроба".to_string()),
                ..OutreachItemUpdate::default()
            },
        )
        .await;
    assert!(matches!(late_edit, Err(Error::Precondition(_))));
    assert!(matches!(app.state.outreach.cancel(item.id).await, Err(Error::Precondition(_))));
    assert!(matches!(app.state.outreach.cancel(Uuid::new_v4()).await, Err(Error::NotFound(_))));

    app.state.cron.run(CronKind::Outreach).await.unwrap();
    assert!(app.messenger.sent().is_empty());
}

/// Conversation log that is down.
struct UnavailableLog;

#[async_trait]
impl ConversationRepository for UnavailableLog {
    async fn append(&self, _entry: &ConversationEntry) -> Result<()> {
        Err(Error::Internal("conversation log unavailable".to_string()))
    }

    async fn list_for_candidate(&self, _candidate_id: Uuid) -> Result<Vec<ConversationEntry>> {
        Ok(Vec::new())
    }

    async fn latest_request_id(&self, _candidate_id: Uuid) -> Result<Option<Uuid>> {
        Ok(None)
    }
}

#[tokio::test]
async fn delivered_item_stays_sent_when_bookkeeping_fails() {
    let mut repos = Repositories::in_memory();
    repos.conversations = Arc::new(UnavailableLog);
    let app = TestApp::with_parts(repos, LlmGateway::mock());
    let reachable = app.seed_candidate(|c| c.telegram_chat_id = Some(720)).await;
    let blocked = app.seed_candidate(|c| c.telegram_chat_id = Some(721)).await;
    let due = Utc::now() - Duration::minutes(1);
    let delivered = app
        .state
        .outreach
        .schedule(reachable.id, None, DeliveryMethod::Telegram, None, MESSAGE.to_string(), due)
        .await
        .unwrap();

    let report = app.state.cron.run(CronKind::Outreach).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(app.messenger.sent_to(720).len(), 1);
    let item = app.repos.outreach.get(delivered.id).await.unwrap().unwrap();
    assert_eq!(item.status, OutreachItemStatus::Sent);
    assert_eq!(app.candidate(reachable.id).await.outreach_status, OutreachStatus::Sent);

    // a send that never went out is the one that fails
    let undelivered = app
        .state
        .outreach
        .schedule(blocked.id, None, DeliveryMethod::Telegram, None, MESSAGE.to_string(), due)
        .await
        .unwrap();
    app.messenger.set_failing(true);
    let report = app.state.cron.run(CronKind::Outreach).await.unwrap();
    assert_eq!(report.failed, 1);
    let item = app.repos.outreach.get(undelivered.id).await.unwrap().unwrap();
    assert_eq!(item.status, OutreachItemStatus::Failed);
    assert!(item.error_message.is_some());
    assert_err!(app.state.outreach.cancel(undelivered.id).await);
}
