mod common;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::{TestApp, WEBHOOK_SECRET};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use vamos_recruitment::{
    database::Repositories,
    dto::callback_dto::{CallbackPayload, FeedbackRating},
    error::Result,
    models::{
        automation_job::ActionType,
        candidate::{CandidateGuard, CandidatePatch, OutreachStatus, TestTaskStatus},
        candidate_match::CandidateRequestMatch,
        conversation::{MessageDirection, MessageType},
        pipeline::PipelineStage,
    },
    services::llm_service::{LlmBackend, LlmGateway},
};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

async fn post_update(router: &Router, secret: Option<&str>, update: Value) -> StatusCode {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhook/telegram")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(secret) = secret {
        builder = builder.header(SECRET_HEADER, secret);
    }
    let res = router
        .clone()
        .oneshot(builder.body(Body::from(update.to_string())).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({ "ok": true }));
    status
}

fn text_update(chat_id: i64, username: Option<&str>, text: &str) -> Value {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 10,
            "chat": { "id": chat_id },
            "from": { "id": chat_id, "username": username, "first_name": "Олена" },
            "text": text
        }
    })
}

fn callback_update(chat_id: i64, message_id: i64, data: &str) -> Value {
    json!({
        "update_id": 2,
        "callback_query": {
            "id": "cbq-1",
            "from": { "id": chat_id },
            "data": data,
            "message": { "message_id": message_id, "chat": { "id": chat_id } }
        }
    })
}

#[tokio::test]
async fn start_from_unknown_sender_only_replies() {
    let app = TestApp::new();
    let candidate = app.seed_candidate(|_| {}).await;
    let router = app.router();

    let status = post_update(&router, None, text_update(900, Some("stranger"), "/start")).await;
    assert_eq!(status, StatusCode::OK);

    let sent = app.messenger.sent_to(900);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("https://hr.vamos.test/apply"));

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.telegram_chat_id, None);
    assert!(app
        .state
        .ctx
        .conversations
        .history(candidate.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_sender_is_asked_to_apply() {
    let app = TestApp::new();
    let router = app.router();

    post_update(&router, None, text_update(901, None, "Добрий день, є вакансії?")).await;

    let sent = app.messenger.sent_to(901);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("спершу подайте заявку"));
    assert!(app.repos.candidates.find_by_chat(901, None).await.unwrap().is_none());
}

#[tokio::test]
async fn start_from_known_username_learns_chat() {
    let app = TestApp::new();
    let candidate = app
        .seed_candidate(|c| c.telegram_username = Some("@Olena_K".to_string()))
        .await;
    let router = app.router();

    post_update(&router, None, text_update(555, Some("olena_k"), "/start")).await;

    assert_eq!(app.candidate(candidate.id).await.telegram_chat_id, Some(555));
    assert_eq!(app.messenger.sent_to(555).len(), 1);
}

#[tokio::test]
async fn deadline_extension_over_chat() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app
        .seed_candidate(|c| c.telegram_username = Some("olena_k".to_string()))
        .await;
    // no chat yet, the task goes out by email
    app.state.test_tasks.send(candidate.id, request.id).await.unwrap();
    let before = app.candidate(candidate.id).await;
    let original = before.test_task_deadline.unwrap();

    let router = app.router();
    post_update(
        &router,
        None,
        text_update(555, Some("olena_k"), "можу я отримати ще 2 дні?"),
    )
    .await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.telegram_chat_id, Some(555));
    assert_eq!(stored.test_task_extensions, 1);
    assert_eq!(stored.test_task_status, TestTaskStatus::Sent);
    let extended = stored.test_task_deadline.unwrap();
    assert!(extended > original);
    assert_eq!(stored.test_task_original_deadline, Some(original));

    let history = app.state.ctx.conversations.history(candidate.id).await.unwrap();
    let tail: Vec<_> = history
        .iter()
        .skip(1)
        .map(|e| (e.direction, e.message_type))
        .collect();
    assert_eq!(
        tail,
        vec![
            (MessageDirection::Inbound, MessageType::Text),
            (MessageDirection::Outbound, MessageType::DeadlineExtension),
        ]
    );
    assert_eq!(history[1].request_id, Some(request.id));
    assert_eq!(app.messenger.sent_to(555).len(), 1);

    // a second extension is refused
    post_update(&router, None, text_update(555, Some("olena_k"), "а можна ще 3 дні?")).await;
    let again = app.candidate(candidate.id).await;
    assert_eq!(again.test_task_extensions, 1);
    assert_eq!(again.test_task_deadline, Some(extended));
}

#[tokio::test]
async fn negative_reply_declines_outreach() {
    let app = TestApp::new();
    let candidate = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(321);
            c.outreach_status = OutreachStatus::Sent;
        })
        .await;
    let router = app.router();

    post_update(&router, None, text_update(321, None, "Дякую, не цікаво")).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.outreach_status, OutreachStatus::Declined);
    let sent = app.messenger.sent_to(321);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("Шкода"));
}

/// Classifier that lets the automation cron send the test task while the
/// model call is in flight, then answers "negative".
struct SlowNegativeClassifier {
    repos: Repositories,
    candidate_id: OnceLock<Uuid>,
}

#[async_trait]
impl LlmBackend for SlowNegativeClassifier {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        let id = *self.candidate_id.get().expect("candidate seeded");
        let sent = CandidatePatch {
            test_task_status: Some(TestTaskStatus::Sent),
            pipeline_stage: Some(PipelineStage::TestSent),
            ..CandidatePatch::default()
        };
        self.repos
            .candidates
            .patch(id, &sent, &CandidateGuard::default())
            .await?;
        Ok(r#"{"category": "negative", "confidence": 0.9}"#.to_string())
    }
}

#[tokio::test]
async fn negative_reply_keeps_a_concurrently_sent_test_task() {
    let repos = Repositories::in_memory();
    let backend = Arc::new(SlowNegativeClassifier {
        repos: repos.clone(),
        candidate_id: OnceLock::new(),
    });
    let app = TestApp::with_parts(repos, LlmGateway::live(backend.clone()));
    let candidate = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(322);
            c.outreach_status = OutreachStatus::Sent;
            c.pipeline_stage = PipelineStage::OutreachSent;
        })
        .await;
    backend.candidate_id.set(candidate.id).unwrap();

    post_update(&app.router(), None, text_update(322, None, "Дякую, не цікаво")).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.outreach_status, OutreachStatus::Declined);
    assert_eq!(stored.test_task_status, TestTaskStatus::Sent);
    assert_eq!(stored.pipeline_stage, PipelineStage::TestSent);
}

#[tokio::test]
async fn ready_reply_sends_the_test_task_once() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(600)).await;
    app.repos
        .matches
        .upsert(&CandidateRequestMatch::new(candidate.id, request.id, 80))
        .await
        .unwrap();
    let router = app.router();

    post_update(&router, None, text_update(600, None, "Так, готовий")).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.test_task_status, TestTaskStatus::Sent);
    assert_eq!(stored.pipeline_stage, PipelineStage::TestSent);
    let sent = app.messenger.sent_to(600);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("https://docs.vamos.test/test-task"));

    post_update(&router, None, text_update(600, None, "Так, готовий")).await;

    let sent = app.messenger.sent_to(600);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].text.contains("вже надіслано"));
    let again = app.candidate(candidate.id).await;
    assert_eq!(again.test_task_token, stored.test_task_token);
    assert_eq!(again.test_task_sent_at, stored.test_task_sent_at);
}

#[tokio::test]
async fn chat_submission_asks_for_difficulty_rating() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(610)).await;
    app.state.test_tasks.send(candidate.id, request.id).await.unwrap();
    let router = app.router();

    let solution = "Готово: https://github.com/olena/sales-case";
    post_update(&router, None, text_update(610, None, solution)).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.test_task_status, TestTaskStatus::SubmittedOnTime);
    assert_eq!(stored.test_task_submission.as_deref(), Some(solution));
    assert_eq!(stored.pipeline_stage, PipelineStage::TestDone);

    let sent = app.messenger.sent_to(610);
    assert_eq!(sent.len(), 2);
    let keyboard = sent[1].keyboard.as_ref().expect("rating buttons");
    let payloads: Vec<CallbackPayload> = keyboard
        .inline_keyboard
        .iter()
        .flatten()
        .map(|b| CallbackPayload::decode(&b.callback_data).expect("decodable button"))
        .collect();
    let expected: Vec<CallbackPayload> = FeedbackRating::ALL
        .into_iter()
        .map(|rating| CallbackPayload::Feedback {
            rating,
            candidate_id: candidate.id,
        })
        .collect();
    assert_eq!(payloads, expected);

    let history = app.state.ctx.conversations.history(candidate.id).await.unwrap();
    assert!(history
        .iter()
        .any(|e| e.message_type == MessageType::TestSubmission && e.direction == MessageDirection::Inbound));
}

#[tokio::test]
async fn job_questions_get_an_answer() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(620)).await;
    app.repos
        .matches
        .upsert(&CandidateRequestMatch::new(candidate.id, request.id, 80))
        .await
        .unwrap();
    let router = app.router();

    post_update(&router, None, text_update(620, None, "Яка зарплата на цій позиції?")).await;
    post_update(&router, None, text_update(620, None, "Так, цікаво! А який графік роботи?")).await;

    let sent = app.messenger.sent_to(620);
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.text.contains("Дякуємо за запитання")));

    let replies: Vec<_> = app
        .state
        .ctx
        .conversations
        .history(candidate.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.direction == MessageDirection::Outbound)
        .collect();
    assert_eq!(replies.len(), 2);
    for reply in replies {
        assert_eq!(reply.message_type, MessageType::BotReply);
        assert_eq!(reply.request_id, Some(request.id));
        assert_eq!(reply.metadata["category"], "questions_about_job");
    }
    // questions never move the candidate along
    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.test_task_status, TestTaskStatus::NotSent);
    assert_eq!(stored.pipeline_stage, PipelineStage::Analyzed);
}

#[tokio::test]
async fn outreach_interest_queues_next_step() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(42);
            c.outreach_status = OutreachStatus::Sent;
            c.pipeline_stage = PipelineStage::OutreachSent;
        })
        .await;
    let data = CallbackPayload::OutreachReply {
        interested: true,
        candidate_id: candidate.id,
        request_id: request.id,
    }
    .encode();
    let router = app.router();

    post_update(&router, None, callback_update(42, 99, &data)).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.outreach_status, OutreachStatus::Responded);
    assert_eq!(*app.messenger.answered_callbacks.lock().unwrap(), vec!["cbq-1".to_string()]);
    assert_eq!(*app.messenger.cleared_markups.lock().unwrap(), vec![(42, 99)]);

    let jobs = app.state.automation.list_for_candidate(candidate.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].action_type, ActionType::SendTestTask);

    // pressing again only clears the buttons
    post_update(&router, None, callback_update(42, 99, &data)).await;
    assert_eq!(app.state.automation.list_for_candidate(candidate.id).await.unwrap().len(), 1);
    assert_eq!(app.messenger.sent_to(42).len(), 1);
}

#[tokio::test]
async fn outreach_decline_moves_stage() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(43);
            c.outreach_status = OutreachStatus::Sent;
            c.pipeline_stage = PipelineStage::OutreachSent;
        })
        .await;
    let data = CallbackPayload::OutreachReply {
        interested: false,
        candidate_id: candidate.id,
        request_id: request.id,
    }
    .encode();

    post_update(&app.router(), None, callback_update(43, 7, &data)).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.outreach_status, OutreachStatus::Declined);
    assert_eq!(stored.pipeline_stage, PipelineStage::OutreachDeclined);
    assert!(app
        .state
        .automation
        .list_for_candidate(candidate.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn feedback_button_stores_difficulty() {
    let app = TestApp::new();
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(77)).await;
    let data = CallbackPayload::Feedback {
        rating: FeedbackRating::Hard,
        candidate_id: candidate.id,
    }
    .encode();

    post_update(&app.router(), None, callback_update(77, 12, &data)).await;

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.test_task_difficulty.as_deref(), Some("Складно"));
    let history = app.state.ctx.conversations.history(candidate.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_type, MessageType::Feedback);
    assert_eq!(history[0].direction, MessageDirection::Inbound);
}

#[tokio::test]
async fn wrong_secret_is_acknowledged_but_ignored() {
    let app = TestApp::with_webhook_secret(Some(WEBHOOK_SECRET));
    let router = app.router();

    let status = post_update(&router, Some("nope"), text_update(900, None, "/start")).await;
    assert_eq!(status, StatusCode::OK);
    let status = post_update(&router, None, text_update(900, None, "/start")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.messenger.sent().is_empty());

    post_update(&router, Some(WEBHOOK_SECRET), text_update(900, None, "/start")).await;
    assert_eq!(app.messenger.sent_to(900).len(), 1);
}

#[tokio::test]
async fn malformed_update_is_acknowledged() {
    let app = TestApp::new();
    let status = post_update(&app.router(), None, json!({ "message": "oops" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.messenger.sent().is_empty());
}
