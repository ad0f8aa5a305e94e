mod common;

use std::collections::{BTreeMap, HashMap, HashSet};

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use common::{TestApp, JWT_SECRET};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tokio_test::assert_err;
use tower::ServiceExt;
use uuid::Uuid;
use vamos_recruitment::{
    dto::callback_dto::CallbackPayload,
    middleware::auth::Claims,
    models::{
        automation_job::{ActionType, JobStatus},
        candidate::{OutreachStatus, QuestionnaireStatus, TestTaskStatus},
        candidate_match::CandidateRequestMatch,
        conversation::{MessageDirection, MessageType},
        pipeline::PipelineStage,
        questionnaire::QuestionBankItem,
    },
    services::{
        cron_service::CronKind,
        test_task_service::{SendOutcome, STALE_CLAIM_MINUTES},
    },
};

fn bearer(role: &str) -> String {
    let claims = Claims {
        sub: "recruiter-1".to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        role: Some(role.to_string()),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

async fn json_body(res: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn seed_questions(app: &TestApp, competency_id: Uuid, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for i in 0..count {
        let item = QuestionBankItem {
            id: Uuid::new_v4(),
            competency_id,
            text: format!("Питання {} про командну роботу", i + 1),
            is_active: true,
        };
        app.repos.questionnaires.insert_question(&item).await.unwrap();
        ids.push(item.id);
    }
    ids
}

#[tokio::test]
async fn test_task_is_sent_exactly_once() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(42)).await;

    let first = app.state.test_tasks.send(candidate.id, request.id).await.unwrap();
    let SendOutcome::Sent { deadline } = first else {
        panic!("first send must deliver, got {:?}", first);
    };
    let second = app.state.test_tasks.send(candidate.id, request.id).await.unwrap();
    assert_eq!(second, SendOutcome::AlreadySent { deadline: Some(deadline) });

    // the automation path is a no-op as well
    app.state
        .automation
        .enqueue(ActionType::SendTestTask, candidate.id, request.id, None, None)
        .await
        .unwrap();
    let report = app.state.cron.run(CronKind::Automation).await.unwrap();
    assert_eq!(report.skipped, 1);

    let sent = app.messenger.sent_to(42);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("https://docs.vamos.test/test-task"));
    assert!(sent[0].text.contains("https://hr.vamos.test/submit-test?token="));

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.test_task_status, TestTaskStatus::Sent);
    assert_eq!(stored.pipeline_stage, PipelineStage::TestSent);
    assert_eq!(stored.test_task_deadline, Some(deadline));
    assert_eq!(stored.test_task_token.as_ref().map(String::len), Some(32));

    let history = app.state.ctx.conversations.history(candidate.id).await.unwrap();
    let test_tasks: Vec<_> = history
        .iter()
        .filter(|e| e.message_type == MessageType::TestTask)
        .collect();
    assert_eq!(test_tasks.len(), 1);
    assert_eq!(test_tasks[0].metadata["via"], "telegram");
}

#[tokio::test]
async fn stale_test_task_claim_is_taken_over() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let live = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(51);
            c.test_task_status = TestTaskStatus::Scheduled;
            c.test_task_claimed_at = Some(Utc::now() - Duration::minutes(1));
        })
        .await;
    let crashed = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(52);
            c.test_task_status = TestTaskStatus::Scheduled;
            c.test_task_claimed_at =
                Some(Utc::now() - Duration::minutes(STALE_CLAIM_MINUTES + 5));
        })
        .await;

    let outcome = app.state.test_tasks.send(live.id, request.id).await.unwrap();
    assert_eq!(outcome, SendOutcome::Duplicate);
    assert!(app.messenger.sent_to(51).is_empty());

    let outcome = app.state.test_tasks.send(crashed.id, request.id).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));
    assert_eq!(app.messenger.sent_to(52).len(), 1);
    let stored = app.candidate(crashed.id).await;
    assert_eq!(stored.test_task_status, TestTaskStatus::Sent);
    assert_eq!(stored.pipeline_stage, PipelineStage::TestSent);
}

#[tokio::test]
async fn test_task_falls_back_to_email_and_releases_claim_on_failure() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let by_email = app.seed_candidate(|_| {}).await;

    let outcome = app.state.test_tasks.send(by_email.id, request.id).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));
    let emails = app.mailer.sent.lock().unwrap().clone();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "olena@example.com");

    let blocked = app.seed_candidate(|c| c.telegram_chat_id = Some(7)).await;
    app.messenger.set_failing(true);
    assert_err!(app.state.test_tasks.send(blocked.id, request.id).await);
    let stored = app.candidate(blocked.id).await;
    assert_eq!(stored.test_task_status, TestTaskStatus::NotSent);
    assert_eq!(stored.pipeline_stage, PipelineStage::Analyzed);
}

#[tokio::test]
async fn outreach_job_end_to_end() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(4242);
            c.score = Some(8);
        })
        .await;

    app.state
        .automation
        .enqueue(ActionType::SendOutreach, candidate.id, request.id, None, None)
        .await
        .unwrap();
    let report = app.state.cron.run(CronKind::Automation).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.pipeline_stage, PipelineStage::OutreachSent);
    assert_eq!(stored.outreach_status, OutreachStatus::Sent);
    assert!(stored.outreach_sent_at.is_some());
    assert!(stored.outreach_message_id.is_some());

    let history = app.state.ctx.conversations.history(candidate.id).await.unwrap();
    let outbound: Vec<_> = history
        .iter()
        .filter(|e| e.direction == MessageDirection::Outbound)
        .collect();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].message_type, MessageType::Outreach);

    let sent = app.messenger.sent_to(4242);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.starts_with("Вітаємо, Олена!"));
    let keyboard = sent[0].keyboard.as_ref().expect("outreach carries buttons");
    let buttons = &keyboard.inline_keyboard[0];
    assert_eq!(buttons.len(), 2);
    assert_eq!(
        CallbackPayload::decode(&buttons[0].callback_data),
        Some(CallbackPayload::OutreachReply {
            interested: true,
            candidate_id: candidate.id,
            request_id: request.id,
        })
    );

    let jobs = app.state.automation.list_for_candidate(candidate.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn outreach_requires_approved_template() {
    let app = TestApp::new();
    let request = app.seed_request(|r| r.outreach_template_approved = false).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(1)).await;
    app.state
        .automation
        .enqueue(ActionType::SendOutreach, candidate.id, request.id, None, None)
        .await
        .unwrap();

    let report = app.state.cron.run(CronKind::Automation).await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(app.messenger.sent().is_empty());
    assert_eq!(
        app.candidate(candidate.id).await.pipeline_stage,
        PipelineStage::Analyzed
    );
}

#[tokio::test]
async fn invite_from_new_is_an_invalid_transition() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app
        .seed_candidate(|c| {
            c.pipeline_stage = PipelineStage::New;
            c.telegram_chat_id = Some(5);
        })
        .await;
    app.state
        .automation
        .enqueue(ActionType::SendInvite, candidate.id, request.id, None, None)
        .await
        .unwrap();

    app.state.cron.run(CronKind::Automation).await.unwrap();
    let jobs = app.state.automation.list_for_candidate(candidate.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert!(jobs[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("Invalid pipeline transition"));
    assert!(app.messenger.sent().is_empty());
}

#[tokio::test]
async fn questionnaire_selection_per_competency() {
    let app = TestApp::new();
    let competency_a = Uuid::new_v4();
    let competency_b = Uuid::new_v4();
    seed_questions(&app, competency_a, 5).await;
    seed_questions(&app, competency_b, 2).await;
    let request = app
        .seed_request(|r| r.questionnaire_competency_ids = vec![competency_a, competency_b])
        .await;
    let candidate = app.seed_candidate(|_| {}).await;

    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..20 {
        let picked = app
            .state
            .questionnaires
            .select_questions(&request, &mut rng)
            .await
            .unwrap();
        let mut per_competency: HashMap<Option<Uuid>, usize> = HashMap::new();
        for q in &picked {
            *per_competency.entry(q.competency_id).or_default() += 1;
        }
        let a = per_competency[&Some(competency_a)];
        assert!((3..=4).contains(&a), "competency A got {}", a);
        assert_eq!(per_competency[&Some(competency_b)], 2);
        let unique: HashSet<Uuid> = picked.iter().map(|q| q.question_id).collect();
        assert_eq!(unique.len(), picked.len());
    }

    let response = app
        .state
        .questionnaires
        .create(&candidate, &request)
        .await
        .unwrap();
    assert_eq!(response.token.len(), 32);
    assert_eq!(response.expires_at - response.sent_at, Duration::days(5));
}

#[tokio::test]
async fn explicit_questions_are_deduplicated() {
    let app = TestApp::new();
    let competency = Uuid::new_v4();
    let ids = seed_questions(&app, competency, 3).await;
    let request = app
        .seed_request(|r| {
            r.questionnaire_competency_ids = vec![competency];
            r.questionnaire_question_ids = ids.clone();
        })
        .await;

    let picked = app
        .state
        .questionnaires
        .select_questions(&request, &mut StdRng::seed_from_u64(3))
        .await
        .unwrap();
    assert_eq!(picked.len(), 3);
}

#[tokio::test]
async fn questionnaire_public_flow() {
    let app = TestApp::new();
    let competency = Uuid::new_v4();
    seed_questions(&app, competency, 4).await;
    let request = app
        .seed_request(|r| r.questionnaire_competency_ids = vec![competency])
        .await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(77)).await;
    app.state
        .automation
        .enqueue(ActionType::SendQuestionnaire, candidate.id, request.id, None, None)
        .await
        .unwrap();
    app.state.cron.run(CronKind::Automation).await.unwrap();

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.pipeline_stage, PipelineStage::QuestionnaireSent);
    assert_eq!(stored.questionnaire_status, Some(QuestionnaireStatus::Sent));

    let sent = app.messenger.sent_to(77);
    assert_eq!(sent.len(), 1);
    let token: String = sent[0]
        .text
        .split("/questionnaire/")
        .nth(1)
        .expect("link in message")
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();

    let router = app.router();
    let res = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/public/questionnaire/{}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let view = json_body(res).await;
    assert_eq!(view["status"], "in_progress");
    assert_eq!(view["candidate_first_name"], "Олена");
    let questions = view["questions"].as_array().unwrap();
    assert!((3..=4).contains(&questions.len()));

    let answers: BTreeMap<String, String> = questions
        .iter()
        .map(|q| {
            (
                q["question_id"].as_str().unwrap().to_string(),
                "Я завжди домовляюся з командою.".to_string(),
            )
        })
        .collect();
    let submit = |answers: serde_json::Value| {
        Request::builder()
            .method("POST")
            .uri(format!("/api/public/questionnaire/{}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "answers": answers }).to_string()))
            .unwrap()
    };

    let res = router
        .clone()
        .oneshot(submit(json!({ Uuid::new_v4().to_string(): "?" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = router.clone().oneshot(submit(json!(answers))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["status"], "completed");

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.questionnaire_status, Some(QuestionnaireStatus::Completed));
    assert_eq!(stored.pipeline_stage, PipelineStage::QuestionnaireDone);

    let res = router.oneshot(submit(json!(answers))).await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // the AI evaluation happens in the maintenance pass
    let response = app
        .repos
        .questionnaires
        .get_response_by_token(&token)
        .await
        .unwrap()
        .unwrap();
    assert!(response.ai_evaluation.is_none());
    let report = app.state.cron.run(CronKind::Maintenance).await.unwrap();
    assert_eq!(report.succeeded, 1);
    let response = app
        .repos
        .questionnaires
        .get_response_by_token(&token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.ai_evaluation.unwrap()["overall_score"], 7);
    let report = app.state.cron.run(CronKind::Maintenance).await.unwrap();
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn questionnaire_retry_reuses_the_link() {
    let app = TestApp::new();
    let competency = Uuid::new_v4();
    seed_questions(&app, competency, 4).await;
    let request = app
        .seed_request(|r| r.questionnaire_competency_ids = vec![competency])
        .await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(78)).await;
    app.state
        .automation
        .enqueue(ActionType::SendQuestionnaire, candidate.id, request.id, None, None)
        .await
        .unwrap();

    app.messenger.set_failing(true);
    for _ in 0..2 {
        let report = app.state.cron.run(CronKind::Automation).await.unwrap();
        assert_eq!(report.failed, 1);
    }
    app.messenger.set_failing(false);
    let report = app.state.cron.run(CronKind::Automation).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let responses = app
        .repos
        .questionnaires
        .list_responses_for_candidate(candidate.id)
        .await
        .unwrap();
    assert_eq!(responses.len(), 1);
    let sent = app.messenger.sent_to(78);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains(&format!("/questionnaire/{}", responses[0].token)));
    assert_eq!(
        app.candidate(candidate.id).await.questionnaire_status,
        Some(QuestionnaireStatus::Sent)
    );
}

#[tokio::test]
async fn test_task_submission_by_token() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(9)).await;
    app.state.test_tasks.send(candidate.id, request.id).await.unwrap();
    let token = app.candidate(candidate.id).await.test_task_token.unwrap();

    let router = app.router();
    let submit = |token: &str| {
        Request::builder()
            .method("POST")
            .uri(format!("/api/public/test-task/{}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "submission": "https://github.com/olena/sales-case" }).to_string(),
            ))
            .unwrap()
    };

    let res = router.clone().oneshot(submit("not-a-token")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = router.clone().oneshot(submit(&token)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = json_body(res).await;
    assert_eq!(body["status"], "submitted_on_time");
    assert_eq!(body["on_time"], true);

    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.pipeline_stage, PipelineStage::TestDone);
    assert_eq!(
        stored.test_task_submission.as_deref(),
        Some("https://github.com/olena/sales-case")
    );

    let res = router.oneshot(submit(&token)).await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let report = app.state.cron.run(CronKind::Maintenance).await.unwrap();
    assert_eq!(report.succeeded, 1);
    let evaluated = app.candidate(candidate.id).await;
    assert_eq!(evaluated.test_task_status, TestTaskStatus::Evaluated);
    assert_eq!(evaluated.test_task_ai_score, Some(75));
}

#[tokio::test]
async fn decision_endpoint_queues_invite() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app
        .seed_candidate(|c| {
            c.telegram_chat_id = Some(31);
            c.pipeline_stage = PipelineStage::TestDone;
        })
        .await;
    let pairing = app
        .repos
        .matches
        .upsert(&CandidateRequestMatch::new(candidate.id, request.id, 85))
        .await
        .unwrap();

    let router = app.router();
    let decide = |auth: Option<String>| {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/api/matches/{}/decision", pairing.id))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder
            .body(Body::from(json!({ "decision": "invite" }).to_string()))
            .unwrap()
    };

    let res = router.clone().oneshot(decide(None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let res = router.clone().oneshot(decide(Some(bearer("candidate")))).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = router.clone().oneshot(decide(Some(bearer("hr")))).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(json_body(res).await["result"], "enqueued");
    let res = router.clone().oneshot(decide(Some(bearer("admin")))).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(json_body(res).await["result"], "duplicate");

    app.state.cron.run(CronKind::Automation).await.unwrap();
    let stored = app.candidate(candidate.id).await;
    assert_eq!(stored.pipeline_stage, PipelineStage::Interview);
    let sent = app.messenger.sent_to(31);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("запросити вас на співбесіду"));

    // interviewing already, a second invite has no pipeline edge
    let res = router.oneshot(decide(Some(bearer("hr")))).await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert!(app.state.automation.list_for_candidate(candidate.id).await.unwrap().len() == 1);
}

#[tokio::test]
async fn analysis_scores_matches_and_starts_outreach() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let cold = app
        .seed_candidate(|c| {
            c.pipeline_stage = PipelineStage::New;
            c.score = None;
            c.telegram_chat_id = Some(64);
        })
        .await;

    assert!(app.state.analysis.enqueue(cold.id).await.unwrap());
    assert!(!app.state.analysis.enqueue(cold.id).await.unwrap());

    let report = app.state.cron.run(CronKind::Analysis).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let stored = app.candidate(cold.id).await;
    assert_eq!(stored.score, Some(8));
    assert_eq!(stored.pipeline_stage, PipelineStage::Analyzed);
    let best = app
        .repos
        .matches
        .best_for_candidate(cold.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(best.request_id, request.id);
    assert_eq!(best.match_score, 80);

    let jobs = app.state.automation.list_for_candidate(cold.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].action_type, ActionType::SendOutreach);
}
