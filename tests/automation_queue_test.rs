mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use common::{TestApp, CRON_SECRET};
use tokio_test::assert_ok;
use tower::ServiceExt;
use vamos_recruitment::{
    models::automation_job::{ActionType, JobStatus},
    services::{automation_queue::EnqueueOutcome, cron_service::CronKind},
};

#[tokio::test]
async fn duplicate_enqueue_is_blocked_only_while_active() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|_| {}).await;
    let queue = &app.state.automation;

    let first = queue
        .enqueue(ActionType::SendTestTask, candidate.id, request.id, None, None)
        .await
        .unwrap();
    let EnqueueOutcome::Enqueued(first_job) = first else {
        panic!("first enqueue must insert");
    };

    let second = queue
        .enqueue(ActionType::SendTestTask, candidate.id, request.id, None, None)
        .await
        .unwrap();
    assert!(matches!(second, EnqueueOutcome::Duplicate(Some(id)) if id == first_job.id));
    assert_eq!(queue.list_for_candidate(candidate.id).await.unwrap().len(), 1);

    // a different action for the same pair is not a duplicate
    let other = queue
        .enqueue(ActionType::SendInvite, candidate.id, request.id, None, None)
        .await
        .unwrap();
    assert!(matches!(other, EnqueueOutcome::Enqueued(_)));

    queue.mark_processing(first_job.id).await.unwrap();
    queue.mark_completed(first_job.id).await.unwrap();
    let third = queue
        .enqueue(ActionType::SendTestTask, candidate.id, request.id, None, None)
        .await
        .unwrap();
    assert!(matches!(third, EnqueueOutcome::Enqueued(_)));
    assert_eq!(queue.list_for_candidate(candidate.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn failing_job_is_retried_then_parked() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    // no chat id: send_outreach fails its precondition every time
    let candidate = app.seed_candidate(|_| {}).await;
    let queue = &app.state.automation;
    queue
        .enqueue(ActionType::SendOutreach, candidate.id, request.id, None, None)
        .await
        .unwrap();

    for attempt in 1..=2 {
        let report = app.state.cron.run(CronKind::Automation).await.unwrap();
        assert_eq!(report.failed, 1);
        let jobs = queue.list_for_candidate(candidate.id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].retry_count, attempt);
        assert!(jobs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("Telegram chat id"));
        assert_eq!(queue.fetch_due(10).await.unwrap().len(), 1);
    }

    app.state.cron.run(CronKind::Automation).await.unwrap();
    let jobs = queue.list_for_candidate(candidate.id).await.unwrap();
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].retry_count, 3);
    assert!(queue.fetch_due(10).await.unwrap().is_empty());

    let report = app.state.cron.run(CronKind::Automation).await.unwrap();
    assert_eq!(report.processed, 0);
    assert!(app.messenger.sent().is_empty());
}

#[tokio::test]
async fn future_jobs_wait_and_pending_jobs_can_be_cancelled() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(42)).await;
    let queue = &app.state.automation;

    let later = Utc::now() + Duration::hours(2);
    let EnqueueOutcome::Enqueued(job) = queue
        .enqueue(ActionType::SendTestTask, candidate.id, request.id, Some(later), None)
        .await
        .unwrap()
    else {
        panic!("expected a new job");
    };
    assert!(queue.fetch_due(10).await.unwrap().is_empty());
    assert_eq!(queue.fetch_due_at(later, 10).await.unwrap().len(), 1);

    assert!(queue.cancel(job.id).await.unwrap());
    assert!(!queue.cancel(job.id).await.unwrap());
    let stored = queue.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(queue.fetch_due_at(later, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn lost_claim_counts_as_skipped() {
    let app = TestApp::new();
    let request = app.seed_request(|_| {}).await;
    let candidate = app.seed_candidate(|c| c.telegram_chat_id = Some(42)).await;
    let queue = &app.state.automation;
    let EnqueueOutcome::Enqueued(job) = queue
        .enqueue(ActionType::SendTestTask, candidate.id, request.id, None, None)
        .await
        .unwrap()
    else {
        panic!("expected a new job");
    };

    let claimed = assert_ok!(queue.mark_processing(job.id).await);
    assert!(claimed.is_some());
    let lost = assert_ok!(queue.mark_processing(job.id).await);
    assert!(lost.is_none());
}

#[tokio::test]
async fn cron_endpoint_requires_secret() {
    let app = TestApp::new();
    let router = app.router();

    let res = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/automation")
                .header("x-cron-secret", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/maintenance")
                .header("x-cron-secret", CRON_SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["processed"], 0);

    let res = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cron/unknown")
                .header("x-cron-secret", CRON_SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
