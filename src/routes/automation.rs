//! Operator endpoints, mounted behind the HR/admin JWT guard.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::dto::automation_dto::{
    AnalysisEnqueueResponse, CancelJobResponse, DecisionRequest, EnqueueJobRequest,
    EnqueueJobResponse, OutreachUpdateRequest, TestTaskReviewRequest,
};
use crate::error::{Error, Result};
use crate::models::automation_job::AutomationJob;
use crate::models::candidate::Candidate;
use crate::models::conversation::ConversationEntry;
use crate::models::outreach_item::{OutreachItemUpdate, OutreachQueueItem};
use crate::services::automation_queue::EnqueueOutcome;
use crate::utils::validation::validated;
use crate::AppState;

fn enqueue_response(outcome: EnqueueOutcome) -> (StatusCode, Json<EnqueueJobResponse>) {
    match outcome {
        EnqueueOutcome::Enqueued(job) => (
            StatusCode::CREATED,
            Json(EnqueueJobResponse::Enqueued { job }),
        ),
        EnqueueOutcome::Duplicate(existing_job_id) => (
            StatusCode::OK,
            Json(EnqueueJobResponse::Duplicate { existing_job_id }),
        ),
    }
}

#[axum::debug_handler]
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(payload): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<EnqueueJobResponse>)> {
    let payload = validated(payload)?;
    state.ctx.candidate(payload.candidate_id).await?;
    state.ctx.request(payload.request_id).await?;
    let outcome = state
        .automation
        .enqueue(
            payload.action_type,
            payload.candidate_id,
            payload.request_id,
            payload.scheduled_for,
            payload.payload,
        )
        .await?;
    Ok(enqueue_response(outcome))
}

#[axum::debug_handler]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelJobResponse>> {
    if state.automation.get(id).await?.is_none() {
        return Err(Error::NotFound(format!("Automation job {} not found", id)));
    }
    let cancelled = state.automation.cancel(id).await?;
    Ok(Json(CancelJobResponse { cancelled }))
}

#[axum::debug_handler]
pub async fn list_candidate_jobs(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Vec<AutomationJob>>> {
    let jobs = state.automation.list_for_candidate(candidate_id).await?;
    Ok(Json(jobs))
}

/// Records the recruiter's invite/reject decision and queues the message.
#[axum::debug_handler]
pub async fn decide_match(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<(StatusCode, Json<EnqueueJobResponse>)> {
    let pairing = state
        .ctx
        .repos
        .matches
        .get(match_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Match {} not found", match_id)))?;
    let candidate = state.ctx.candidate(pairing.candidate_id).await?;
    let action = payload.decision.action_type();
    if !candidate.pipeline_stage.allows(action) {
        return Err(Error::InvalidTransition {
            from: candidate.pipeline_stage,
            event: action.pipeline_event(),
        });
    }

    let decided = state
        .ctx
        .repos
        .matches
        .set_final_decision(match_id, payload.decision)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Match {} not found", match_id)))?;
    tracing::info!(
        %match_id,
        candidate_id = %decided.candidate_id,
        decision = %payload.decision,
        "Final decision recorded"
    );
    let outcome = state
        .automation
        .enqueue(
            action,
            decided.candidate_id,
            decided.request_id,
            None,
            None,
        )
        .await?;
    Ok(enqueue_response(outcome))
}

#[axum::debug_handler]
pub async fn enqueue_analysis(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<AnalysisEnqueueResponse>> {
    let enqueued = state.analysis.enqueue(candidate_id).await?;
    Ok(Json(AnalysisEnqueueResponse { enqueued }))
}

#[axum::debug_handler]
pub async fn update_outreach(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OutreachUpdateRequest>,
) -> Result<Json<OutreachQueueItem>> {
    let payload = validated(payload)?;
    let item = state
        .outreach
        .update(
            id,
            OutreachItemUpdate {
                subject: payload.subject,
                message: payload.message,
                scheduled_for: payload.scheduled_for,
            },
        )
        .await?;
    Ok(Json(item))
}

#[axum::debug_handler]
pub async fn cancel_outreach(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OutreachQueueItem>> {
    let item = state.outreach.cancel(id).await?;
    Ok(Json(item))
}

#[axum::debug_handler]
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> Result<Json<Vec<ConversationEntry>>> {
    state.ctx.candidate(candidate_id).await?;
    let history = state.ctx.conversations.history(candidate_id).await?;
    Ok(Json(history))
}

#[axum::debug_handler]
pub async fn review_test_task(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    Json(payload): Json<TestTaskReviewRequest>,
) -> Result<Json<Candidate>> {
    let payload = validated(payload)?;
    let candidate = state
        .test_tasks
        .review(candidate_id, payload.approved, payload.feedback)
        .await?;
    Ok(Json(candidate))
}
