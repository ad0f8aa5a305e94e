use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::dto::public_dto::{
    QuestionnaireView, SubmitQuestionnaireRequest, SubmitQuestionnaireResponse,
    SubmitTestTaskRequest, SubmitTestTaskResponse,
};
use crate::error::{Error, Result};
use crate::utils::validation::validated;
use crate::AppState;

#[axum::debug_handler]
pub async fn get_questionnaire(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<QuestionnaireView>> {
    let view = state.questionnaires.view(&token).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn submit_questionnaire(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitQuestionnaireRequest>,
) -> Result<Json<SubmitQuestionnaireResponse>> {
    let response = state.questionnaires.submit(&token, payload.answers).await?;
    let completed_at = response
        .completed_at
        .ok_or_else(|| Error::Internal("completed questionnaire without timestamp".to_string()))?;
    Ok(Json(SubmitQuestionnaireResponse {
        status: response.status,
        completed_at,
    }))
}

#[axum::debug_handler]
pub async fn submit_test_task(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitTestTaskRequest>,
) -> Result<Json<SubmitTestTaskResponse>> {
    let payload = validated(payload)?;
    let submission = state
        .test_tasks
        .submit_by_token(&token, payload.submission.trim())
        .await?;
    Ok(Json(SubmitTestTaskResponse {
        status: submission.status,
        submitted_at: submission.submitted_at,
        on_time: submission.on_time,
    }))
}
