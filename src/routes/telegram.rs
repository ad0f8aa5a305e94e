use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::dto::telegram_dto::Update;
use crate::utils::telegram_auth::{verify_secret, SECRET_TOKEN_HEADER};
use crate::AppState;

/// Telegram retries any non-2xx answer, so every outcome is acknowledged
/// with 200 and failures are only logged.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let ack = (StatusCode::OK, Json(json!({ "ok": true })));

    let presented = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_secret(state.webhook_secret.as_deref(), presented) {
        tracing::warn!("Telegram webhook secret mismatch, update ignored");
        return ack;
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed Telegram update");
            return ack;
        }
    };
    let update_id = update.update_id;
    tracing::info!(update_id, "Received Telegram update");

    if let Err(e) = state.bot.handle_update(update).await {
        tracing::error!(update_id, error = %e, "Telegram update handling failed");
    }
    ack
}
