use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::dto::cron_dto::CronReport;
use crate::error::{Error, Result};
use crate::services::cron_service::CronKind;
use crate::utils::telegram_auth::verify_secret;
use crate::AppState;

pub const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub async fn run_cron(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CronReport>> {
    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_secret(Some(&*state.cron_secret), presented) {
        return Err(Error::Unauthorized("invalid cron secret".to_string()));
    }
    let kind: CronKind = kind.parse()?;
    let report = state.cron.run(kind).await?;
    Ok(Json(report))
}
