use axum::{Json, extract::State};
use chrono::Utc;
use crm::analytics::{self, Dashboard, FunnelStage, StageDuration, WinLoss};
use platform_api::ApiResult;

use crate::http::AppState;

pub async fn funnel(State(state): State<AppState>) -> ApiResult<Json<Vec<FunnelStage>>> {
    Ok(Json(analytics::funnel(&state.pool).await?))
}

pub async fn stage_durations(State(state): State<AppState>) -> ApiResult<Json<Vec<StageDuration>>> {
    Ok(Json(analytics::stage_durations(&state.pool).await?))
}

pub async fn win_loss(State(state): State<AppState>) -> ApiResult<Json<WinLoss>> {
    Ok(Json(analytics::win_loss(&state.pool).await?))
}

pub async fn dashboard(State(state): State<AppState>) -> ApiResult<Json<Dashboard>> {
    Ok(Json(analytics::dashboard(&state.pool, Utc::now()).await?))
}
