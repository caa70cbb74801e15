use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use crm::tasks::{self, ReminderRun, TaskFilter, TaskInput, TaskView};
use platform_api::{ApiResult, ValidJson};

use crate::http::AppState;

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<Vec<TaskView>>> {
    Ok(Json(tasks::list(&state.pool, filter).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Json<TaskView>> {
    Ok(Json(tasks::get(&state.pool, id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<TaskInput>,
) -> ApiResult<(StatusCode, Json<TaskView>)> {
    let task = tasks::create(&state.pool, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidJson(input): ValidJson<TaskInput>,
) -> ApiResult<Json<TaskView>> {
    Ok(Json(tasks::update(&state.pool, id, input, Utc::now()).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    tasks::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Json<TaskView>> {
    Ok(Json(tasks::toggle(&state.pool, id, Utc::now()).await?))
}

pub async fn reminders(State(state): State<AppState>) -> ApiResult<Json<ReminderRun>> {
    Ok(Json(tasks::generate_reminders(&state.pool, Utc::now()).await?))
}
