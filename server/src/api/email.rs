use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use crm::{
    email::{self, BatchReport, BatchRequest, EmailStatus, SendRequest, SentEmail, SweepReport},
    templates::{self, TemplateInput},
};
use entity::email_templates;
use platform_api::{ApiResult, ValidJson};

use crate::http::AppState;

pub async fn list_templates(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<email_templates::Model>>> {
    Ok(Json(templates::list(&state.pool).await?))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<email_templates::Model>> {
    Ok(Json(templates::get(&state.pool, id).await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<TemplateInput>,
) -> ApiResult<(StatusCode, Json<email_templates::Model>)> {
    let template = templates::create(&state.pool, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidJson(input): ValidJson<TemplateInput>,
) -> ApiResult<Json<email_templates::Model>> {
    Ok(Json(templates::update(&state.pool, id, input, Utc::now()).await?))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<StatusCode> {
    templates::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn status(State(state): State<AppState>) -> Json<EmailStatus> {
    Json(state.mailer.status())
}

pub async fn send(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<SendRequest>,
) -> ApiResult<Json<SentEmail>> {
    Ok(Json(
        email::send_to_lead(&state.pool, &state.mailer, request, Utc::now()).await?,
    ))
}

pub async fn batch(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<BatchRequest>,
) -> ApiResult<Json<BatchReport>> {
    Ok(Json(
        email::send_batch(&state.pool, &state.mailer, request, Utc::now()).await?,
    ))
}

pub async fn process_scheduled(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(
        email::process_scheduled(&state.pool, &state.mailer, Utc::now()).await?,
    ))
}
