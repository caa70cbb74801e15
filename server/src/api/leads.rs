use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use crm::{
    columns::{ColumnMapping, auto_map_columns},
    dedup::{self, DuplicateCandidate, DuplicateGroup, DuplicateMatch},
    history::{self, ContactInput, HistoryView},
    leads::{self, BulkImport, ImportReport, LeadDetail, LeadFilter, LeadInput, LeadView},
    merge::{MergeOutcome, MergeRequest, merge_leads},
    tabular::{ParseRequest, ParsedTable, parse_table},
    transitions::{
        self, BulkStageRequest, CadenceAdvance, CadenceRequest, StageChange, StageRequest,
    },
};
use platform_api::{ApiResult, ValidJson};
use serde::Deserialize;

use crate::http::AppState;

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<LeadFilter>,
) -> ApiResult<Json<Vec<LeadView>>> {
    Ok(Json(leads::list(&state.pool, filter, Utc::now()).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<Json<LeadDetail>> {
    Ok(Json(leads::get(&state.pool, id, Utc::now()).await?))
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<LeadInput>,
) -> ApiResult<(StatusCode, Json<LeadView>)> {
    let lead = leads::create(&state.pool, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(lead)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidJson(input): ValidJson<LeadInput>,
) -> ApiResult<Json<LeadView>> {
    Ok(Json(leads::update(&state.pool, id, input, Utc::now()).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i32>) -> ApiResult<StatusCode> {
    leads::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_stage(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidJson(request): ValidJson<StageRequest>,
) -> ApiResult<Json<StageChange>> {
    let (stage, reason) = request.validate()?;
    Ok(Json(
        transitions::set_stage(&state.pool, id, stage, reason, Utc::now()).await?,
    ))
}

pub async fn bulk_stage(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<BulkStageRequest>,
) -> ApiResult<Json<Vec<StageChange>>> {
    let (stage, reason) = request.change.validate()?;
    Ok(Json(
        transitions::bulk_set_stage(&state.pool, &request.ids, stage, reason, Utc::now()).await?,
    ))
}

pub async fn set_cadence(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidJson(request): ValidJson<CadenceRequest>,
) -> ApiResult<Json<CadenceAdvance>> {
    let step = request.validate()?;
    Ok(Json(
        transitions::advance_cadence(&state.pool, id, step, Utc::now()).await?,
    ))
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> ApiResult<Json<Vec<HistoryView>>> {
    Ok(Json(history::list_history(&state.pool, id).await?))
}

pub async fn log_contact(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidJson(input): ValidJson<ContactInput>,
) -> ApiResult<(StatusCode, Json<HistoryView>)> {
    let entry = history::log_contact(&state.pool, id, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn bulk_import(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<BulkImport>,
) -> ApiResult<Json<ImportReport>> {
    Ok(Json(leads::bulk_import(&state.pool, request, Utc::now()).await?))
}

#[derive(Debug, Deserialize)]
pub struct MapColumnsRequest {
    #[serde(default)]
    headers: Vec<String>,
}

pub async fn map_columns(
    ValidJson(request): ValidJson<MapColumnsRequest>,
) -> Json<Vec<ColumnMapping>> {
    Json(auto_map_columns(request.headers.as_slice()))
}

pub async fn parse_import(ValidJson(request): ValidJson<ParseRequest>) -> ApiResult<Json<ParsedTable>> {
    Ok(Json(parse_table(&request.text, request.has_headers)?))
}

pub async fn check_duplicates(
    State(state): State<AppState>,
    ValidJson(candidate): ValidJson<DuplicateCandidate>,
) -> ApiResult<Json<Vec<DuplicateMatch>>> {
    Ok(Json(dedup::check_duplicates(&state.pool, &candidate).await?))
}

pub async fn duplicates(State(state): State<AppState>) -> ApiResult<Json<Vec<DuplicateGroup>>> {
    Ok(Json(dedup::find_duplicate_groups(&state.pool).await?))
}

pub async fn merge(
    State(state): State<AppState>,
    ValidJson(request): ValidJson<MergeRequest>,
) -> ApiResult<Json<MergeOutcome>> {
    Ok(Json(merge_leads(&state.pool, &request, Utc::now()).await?))
}

pub async fn export_csv(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let csv = leads::export_csv(&state.pool, Utc::now()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"leads.csv\""),
        ],
        csv,
    ))
}
