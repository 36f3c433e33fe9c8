use axum::{
    body::Bytes,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use cascade_core::{ExecutionOutput, ImportOutput, ScriptReport};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::validation::{self, ExecuteRequest, ExportStepRequest, ImportQuery, ValidateRequest};
use crate::AppState;

/// Health check with pool occupancy.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": cascade_core::version(),
        "pool": state.service.pool_stats(),
    }))
}

pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecutionOutput>, ApiError> {
    validation::require_code(&req.code)?;
    let out = state
        .service
        .execute_script(&req.code, req.gui_state, req.mesh_resolution)
        .await?;
    Ok(Json(out))
}

pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Json<ScriptReport> {
    Json(state.service.validate_script(&req.code))
}

fn attachment(content_type: &'static str, filename: &'static str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    )
        .into_response()
}

pub async fn export_stl(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    validation::require_code(&req.code)?;
    let stl = state
        .service
        .export_stl(&req.code, req.gui_state, req.mesh_resolution)
        .await?;
    Ok(attachment("model/stl", "attachment; filename=\"model.stl\"", stl))
}

pub async fn export_obj(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    validation::require_code(&req.code)?;
    let obj = state
        .service
        .export_obj(&req.code, req.gui_state, req.mesh_resolution)
        .await?;
    Ok(attachment("model/obj", "attachment; filename=\"model.obj\"", obj))
}

pub async fn export_step(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExportStepRequest>,
) -> Result<Response, ApiError> {
    validation::require_code(&req.code)?;
    let step = state.service.export_step(&req.code, req.gui_state).await?;
    Ok(attachment("model/step", "attachment; filename=\"model.step\"", step))
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<Json<ImportOutput>, ApiError> {
    validation::check_upload(&query.filename, body.len(), state.settings.max_upload_bytes)?;
    let out = state
        .service
        .import_file(&query.filename, body.to_vec())
        .await?;
    Ok(Json(out))
}
