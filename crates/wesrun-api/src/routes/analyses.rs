//! Analysis lifecycle API routes.
//!
//! ## Routes
//!
//! - `POST   /analyses` - Launch an analysis
//! - `GET    /analyses` - List analyses (optional `name` / `status` filters)
//! - `GET    /analyses/{id}` - Get an analysis by ID
//! - `DELETE /analyses/{id}` - Abort an analysis

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use wesrun_core::AnalysisId;
use wesrun_flow::prelude::{AnalysisJob, AnalysisStatus, LaunchRequest, PayloadRef};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Request to launch an analysis.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnalysisRequest {
    /// Analysis name (unique among non-terminal analyses).
    pub name: String,
    /// Pointer to the externally stored launch parameters.
    pub payload_ref: PayloadRef,
}

/// List analyses response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAnalysesResponse {
    /// Matching analyses.
    pub analyses: Vec<AnalysisJob>,
}

/// Optional list filters.
#[derive(Debug, Deserialize)]
pub struct ListFilters {
    /// Filter by exact name.
    pub name: Option<String>,
    /// Filter by lifecycle status.
    pub status: Option<String>,
}

/// Builds the analysis routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analyses", get(list_analyses).post(create_analysis))
        .route("/analyses/:id", get(get_analysis).delete(abort_analysis))
}

async fn create_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateAnalysisRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .service
        .launch(LaunchRequest {
            name: request.name,
            payload_ref: request.payload_ref,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<ListFilters>,
) -> ApiResult<Json<ListAnalysesResponse>> {
    let status = filters
        .status
        .as_deref()
        .map(str::parse::<AnalysisStatus>)
        .transpose()
        .map_err(|_| {
            ApiError::bad_request(format!(
                "unknown status '{}'",
                filters.status.as_deref().unwrap_or_default()
            ))
        })?;
    let analyses = state.service.list(filters.name.as_deref(), status).await?;
    Ok(Json(ListAnalysesResponse { analyses }))
}

async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AnalysisJob>> {
    let id = parse_id(&id)?;
    let job = state.service.get(&id).await?;
    Ok(Json(job))
}

async fn abort_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AnalysisJob>> {
    let id = parse_id(&id)?;
    let job = state.service.abort(&id).await?;
    Ok(Json(job))
}

fn parse_id(raw: &str) -> ApiResult<AnalysisId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("'{raw}' is not a valid analysis ID")))
}
