//! Report retrieval endpoint

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};

/// GET /reports/:report_id
pub async fn get_report(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let report_id = Uuid::parse_str(&report_id)
        .map_err(|_| ApiError::BadRequest(format!("'{}' is not a report id", report_id)))?;

    state
        .pipeline
        .load_report(report_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("report {}", report_id)))
}

pub fn report_routes() -> Router<AppState> {
    Router::new().route("/reports/:report_id", get(get_report))
}
