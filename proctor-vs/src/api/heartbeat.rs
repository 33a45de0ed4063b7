//! Edge heartbeat endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::HeartbeatSample;
use crate::{ApiError, ApiResult, AppState};

/// POST /heartbeat request body
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub device_id: String,
    pub duration_seconds: f64,
    pub frames_processed: u64,
    pub frames_discarded: u64,
    #[serde(default)]
    pub local_incidents: u64,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub epoch: u64,
}

/// POST /heartbeat
pub async fn record_heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<Json<HeartbeatResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let epoch = state
        .pipeline
        .record_heartbeat(HeartbeatSample {
            device_id: request.device_id,
            duration_seconds: request.duration_seconds,
            frames_processed: request.frames_processed,
            frames_discarded: request.frames_discarded,
            local_incidents: request.local_incidents,
            received_at: Utc::now(),
        })
        .await?;

    Ok(Json(HeartbeatResponse {
        status: "recorded",
        epoch,
    }))
}

pub fn heartbeat_routes() -> Router<AppState> {
    Router::new().route("/heartbeat", post(record_heartbeat))
}
