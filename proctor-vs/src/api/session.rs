//! Session snapshot and close endpoints

use axum::{extract::State, routing::get, routing::post, Json, Router};
use serde::Serialize;
use tracing::info;

use crate::models::{DerivedMetrics, Report, SessionSnapshot};
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    /// Ratios as they would be reported if the session closed now
    pub metrics: DerivedMetrics,
    /// Sealed sessions whose report failed and will be retried by the next close
    pub awaiting_report: Vec<SessionSnapshot>,
}

/// GET /session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let snapshot = state.pipeline.snapshot().await;
    let metrics = DerivedMetrics::compute(&snapshot.counters);
    let awaiting_report = state.pipeline.sealed_sessions().await;

    Json(SessionResponse {
        snapshot,
        metrics,
        awaiting_report,
    })
}

/// POST /session/close
///
/// Drains, renders and resets the session. Failures leave it intact.
pub async fn close_session(State(state): State<AppState>) -> ApiResult<Json<Report>> {
    info!("Session close requested");

    match state.pipeline.close_session().await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            state.set_last_error(e.to_string()).await;
            Err(e.into())
        }
    }
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/close", post(close_session))
}
