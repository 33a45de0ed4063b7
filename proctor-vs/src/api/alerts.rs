//! Alert ingestion endpoint

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::AlertSubmission;
use crate::{ApiError, ApiResult, AppState};

/// Largest accepted multipart body
pub const MAX_ALERT_BODY_BYTES: usize = 20 * 1024 * 1024;

/// POST /ingest-alert response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub alert_id: Uuid,
    pub epoch: u64,
    pub status: &'static str,
    pub alert_type: String,
    pub server_filename: String,
}

/// POST /ingest-alert
///
/// Multipart fields: `alert_type` (required), `image` (required file),
/// `timestamp` (optional edge epoch seconds), `device_id` (optional).
/// Answers 202 once the alert is queued; verification happens later.
pub async fn ingest_alert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let mut alert_type: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;
    let mut metadata = Map::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "alert_type" => {
                alert_type = Some(field.text().await.map_err(malformed)?);
            }
            "timestamp" => {
                let raw = field.text().await.map_err(malformed)?;
                let seconds: f64 = raw.trim().parse().map_err(|_| {
                    ApiError::BadRequest(format!("timestamp must be a number, got '{}'", raw))
                })?;
                metadata.insert("edge_timestamp".to_string(), Value::from(seconds));
            }
            "device_id" => {
                let device_id = field.text().await.map_err(malformed)?;
                metadata.insert("device_id".to_string(), Value::from(device_id));
            }
            "image" => {
                if let Some(file_name) = field.file_name() {
                    metadata.insert("original_filename".to_string(), Value::from(file_name));
                }
                let bytes = field.bytes().await.map_err(malformed)?;
                image = Some(bytes.to_vec());
            }
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let alert_type =
        alert_type.ok_or_else(|| ApiError::BadRequest("missing field 'alert_type'".to_string()))?;
    let image = image.ok_or_else(|| ApiError::InvalidImage("missing field 'image'".to_string()))?;

    let alert = state
        .pipeline
        .submit(AlertSubmission {
            alert_type,
            image,
            metadata: Value::Object(metadata),
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            alert_id: alert.id,
            epoch: alert.epoch,
            status: "accepted",
            alert_type: alert.alert_type,
            server_filename: alert.image_ref.to_string(),
        }),
    ))
}

fn malformed(err: MultipartError) -> ApiError {
    ApiError::BadRequest(err.body_text())
}

pub fn alert_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest-alert", post(ingest_alert))
        .layer(DefaultBodyLimit::max(MAX_ALERT_BODY_BYTES))
}
