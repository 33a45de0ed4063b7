//! Alert Intake Queue
//!
//! Validates an alert, reserves its pending slot, stages the image and hands
//! the alert to the verification pool. The caller never waits for detection.

use chrono::Utc;
use image::ImageFormat;
use proctor_common::events::{EventBus, ProctorEvent};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collab::ImageStore;
use crate::db::SessionJournal;
use crate::models::{sanitize_alert_type, Alert};

use super::counters::SessionCounterStore;
use super::pool::VerificationPool;

/// Alert as received from an edge device
#[derive(Debug, Clone)]
pub struct AlertSubmission {
    pub alert_type: String,
    pub image: Vec<u8>,
    /// JSON object or null
    pub metadata: Value,
}

/// Intake rejection; no state was changed
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid alert: {0}")]
    InvalidInput(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Verification queue saturated ({pending} pending, limit {limit})")]
    QueueSaturated { pending: u64, limit: u64 },

    #[error("Dependency unavailable: {0}")]
    TransientDependencyFailure(String),
}

pub struct AlertIntake {
    counters: Arc<SessionCounterStore>,
    store: Arc<dyn ImageStore>,
    journal: SessionJournal,
    pool: Arc<VerificationPool>,
    events: EventBus,
    max_pending: u64,
}

impl AlertIntake {
    pub fn new(
        counters: Arc<SessionCounterStore>,
        store: Arc<dyn ImageStore>,
        journal: SessionJournal,
        pool: Arc<VerificationPool>,
        events: EventBus,
        max_pending: u64,
    ) -> Self {
        Self {
            counters,
            store,
            journal,
            pool,
            events,
            max_pending,
        }
    }

    /// Accept an alert for verification
    pub async fn submit(&self, submission: AlertSubmission) -> Result<Alert, IntakeError> {
        let alert_type = sanitize_alert_type(&submission.alert_type);
        if alert_type.is_empty() {
            return Err(IntakeError::InvalidInput(
                "alert_type must contain at least one of [A-Za-z0-9_]".to_string(),
            ));
        }

        let metadata = match submission.metadata {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(IntakeError::InvalidInput(format!(
                    "metadata must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let (image, format) = validate_image(submission.image).await?;

        let epoch = self
            .counters
            .try_begin(self.max_pending)
            .await
            .map_err(|s| IntakeError::QueueSaturated {
                pending: s.pending,
                limit: s.limit,
            })?;

        let id = Uuid::new_v4();
        let submitted_at = Utc::now();
        let extension = format.extensions_str().first().copied().unwrap_or("img");
        let name = format!(
            "{}_{}_{}.{}",
            submitted_at.format("%Y%m%d_%H%M%S"),
            alert_type,
            id,
            extension
        );

        let image_ref = match self.store.stage(&name, &image).await {
            Ok(image_ref) => image_ref,
            Err(e) => {
                self.counters.abandon(epoch).await;
                warn!(alert_id = %id, error = %e, "Failed to stage alert image");
                return Err(IntakeError::TransientDependencyFailure(e.to_string()));
            }
        };

        let alert = Alert {
            id,
            epoch,
            alert_type,
            image_ref,
            metadata,
            submitted_at,
        };

        if let Err(e) = self.journal.record_alert(&alert).await {
            self.counters.abandon(epoch).await;
            if let Err(discard_err) = self.store.discard(&alert.image_ref).await {
                warn!(alert_id = %id, error = %discard_err, "Failed to discard staged image");
            }
            warn!(alert_id = %id, error = %e, "Failed to journal alert");
            return Err(IntakeError::TransientDependencyFailure(e.to_string()));
        }

        info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            epoch,
            image = %alert.image_ref,
            "Alert accepted"
        );

        self.events.emit_lossy(ProctorEvent::AlertAccepted {
            alert_id: alert.id,
            alert_type: alert.alert_type.clone(),
            epoch,
            timestamp: submitted_at,
        });

        self.pool.dispatch(alert.clone());
        Ok(alert)
    }

    /// Re-dispatch alerts that were accepted before a restart
    pub async fn resume(&self, alerts: Vec<Alert>) -> usize {
        let count = alerts.len();
        for alert in alerts {
            self.counters.begin_in(alert.epoch).await;
            self.pool.dispatch(alert);
        }
        if count > 0 {
            info!(count, "Re-dispatched pending alerts from journal");
        }
        count
    }
}

/// Decode the image off the async runtime to prove it is usable
async fn validate_image(image: Vec<u8>) -> Result<(Vec<u8>, ImageFormat), IntakeError> {
    if image.is_empty() {
        return Err(IntakeError::InvalidImage("image is empty".to_string()));
    }

    tokio::task::spawn_blocking(move || {
        let format = image::guess_format(&image)
            .map_err(|e| IntakeError::InvalidImage(format!("unrecognised format: {}", e)))?;
        image::load_from_memory_with_format(&image, format)
            .map_err(|e| IntakeError::InvalidImage(e.to_string()))?;
        Ok((image, format))
    })
    .await
    .map_err(|e| IntakeError::TransientDependencyFailure(format!("image validation: {}", e)))?
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[tokio::test]
    async fn test_validate_image_accepts_png() {
        let (bytes, format) = validate_image(png_bytes()).await.unwrap();
        assert_eq!(format, ImageFormat::Png);
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn test_validate_image_rejects_garbage() {
        assert!(matches!(
            validate_image(Vec::new()).await,
            Err(IntakeError::InvalidImage(_))
        ));
        assert!(matches!(
            validate_image(b"definitely not an image".to_vec()).await,
            Err(IntakeError::InvalidImage(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_image_rejects_truncated_png() {
        let mut bytes = png_bytes();
        bytes.truncate(20);
        assert!(matches!(
            validate_image(bytes).await,
            Err(IntakeError::InvalidImage(_))
        ));
    }
}
