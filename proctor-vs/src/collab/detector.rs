//! Face detector collaborator
//!
//! The model itself is opaque: it receives raw image bytes and returns
//! zero or more detections with confidence scores.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::Detection;

/// Detector failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    /// Model not loaded, endpoint unreachable or overloaded
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference did not finish in time
    #[error("Inference timed out after {0:?}")]
    InferenceTimeout(Duration),

    /// Detector rejected the image or answered with something unusable
    #[error("Invalid detector response: {0}")]
    InvalidResponse(String),
}

impl DetectorError {
    /// Worth another attempt within the retry budget
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DetectorError::ModelUnavailable(_) | DetectorError::InferenceTimeout(_)
        )
    }
}

/// Binary face classifier
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detector name for logs
    fn name(&self) -> &'static str;

    /// Run inference on an encoded image
    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError>;
}

/// Detector reached over HTTP
///
/// POSTs the encoded image as `application/octet-stream` and expects a JSON
/// array of detections:
/// `[{"bbox": {"x": 0, "y": 0, "width": 64, "height": 64}, "confidence": 0.93}]`
pub struct RemoteDetector {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl RemoteDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> proctor_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| proctor_common::Error::Config(format!("Detector client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport_error(&self, err: reqwest::Error) -> DetectorError {
        if err.is_timeout() {
            DetectorError::InferenceTimeout(self.timeout)
        } else {
            DetectorError::ModelUnavailable(err.to_string())
        }
    }
}

#[async_trait]
impl FaceDetector for RemoteDetector {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DetectorError::ModelUnavailable(format!(
                "detector answered {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(DetectorError::InvalidResponse(format!(
                "detector answered {}",
                status
            )));
        }

        let detections: Vec<Detection> = response
            .json()
            .await
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;

        if let Some(bad) = detections
            .iter()
            .find(|d| !(0.0..=1.0).contains(&d.confidence))
        {
            return Err(DetectorError::InvalidResponse(format!(
                "confidence out of range: {}",
                bad.confidence
            )));
        }

        debug!(count = detections.len(), "Detector returned detections");
        Ok(detections)
    }
}
