//! Verifier
//!
//! Runs the detector against one alert, classifies the result and records it.
//! Dependency faults never become false positives: after the retry budget is
//! spent they produce an inconclusive record instead.

use chrono::Utc;
use proctor_common::events::{EventBus, ProctorEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::collab::{DetectorError, FaceDetector, ImageStore, StorageError};
use crate::db::SessionJournal;
use crate::models::{
    classify, Alert, Classification, Detection, InconclusiveRecord, VerificationOutcome,
    VerificationResult,
};
use crate::utils::{retry_budget, retry_transient};

use super::counters::SessionCounterStore;

/// Detector call budget and classification threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifierSettings {
    /// Per-attempt inference timeout
    pub detector_timeout: Duration,
    /// Attempts for detector and storage calls (at least 1)
    pub max_attempts: u32,
    /// Minimum confidence for a detection to count as a face
    pub confidence_threshold: f32,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            detector_timeout: Duration::from_secs(5),
            max_attempts: 3,
            confidence_threshold: 0.5,
        }
    }
}

impl VerifierSettings {
    /// Longest a single detection can take before it turns inconclusive
    ///
    /// A session drain must outlast this or one hung detector call fails
    /// the close.
    pub fn detection_budget(&self) -> Duration {
        retry_budget(self.max_attempts, self.detector_timeout)
    }
}

pub struct Verifier {
    detector: Arc<dyn FaceDetector>,
    store: Arc<dyn ImageStore>,
    journal: SessionJournal,
    counters: Arc<SessionCounterStore>,
    events: EventBus,
    settings: VerifierSettings,
}

impl Verifier {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        store: Arc<dyn ImageStore>,
        journal: SessionJournal,
        counters: Arc<SessionCounterStore>,
        events: EventBus,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            detector,
            store,
            journal,
            counters,
            events,
            settings,
        }
    }

    /// Verify an alert and record the result
    pub async fn process(&self, alert: &Alert) -> VerificationResult {
        let result = self.verify(alert).await;
        self.record(alert, result.clone()).await;
        result
    }

    /// Verify without touching the counters or the journal
    pub async fn verify(&self, alert: &Alert) -> VerificationResult {
        let image = match self.load_image(alert).await {
            Ok(image) => image,
            Err(e) => return self.inconclusive(alert, format!("Image unavailable: {}", e)),
        };

        let detections = match self.detect(&image).await {
            Ok(detections) => detections,
            Err(e) => return self.inconclusive(alert, e.to_string()),
        };

        let (face_count, classification) =
            classify(&detections, self.settings.confidence_threshold);

        let evidence_ref = if classification == Classification::TruePositive {
            self.store_evidence(alert, &image).await
        } else {
            None
        };

        VerificationResult::Verified(VerificationOutcome {
            alert_id: alert.id,
            epoch: alert.epoch,
            alert_type: alert.alert_type.clone(),
            face_count,
            classification,
            evidence_ref,
            verified_at: Utc::now(),
        })
    }

    /// Route an alert whose verification task died to the inconclusive path
    pub async fn fail_inconclusive(&self, alert: &Alert, reason: String) {
        let result = self.inconclusive(alert, reason);
        self.record(alert, result).await;
    }

    async fn load_image(&self, alert: &Alert) -> Result<Vec<u8>, StorageError> {
        let store = &self.store;
        retry_transient(
            "load_image",
            self.settings.max_attempts,
            StorageError::is_transient,
            || store.load(&alert.image_ref),
        )
        .await
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        let detector = &self.detector;
        let timeout = self.settings.detector_timeout;

        retry_transient(
            "detect",
            self.settings.max_attempts,
            DetectorError::is_transient,
            || async move {
                match tokio::time::timeout(timeout, detector.detect(image)).await {
                    Ok(result) => result,
                    Err(_) => Err(DetectorError::InferenceTimeout(timeout)),
                }
            },
        )
        .await
    }

    /// Copy the image to permanent storage; failure keeps the verdict
    async fn store_evidence(&self, alert: &Alert, image: &[u8]) -> Option<crate::collab::StoredRef> {
        let store = &self.store;
        let name = alert.image_ref.as_str();

        match retry_transient(
            "store_evidence",
            self.settings.max_attempts,
            StorageError::is_transient,
            || store.store(name, image),
        )
        .await
        {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(
                    alert_id = %alert.id,
                    error = %e,
                    "Evidence storage failed, keeping verdict without evidence"
                );
                None
            }
        }
    }

    fn inconclusive(&self, alert: &Alert, reason: String) -> VerificationResult {
        VerificationResult::Inconclusive(InconclusiveRecord {
            alert_id: alert.id,
            epoch: alert.epoch,
            alert_type: alert.alert_type.clone(),
            reason,
            failed_at: Utc::now(),
        })
    }

    /// Journal, then apply to memory, then announce
    ///
    /// The journal write comes first so a close that finishes right after the
    /// in-memory update cannot be followed by a stray journal row for its epoch.
    async fn record(&self, alert: &Alert, result: VerificationResult) {
        let verdict = result.verdict();

        let (applied, face_count) = match result {
            VerificationResult::Verified(outcome) => {
                if let Err(e) = self.journal.record_outcome(&outcome).await {
                    warn!(alert_id = %alert.id, error = %e, "Failed to journal verification outcome");
                }
                let face_count = outcome.face_count;
                info!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    epoch = alert.epoch,
                    face_count,
                    verdict = outcome.classification.as_str(),
                    "Alert verified"
                );
                (self.counters.apply_verification(outcome).await, Some(face_count))
            }
            VerificationResult::Inconclusive(record) => {
                if let Err(e) = self.journal.record_inconclusive(&record).await {
                    warn!(alert_id = %alert.id, error = %e, "Failed to journal inconclusive verification");
                }
                warn!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    epoch = alert.epoch,
                    reason = %record.reason,
                    "Verification inconclusive"
                );
                (self.counters.apply_inconclusive(record).await, None)
            }
        };

        if !applied {
            debug!(alert_id = %alert.id, "Alert already resolved, result ignored");
            return;
        }

        self.events.emit_lossy(ProctorEvent::AlertVerified {
            alert_id: alert.id,
            alert_type: alert.alert_type.clone(),
            epoch: alert.epoch,
            verdict,
            face_count,
            timestamp: Utc::now(),
        });

        if let Err(e) = self.store.discard(&alert.image_ref).await {
            debug!(alert_id = %alert.id, error = %e, "Failed to discard staged image");
        }
    }
}
