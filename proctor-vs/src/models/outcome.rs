//! Verification outcomes

use chrono::{DateTime, Utc};
use proctor_common::events::Verdict;
use serde::{Deserialize, Serialize};

use super::alert::{AlertId, SessionEpoch};
use crate::collab::StoredRef;

/// Face bounding box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Single detection returned by the face detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector confidence (0.0-1.0)
    pub confidence: f32,
}

/// Classification of a completed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    TruePositive,
    FalsePositive,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::TruePositive => "TRUE_POSITIVE",
            Classification::FalsePositive => "FALSE_POSITIVE",
        }
    }

    pub fn verdict(&self) -> Verdict {
        match self {
            Classification::TruePositive => Verdict::TruePositive,
            Classification::FalsePositive => Verdict::FalsePositive,
        }
    }
}

/// Count faces at or above `threshold` and classify the alert
///
/// One confident face is enough for a true positive.
pub fn classify(detections: &[Detection], threshold: f32) -> (u32, Classification) {
    let face_count = detections
        .iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= threshold)
        .count() as u32;

    let classification = if face_count >= 1 {
        Classification::TruePositive
    } else {
        Classification::FalsePositive
    };

    (face_count, classification)
}

/// Ledger entry for a completed verification (append-only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub alert_id: AlertId,
    pub epoch: SessionEpoch,
    pub alert_type: String,
    pub face_count: u32,
    pub classification: Classification,
    /// Permanent copy of the image, true positives only
    pub evidence_ref: Option<StoredRef>,
    pub verified_at: DateTime<Utc>,
}

/// Verification that could not complete because a dependency failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InconclusiveRecord {
    pub alert_id: AlertId,
    pub epoch: SessionEpoch,
    pub alert_type: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// What the verifier concluded for one alert
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    Verified(VerificationOutcome),
    Inconclusive(InconclusiveRecord),
}

impl VerificationResult {
    pub fn verdict(&self) -> Verdict {
        match self {
            VerificationResult::Verified(outcome) => outcome.classification.verdict(),
            VerificationResult::Inconclusive(_) => Verdict::Inconclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 40.0,
                height: 40.0,
            },
            confidence,
        }
    }

    #[test]
    fn test_no_detections_is_false_positive() {
        assert_eq!(classify(&[], 0.5), (0, Classification::FalsePositive));
    }

    #[test]
    fn test_low_confidence_faces_do_not_count() {
        let detections = [detection(0.2), detection(0.49)];
        assert_eq!(classify(&detections, 0.5), (0, Classification::FalsePositive));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let detections = [detection(0.5), detection(0.3), detection(0.97)];
        assert_eq!(classify(&detections, 0.5), (2, Classification::TruePositive));
    }

    #[test]
    fn test_nan_confidence_ignored() {
        let detections = [detection(f32::NAN)];
        assert_eq!(classify(&detections, 0.0), (0, Classification::FalsePositive));
    }
}
