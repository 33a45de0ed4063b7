//! Session counters, derived metrics and reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::alert::SessionEpoch;
use super::outcome::{Classification, InconclusiveRecord, VerificationOutcome};
use crate::collab::ArtifactRef;

/// Aggregate counters of one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub frames_processed_total: u64,
    pub frames_discarded_total: u64,
    pub local_incidents_total: u64,
    pub heartbeats_total: u64,
    pub true_positive_total: u64,
    pub false_positive_total: u64,
    pub inconclusive_total: u64,
    /// Accepted alerts whose verification has not finished yet
    pub pending_verifications: u64,
}

impl SessionCounters {
    /// Verifications that reached a verdict or failed inconclusively
    pub fn resolved_total(&self) -> u64 {
        self.true_positive_total
            .saturating_add(self.false_positive_total)
            .saturating_add(self.inconclusive_total)
    }

    pub fn is_empty(&self) -> bool {
        *self == SessionCounters::default()
    }
}

/// Largest per-sample count a heartbeat may carry
pub const MAX_SAMPLE_COUNT: u64 = i64::MAX as u64;

/// Edge efficiency report, folded additively into the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatSample {
    pub device_id: String,
    pub duration_seconds: f64,
    pub frames_processed: u64,
    pub frames_discarded: u64,
    pub local_incidents: u64,
    pub received_at: DateTime<Utc>,
}

impl HeartbeatSample {
    /// Reject malformed samples before they touch any state
    pub fn validate(&self) -> Result<(), String> {
        if self.device_id.trim().is_empty() {
            return Err("device_id must not be empty".to_string());
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            return Err(format!(
                "duration_seconds must be a non-negative number, got {}",
                self.duration_seconds
            ));
        }
        // Samples are journaled as SQLite INTEGER
        for (field, value) in [
            ("frames_processed", self.frames_processed),
            ("frames_discarded", self.frames_discarded),
            ("local_incidents", self.local_incidents),
        ] {
            if value > MAX_SAMPLE_COUNT {
                return Err(format!(
                    "{} must not exceed {}, got {}",
                    field, MAX_SAMPLE_COUNT, value
                ));
            }
        }
        Ok(())
    }
}

/// Verification counts for one alert type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTypeStats {
    pub total: u64,
    pub true_positive: u64,
    pub false_positive: u64,
    pub inconclusive: u64,
}

impl AlertTypeStats {
    pub fn record(&mut self, classification: Classification) {
        self.total += 1;
        match classification {
            Classification::TruePositive => self.true_positive += 1,
            Classification::FalsePositive => self.false_positive += 1,
        }
    }

    pub fn record_inconclusive(&mut self) {
        self.total += 1;
        self.inconclusive += 1;
    }
}

/// Ratios computed when a session closes
///
/// Every ratio is in `[0, 1]` and is `0` when its denominator is `0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// discarded / (processed + discarded)
    pub bandwidth_saved_ratio: f64,
    /// true positives / (true positives + false positives)
    pub verification_accuracy: f64,
    /// inconclusive / all resolved verifications
    pub inconclusive_ratio: f64,
}

impl DerivedMetrics {
    pub fn compute(counters: &SessionCounters) -> Self {
        // Sums are taken in u128 so saturated totals keep their proportions
        let processed = u128::from(counters.frames_processed_total);
        let discarded = u128::from(counters.frames_discarded_total);
        let tp = u128::from(counters.true_positive_total);
        let fp = u128::from(counters.false_positive_total);
        let inconclusive = u128::from(counters.inconclusive_total);

        Self {
            bandwidth_saved_ratio: ratio(discarded, processed + discarded),
            verification_accuracy: ratio(tp, tp + fp),
            inconclusive_ratio: ratio(inconclusive, tp + fp + inconclusive),
        }
    }
}

fn ratio(numerator: u128, denominator: u128) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64).clamp(0.0, 1.0)
    }
}

/// Point-in-time copy of one session's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub epoch: SessionEpoch,
    pub started_at: DateTime<Utc>,
    /// True once a close has switched new traffic to the next epoch
    pub sealed: bool,
    pub counters: SessionCounters,
    pub alert_types: BTreeMap<String, AlertTypeStats>,
}

/// Full state of a session handed to the closer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub snapshot: SessionSnapshot,
    pub ledger: Vec<VerificationOutcome>,
    pub inconclusive: Vec<InconclusiveRecord>,
}

/// Report content, rendered into the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBody {
    pub report_id: Uuid,
    pub epoch: SessionEpoch,
    pub session_started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub counters: SessionCounters,
    pub metrics: DerivedMetrics,
    pub alert_types: BTreeMap<String, AlertTypeStats>,
    /// Validated-incident ledger (true and false positives, verification order)
    pub ledger: Vec<VerificationOutcome>,
    pub inconclusive: Vec<InconclusiveRecord>,
}

impl ReportBody {
    pub fn from_view(report_id: Uuid, view: SessionView, closed_at: DateTime<Utc>) -> Self {
        let metrics = DerivedMetrics::compute(&view.snapshot.counters);
        Self {
            report_id,
            epoch: view.snapshot.epoch,
            session_started_at: view.snapshot.started_at,
            closed_at,
            counters: view.snapshot.counters,
            metrics,
            alert_types: view.snapshot.alert_types,
            ledger: view.ledger,
            inconclusive: view.inconclusive,
        }
    }

    /// Ledger entries confirmed as violations
    pub fn validated_incidents(&self) -> impl Iterator<Item = &VerificationOutcome> {
        self.ledger
            .iter()
            .filter(|o| o.classification == Classification::TruePositive)
    }
}

/// Immutable result of a successful session close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(flatten)]
    pub body: ReportBody,
    pub artifact: ArtifactRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_zero_denominators() {
        let metrics = DerivedMetrics::compute(&SessionCounters::default());
        assert_eq!(metrics.bandwidth_saved_ratio, 0.0);
        assert_eq!(metrics.verification_accuracy, 0.0);
        assert_eq!(metrics.inconclusive_ratio, 0.0);
    }

    #[test]
    fn test_metrics_example_session() {
        let counters = SessionCounters {
            frames_processed_total: 500,
            frames_discarded_total: 450,
            true_positive_total: 1,
            false_positive_total: 1,
            ..Default::default()
        };

        let metrics = DerivedMetrics::compute(&counters);
        assert!((metrics.bandwidth_saved_ratio - 450.0 / 950.0).abs() < 1e-9);
        assert_eq!(metrics.verification_accuracy, 0.5);
    }

    #[test]
    fn test_inconclusive_excluded_from_accuracy() {
        let counters = SessionCounters {
            true_positive_total: 9,
            inconclusive_total: 1,
            ..Default::default()
        };

        let metrics = DerivedMetrics::compute(&counters);
        assert_eq!(metrics.verification_accuracy, 1.0);
        assert!((metrics.inconclusive_ratio - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_with_saturated_totals() {
        let counters = SessionCounters {
            frames_processed_total: u64::MAX,
            frames_discarded_total: u64::MAX,
            true_positive_total: u64::MAX,
            false_positive_total: 1,
            inconclusive_total: u64::MAX,
            ..Default::default()
        };

        let metrics = DerivedMetrics::compute(&counters);
        assert!((metrics.bandwidth_saved_ratio - 0.5).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&metrics.verification_accuracy));
        assert!((metrics.inconclusive_ratio - 0.5).abs() < 1e-9);
        assert_eq!(counters.resolved_total(), u64::MAX);
    }

    #[test]
    fn test_heartbeat_count_above_storable_range_rejected() {
        let mut sample = HeartbeatSample {
            device_id: "edge-01".to_string(),
            duration_seconds: 60.0,
            frames_processed: MAX_SAMPLE_COUNT,
            frames_discarded: 1,
            local_incidents: 0,
            received_at: Utc::now(),
        };
        assert!(sample.validate().is_ok());

        sample.frames_processed = u64::MAX;
        let err = sample.validate().unwrap_err();
        assert!(err.contains("frames_processed"), "{}", err);

        sample.frames_processed = 1;
        sample.local_incidents = MAX_SAMPLE_COUNT + 1;
        assert!(sample.validate().is_err());
    }

    #[test]
    fn test_heartbeat_validation() {
        let mut sample = HeartbeatSample {
            device_id: "edge-01".to_string(),
            duration_seconds: 60.0,
            frames_processed: 10,
            frames_discarded: 2,
            local_incidents: 0,
            received_at: Utc::now(),
        };
        assert!(sample.validate().is_ok());

        sample.duration_seconds = f64::NAN;
        assert!(sample.validate().is_err());

        sample.duration_seconds = 1.0;
        sample.device_id = "   ".to_string();
        assert!(sample.validate().is_err());
    }
}
