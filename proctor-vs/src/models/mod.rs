//! Data model for the verification pipeline

pub mod alert;
pub mod outcome;
pub mod session;

pub use alert::{sanitize_alert_type, Alert, AlertId, SessionEpoch};
pub use outcome::{
    classify, BoundingBox, Classification, Detection, InconclusiveRecord, VerificationOutcome,
    VerificationResult,
};
pub use session::{
    AlertTypeStats, DerivedMetrics, HeartbeatSample, Report, ReportBody, SessionCounters,
    SessionSnapshot, SessionView, MAX_SAMPLE_COUNT,
};
