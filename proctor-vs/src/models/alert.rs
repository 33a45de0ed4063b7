//! Alerts forwarded by edge devices

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::collab::ImageRef;

/// Alert identity assigned at intake
pub type AlertId = Uuid;

/// Session accounting epoch (monotonically increasing)
pub type SessionEpoch = u64;

/// Candidate violation accepted for verification
///
/// Immutable once created. `epoch` is the session that was active when the
/// alert was submitted; its outcome is always accounted to that session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub epoch: SessionEpoch,
    pub alert_type: String,
    pub image_ref: ImageRef,
    pub metadata: Map<String, Value>,
    pub submitted_at: DateTime<Utc>,
}

/// Reduce an edge-supplied alert type to `[A-Za-z0-9_]`
///
/// The result is used in file names, so anything else is dropped.
pub fn sanitize_alert_type(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
