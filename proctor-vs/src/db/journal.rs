//! Session journal
//!
//! Append-only record of everything that feeds a session's counters.
//! Rows are tagged with their session epoch; a successful close indexes the
//! report and deletes the epoch's rows in one transaction.

use chrono::{DateTime, Utc};
use proctor_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::collab::{ArtifactRef, ImageRef, StoredRef};
use crate::models::{
    Alert, Classification, HeartbeatSample, InconclusiveRecord, Report, SessionEpoch,
    VerificationOutcome,
};
use crate::utils::retry_on_lock;

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;
const VERDICT_INCONCLUSIVE: &str = "INCONCLUSIVE";

/// Index entry of a produced report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub report_id: Uuid,
    pub epoch: SessionEpoch,
    pub artifact: ArtifactRef,
    pub created_at: DateTime<Utc>,
    pub true_positive_total: u64,
    pub false_positive_total: u64,
    pub inconclusive_total: u64,
}

/// Journal contents that were never covered by a report
///
/// Everything is relabelled to a single epoch, so a crash between seal and
/// report folds the sealed and the active session together.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredSession {
    pub epoch: SessionEpoch,
    pub started_at: DateTime<Utc>,
    pub heartbeats: Vec<HeartbeatSample>,
    pub outcomes: Vec<VerificationOutcome>,
    pub inconclusive: Vec<InconclusiveRecord>,
    /// Accepted alerts that never reached a verdict
    pub pending_alerts: Vec<Alert>,
}

/// SQLite-backed journal
#[derive(Clone)]
pub struct SessionJournal {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SessionJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_max_lock_wait(mut self, max_lock_wait_ms: u64) -> Self {
        self.max_lock_wait_ms = max_lock_wait_ms;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Journal an accepted alert as pending
    pub async fn record_alert(&self, alert: &Alert) -> Result<()> {
        let alert_id = alert.id.to_string();
        let epoch = to_db_int(alert.epoch);
        let metadata = serde_json::to_string(&Value::Object(alert.metadata.clone()))
            .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;
        let submitted_at = alert.submitted_at.to_rfc3339();
        let pool = &self.pool;

        retry_on_lock("record_alert", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO alerts (
                    alert_id, epoch, alert_type, image_ref, metadata, submitted_at, status
                ) VALUES (?, ?, ?, ?, ?, ?, 'PENDING')
                "#,
            )
            .bind(&alert_id)
            .bind(epoch)
            .bind(&alert.alert_type)
            .bind(alert.image_ref.as_str())
            .bind(&metadata)
            .bind(&submitted_at)
            .execute(pool)
            .await?;

            Ok(())
        })
        .await
    }

    /// Append a heartbeat sample to an epoch
    pub async fn record_heartbeat(
        &self,
        epoch: SessionEpoch,
        sample: &HeartbeatSample,
    ) -> Result<()> {
        let epoch = to_db_int(epoch);
        let frames_processed = sample_count("frames_processed", sample.frames_processed)?;
        let frames_discarded = sample_count("frames_discarded", sample.frames_discarded)?;
        let local_incidents = sample_count("local_incidents", sample.local_incidents)?;
        let timestamp = sample.received_at.to_rfc3339();
        let pool = &self.pool;

        retry_on_lock("record_heartbeat", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO heartbeat_stats (
                    epoch, device_id, timestamp, duration_seconds,
                    frames_processed, frames_discarded, local_incidents
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(epoch)
            .bind(&sample.device_id)
            .bind(&timestamp)
            .bind(sample.duration_seconds)
            .bind(frames_processed)
            .bind(frames_discarded)
            .bind(local_incidents)
            .execute(pool)
            .await?;

            Ok(())
        })
        .await
    }

    /// Append a completed verification and mark its alert resolved
    ///
    /// True positives also land in `validated_incidents`. Writing the same
    /// alert twice is a no-op.
    pub async fn record_outcome(&self, outcome: &VerificationOutcome) -> Result<()> {
        let alert_id = outcome.alert_id.to_string();
        let epoch = to_db_int(outcome.epoch);
        let verdict = outcome.classification.as_str();
        let face_count = i64::from(outcome.face_count);
        let evidence_ref = outcome.evidence_ref.as_ref().map(|r| r.as_str().to_string());
        let recorded_at = outcome.verified_at.to_rfc3339();
        let is_incident = outcome.classification == Classification::TruePositive;
        let pool = &self.pool;

        retry_on_lock("record_outcome", self.max_lock_wait_ms, || async {
            let mut tx = pool.begin().await?;

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO verification_outcomes (
                    alert_id, epoch, alert_type, verdict, face_count, evidence_ref, reason, recorded_at
                ) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
                "#,
            )
            .bind(&alert_id)
            .bind(epoch)
            .bind(&outcome.alert_type)
            .bind(verdict)
            .bind(face_count)
            .bind(&evidence_ref)
            .bind(&recorded_at)
            .execute(&mut *tx)
            .await?;

            if is_incident {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO validated_incidents (
                        alert_id, epoch, image_name, alert_type, face_count_dnn, validation_time
                    ) VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&alert_id)
                .bind(epoch)
                .bind(&evidence_ref)
                .bind(&outcome.alert_type)
                .bind(face_count)
                .bind(&recorded_at)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("UPDATE alerts SET status = 'RESOLVED' WHERE alert_id = ?")
                .bind(&alert_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Append an inconclusive verification and mark its alert resolved
    pub async fn record_inconclusive(&self, record: &InconclusiveRecord) -> Result<()> {
        let alert_id = record.alert_id.to_string();
        let epoch = to_db_int(record.epoch);
        let recorded_at = record.failed_at.to_rfc3339();
        let pool = &self.pool;

        retry_on_lock("record_inconclusive", self.max_lock_wait_ms, || async {
            let mut tx = pool.begin().await?;

            sqlx::query(
                r#"
                INSERT OR IGNORE INTO verification_outcomes (
                    alert_id, epoch, alert_type, verdict, face_count, evidence_ref, reason, recorded_at
                ) VALUES (?, ?, ?, ?, NULL, NULL, ?, ?)
                "#,
            )
            .bind(&alert_id)
            .bind(epoch)
            .bind(&record.alert_type)
            .bind(VERDICT_INCONCLUSIVE)
            .bind(&record.reason)
            .bind(&recorded_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE alerts SET status = 'RESOLVED' WHERE alert_id = ?")
                .bind(&alert_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Index a produced report and clear its epoch's working rows
    pub async fn finalize_session(&self, report: &Report) -> Result<()> {
        let report_id = report.body.report_id.to_string();
        let epoch = to_db_int(report.body.epoch);
        let artifact = report.artifact.as_str().to_string();
        let created_at = report.body.closed_at.to_rfc3339();
        let counters = &report.body.counters;
        let pool = &self.pool;

        retry_on_lock("finalize_session", self.max_lock_wait_ms, || async {
            let mut tx = pool.begin().await?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO reports (
                    report_id, epoch, artifact_ref, created_at,
                    true_positive_total, false_positive_total, inconclusive_total
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&report_id)
            .bind(epoch)
            .bind(&artifact)
            .bind(&created_at)
            .bind(to_db_int(counters.true_positive_total))
            .bind(to_db_int(counters.false_positive_total))
            .bind(to_db_int(counters.inconclusive_total))
            .execute(&mut *tx)
            .await?;

            for table in [
                "alerts",
                "verification_outcomes",
                "validated_incidents",
                "heartbeat_stats",
            ] {
                sqlx::query(&format!("DELETE FROM {} WHERE epoch = ?", table))
                    .bind(epoch)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Look up a report by id
    pub async fn load_report(&self, report_id: Uuid) -> Result<Option<ReportRecord>> {
        let row = sqlx::query(
            r#"
            SELECT report_id, epoch, artifact_ref, created_at,
                   true_positive_total, false_positive_total, inconclusive_total
            FROM reports
            WHERE report_id = ?
            "#,
        )
        .bind(report_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| report_from_row(&row)).transpose()
    }

    /// Most recent epoch that has a report, if any
    pub async fn last_reported_epoch(&self) -> Result<Option<SessionEpoch>> {
        let epoch: Option<i64> = sqlx::query_scalar("SELECT MAX(epoch) FROM reports")
            .fetch_one(&self.pool)
            .await?;
        Ok(epoch.map(from_db_int))
    }

    /// Fold every unreported row into one epoch and load it back
    ///
    /// The recovered epoch is never lower than the last reported epoch + 1,
    /// so report artifacts of earlier sessions are never overwritten.
    pub async fn recover(&self) -> Result<RecoveredSession> {
        let last_reported = self.last_reported_epoch().await?.unwrap_or(0);
        let max_working: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(epoch) FROM (
                SELECT epoch FROM alerts
                UNION ALL SELECT epoch FROM verification_outcomes
                UNION ALL SELECT epoch FROM heartbeat_stats
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let epoch = max_working
            .map(from_db_int)
            .unwrap_or(0)
            .max(last_reported + 1)
            .max(1);
        let db_epoch = to_db_int(epoch);

        let mut tx = self.pool.begin().await?;
        for table in [
            "alerts",
            "verification_outcomes",
            "validated_incidents",
            "heartbeat_stats",
        ] {
            sqlx::query(&format!("UPDATE {} SET epoch = ? WHERE epoch <> ?", table))
                .bind(db_epoch)
                .bind(db_epoch)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let heartbeats = sqlx::query(
            r#"
            SELECT device_id, timestamp, duration_seconds,
                   frames_processed, frames_discarded, local_incidents
            FROM heartbeat_stats
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(heartbeat_from_row)
        .collect::<Result<Vec<_>>>()?;

        let mut outcomes = Vec::new();
        let mut inconclusive = Vec::new();
        let outcome_rows = sqlx::query(
            r#"
            SELECT alert_id, epoch, alert_type, verdict, face_count, evidence_ref, reason, recorded_at
            FROM verification_outcomes
            ORDER BY recorded_at, rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &outcome_rows {
            let verdict: String = row.get("verdict");
            if verdict == VERDICT_INCONCLUSIVE {
                inconclusive.push(InconclusiveRecord {
                    alert_id: parse_uuid(row.get("alert_id"))?,
                    epoch: from_db_int(row.get("epoch")),
                    alert_type: row.get("alert_type"),
                    reason: row
                        .get::<Option<String>, _>("reason")
                        .unwrap_or_default(),
                    failed_at: parse_timestamp("recorded_at", row.get("recorded_at"))?,
                });
            } else {
                let classification = match verdict.as_str() {
                    "TRUE_POSITIVE" => Classification::TruePositive,
                    "FALSE_POSITIVE" => Classification::FalsePositive,
                    other => {
                        return Err(Error::Internal(format!("Unknown verdict in journal: {}", other)))
                    }
                };
                outcomes.push(VerificationOutcome {
                    alert_id: parse_uuid(row.get("alert_id"))?,
                    epoch: from_db_int(row.get("epoch")),
                    alert_type: row.get("alert_type"),
                    face_count: row.get::<Option<i64>, _>("face_count").unwrap_or(0) as u32,
                    classification,
                    evidence_ref: row
                        .get::<Option<String>, _>("evidence_ref")
                        .map(StoredRef::new),
                    verified_at: parse_timestamp("recorded_at", row.get("recorded_at"))?,
                });
            }
        }

        let pending_alerts = sqlx::query(
            r#"
            SELECT alert_id, epoch, alert_type, image_ref, metadata, submitted_at
            FROM alerts
            WHERE status = 'PENDING'
            ORDER BY submitted_at, rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(alert_from_row)
        .collect::<Result<Vec<_>>>()?;

        let earliest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MIN(ts) FROM (
                SELECT submitted_at AS ts FROM alerts
                UNION ALL SELECT recorded_at FROM verification_outcomes
                UNION ALL SELECT timestamp FROM heartbeat_stats
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let started_at = match earliest {
            Some(ts) => parse_timestamp("started_at", ts)?,
            None => Utc::now(),
        };

        Ok(RecoveredSession {
            epoch,
            started_at,
            heartbeats,
            outcomes,
            inconclusive,
            pending_alerts,
        })
    }
}

/// Heartbeat counts are stored exactly or not at all, so recovered totals
/// match the in-memory ones
fn sample_count(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        Error::InvalidInput(format!("{} = {} does not fit the journal", field, value))
    })
}

fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn parse_uuid(value: String) -> Result<Uuid> {
    Uuid::parse_str(&value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in journal '{}': {}", value, e)))
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

fn heartbeat_from_row(row: &SqliteRow) -> Result<HeartbeatSample> {
    Ok(HeartbeatSample {
        device_id: row.get("device_id"),
        duration_seconds: row.get("duration_seconds"),
        frames_processed: from_db_int(row.get("frames_processed")),
        frames_discarded: from_db_int(row.get("frames_discarded")),
        local_incidents: from_db_int(row.get("local_incidents")),
        received_at: parse_timestamp("timestamp", row.get("timestamp"))?,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert> {
    let metadata: String = row.get("metadata");
    let metadata = match serde_json::from_str::<Value>(&metadata) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(Error::Internal(format!(
                "Failed to deserialize metadata: {}",
                e
            )))
        }
    };

    Ok(Alert {
        id: parse_uuid(row.get("alert_id"))?,
        epoch: from_db_int(row.get("epoch")),
        alert_type: row.get("alert_type"),
        image_ref: ImageRef::new(row.get::<String, _>("image_ref")),
        metadata,
        submitted_at: parse_timestamp("submitted_at", row.get("submitted_at"))?,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<ReportRecord> {
    Ok(ReportRecord {
        report_id: parse_uuid(row.get("report_id"))?,
        epoch: from_db_int(row.get("epoch")),
        artifact: ArtifactRef::new(row.get::<String, _>("artifact_ref")),
        created_at: parse_timestamp("created_at", row.get("created_at"))?,
        true_positive_total: from_db_int(row.get("true_positive_total")),
        false_positive_total: from_db_int(row.get("false_positive_total")),
        inconclusive_total: from_db_int(row.get("inconclusive_total")),
    })
}
