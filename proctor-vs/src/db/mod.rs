//! Database access for proctor-vs
//!
//! SQLite journal of accepted alerts, verification outcomes, heartbeats and
//! the report index. The in-memory counter store is authoritative while the
//! service runs; the journal exists for audit and crash recovery.

pub mod journal;

pub use journal::{RecoveredSession, ReportRecord, SessionJournal};

use proctor_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Open (or create) the service database and ensure its tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    // Verifications append concurrently with heartbeat writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create journal tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            alert_id TEXT PRIMARY KEY,
            epoch INTEGER NOT NULL,
            alert_type TEXT NOT NULL,
            image_ref TEXT NOT NULL,
            metadata TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verification_outcomes (
            alert_id TEXT PRIMARY KEY,
            epoch INTEGER NOT NULL,
            alert_type TEXT NOT NULL,
            verdict TEXT NOT NULL,
            face_count INTEGER,
            evidence_ref TEXT,
            reason TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS validated_incidents (
            alert_id TEXT PRIMARY KEY,
            epoch INTEGER NOT NULL,
            image_name TEXT,
            alert_type TEXT NOT NULL,
            face_count_dnn INTEGER NOT NULL,
            validation_time TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS heartbeat_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            epoch INTEGER NOT NULL,
            device_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            duration_seconds REAL NOT NULL,
            frames_processed INTEGER NOT NULL,
            frames_discarded INTEGER NOT NULL,
            local_incidents INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            report_id TEXT PRIMARY KEY,
            epoch INTEGER NOT NULL UNIQUE,
            artifact_ref TEXT NOT NULL,
            created_at TEXT NOT NULL,
            true_positive_total INTEGER NOT NULL,
            false_positive_total INTEGER NOT NULL,
            inconclusive_total INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_epoch ON alerts(epoch)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outcomes_epoch ON verification_outcomes(epoch)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_heartbeats_epoch ON heartbeat_stats(epoch)")
        .execute(pool)
        .await?;

    Ok(())
}
