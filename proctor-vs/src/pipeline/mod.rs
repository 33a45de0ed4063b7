//! Alert verification and session analytics pipeline
//!
//! ```text
//! alert     -> AlertIntake -> VerificationPool -> Verifier -> SessionCounterStore
//! heartbeat -----------------------------------------------> SessionCounterStore
//! close     -> SessionCloser -> ReportRenderer -> SessionJournal -> reset
//! ```
//!
//! Verification results are journaled before they are applied in memory.
//! Intake reserves the pending slot in memory first and releases it again if
//! journaling the alert fails.

pub mod closer;
pub mod counters;
pub mod intake;
pub mod pool;
pub mod verifier;

pub use closer::{CloseError, SessionCloser};
pub use counters::{Saturated, SealedSession, SessionCounterStore};
pub use intake::{AlertIntake, AlertSubmission, IntakeError};
pub use pool::VerificationPool;
pub use verifier::{Verifier, VerifierSettings};

use chrono::Utc;
use proctor_common::events::{EventBus, ProctorEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collab::{FaceDetector, ImageStore, RenderError, ReportRenderer};
use crate::db::SessionJournal;
use crate::models::{Alert, HeartbeatSample, Report, SessionEpoch, SessionSnapshot};

/// Heartbeat rejection; counters are unchanged
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("Invalid heartbeat: {0}")]
    InvalidInput(String),

    #[error("Dependency unavailable: {0}")]
    TransientDependencyFailure(String),
}

/// Collaborators the pipeline runs against
pub struct PipelineParts {
    pub detector: Arc<dyn FaceDetector>,
    pub store: Arc<dyn ImageStore>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub journal: SessionJournal,
    pub events: EventBus,
}

/// Pipeline tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub verifier: VerifierSettings,
    pub drain_timeout: Duration,
    /// Global pending limit, 0 = unbounded
    pub max_pending: u64,
    pub max_concurrent_verifications: usize,
}

impl PipelineSettings {
    /// The drain has to outlast one verification that exhausts its detector
    /// budget, otherwise a single hung call fails the close
    pub fn validate(&self) -> Result<(), String> {
        let budget = self.verifier.detection_budget();
        if self.drain_timeout <= budget {
            return Err(format!(
                "drain timeout {:?} must exceed the detector budget {:?} ({} attempts of {:?} plus backoff)",
                self.drain_timeout,
                budget,
                self.verifier.max_attempts,
                self.verifier.detector_timeout
            ));
        }
        Ok(())
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            verifier: VerifierSettings::default(),
            drain_timeout: Duration::from_secs(30),
            max_pending: 256,
            max_concurrent_verifications: 4,
        }
    }
}

pub struct Pipeline {
    counters: Arc<SessionCounterStore>,
    intake: AlertIntake,
    closer: SessionCloser,
    pool: Arc<VerificationPool>,
    journal: SessionJournal,
    renderer: Arc<dyn ReportRenderer>,
    events: EventBus,
    ingest_gate: Arc<RwLock<()>>,
}

impl Pipeline {
    /// Recover journaled state and start accepting work
    pub async fn start(
        parts: PipelineParts,
        settings: PipelineSettings,
    ) -> proctor_common::Result<Self> {
        let recovered = parts.journal.recover().await?;
        let counters = Arc::new(SessionCounterStore::from_recovered(&recovered));
        let ingest_gate = Arc::new(RwLock::new(()));

        let verifier = Arc::new(Verifier::new(
            parts.detector.clone(),
            parts.store.clone(),
            parts.journal.clone(),
            counters.clone(),
            parts.events.clone(),
            settings.verifier,
        ));
        let pool = Arc::new(VerificationPool::new(
            verifier,
            settings.max_concurrent_verifications,
        ));

        let intake = AlertIntake::new(
            counters.clone(),
            parts.store.clone(),
            parts.journal.clone(),
            pool.clone(),
            parts.events.clone(),
            settings.max_pending,
        );
        let closer = SessionCloser::new(
            counters.clone(),
            parts.renderer.clone(),
            parts.journal.clone(),
            parts.events.clone(),
            ingest_gate.clone(),
            settings.drain_timeout,
        );

        info!(
            epoch = recovered.epoch,
            detector = parts.detector.name(),
            heartbeats = recovered.heartbeats.len(),
            outcomes = recovered.outcomes.len() + recovered.inconclusive.len(),
            pending = recovered.pending_alerts.len(),
            "Verification pipeline started"
        );
        intake.resume(recovered.pending_alerts).await;

        Ok(Self {
            counters,
            intake,
            closer,
            pool,
            journal: parts.journal,
            renderer: parts.renderer,
            events: parts.events,
            ingest_gate,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Accept an alert; verification continues in the background
    pub async fn submit(&self, submission: AlertSubmission) -> Result<Alert, IntakeError> {
        self.intake.submit(submission).await
    }

    /// Fold an edge heartbeat into the active session
    pub async fn record_heartbeat(
        &self,
        sample: HeartbeatSample,
    ) -> Result<SessionEpoch, HeartbeatError> {
        sample.validate().map_err(HeartbeatError::InvalidInput)?;

        let epoch = {
            let _gate = self.ingest_gate.read().await;
            let epoch = self.counters.active_epoch().await;

            if let Err(e) = self.journal.record_heartbeat(epoch, &sample).await {
                warn!(device_id = %sample.device_id, error = %e, "Failed to journal heartbeat");
                return Err(HeartbeatError::TransientDependencyFailure(e.to_string()));
            }
            self.counters.add_heartbeat(&sample).await
        };

        debug!(
            device_id = %sample.device_id,
            epoch,
            frames_processed = sample.frames_processed,
            frames_discarded = sample.frames_discarded,
            "Heartbeat recorded"
        );

        self.events.emit_lossy(ProctorEvent::HeartbeatReceived {
            device_id: sample.device_id,
            frames_processed: sample.frames_processed,
            frames_discarded: sample.frames_discarded,
            epoch,
            timestamp: Utc::now(),
        });

        Ok(epoch)
    }

    /// Counters of the active session
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.counters.read_snapshot().await
    }

    /// Sealed sessions whose report is still outstanding
    pub async fn sealed_sessions(&self) -> Vec<SessionSnapshot> {
        self.counters.sealed_snapshots().await
    }

    pub async fn close_session(&self) -> Result<Report, CloseError> {
        self.closer.close_session().await
    }

    /// Rendered artifact of an earlier report, `None` if the id is unknown
    pub async fn load_report(
        &self,
        report_id: Uuid,
    ) -> proctor_common::Result<Option<serde_json::Value>> {
        let record = match self.journal.load_report(report_id).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        match self.renderer.fetch(&record.artifact).await {
            Ok(document) => Ok(Some(document)),
            Err(RenderError::NotFound(name)) => Err(proctor_common::Error::NotFound(format!(
                "artifact {} of report {}",
                name, report_id
            ))),
            Err(e) => Err(proctor_common::Error::Internal(e.to_string())),
        }
    }

    /// Verification tasks still running
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Wait for running verifications to finish
    pub async fn shutdown(&self) {
        info!(in_flight = self.pool.in_flight(), "Waiting for verifications to finish");
        self.pool.shutdown().await;
    }
}
