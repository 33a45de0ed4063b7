//! Session Closer
//!
//! seal -> drain -> view -> metrics -> render -> index -> reset
//!
//! Nothing is reset unless the report was rendered and indexed, so every
//! failure leaves the session intact and a later close retries it.

use chrono::Utc;
use proctor_common::events::{EventBus, ProctorEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};
use uuid::Uuid;

use crate::collab::ReportRenderer;
use crate::db::SessionJournal;
use crate::models::{Report, ReportBody, SessionEpoch};

use super::counters::SessionCounterStore;

/// Close failure; the session is retained
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("Session {epoch} still has {pending} pending verifications after {timeout:?}")]
    DrainTimeout {
        epoch: SessionEpoch,
        pending: u64,
        timeout: Duration,
    },

    #[error("Report rendering failed for session {epoch}: {reason}")]
    RenderFailure { epoch: SessionEpoch, reason: String },

    #[error("Report indexing failed for session {epoch}: {reason}")]
    Persistence { epoch: SessionEpoch, reason: String },

    #[error("Session {0} is not known")]
    UnknownSession(SessionEpoch),
}

impl CloseError {
    pub fn epoch(&self) -> SessionEpoch {
        match self {
            CloseError::DrainTimeout { epoch, .. }
            | CloseError::RenderFailure { epoch, .. }
            | CloseError::Persistence { epoch, .. }
            | CloseError::UnknownSession(epoch) => *epoch,
        }
    }
}

pub struct SessionCloser {
    counters: Arc<SessionCounterStore>,
    renderer: Arc<dyn ReportRenderer>,
    journal: SessionJournal,
    events: EventBus,
    ingest_gate: Arc<RwLock<()>>,
    close_lock: Mutex<()>,
    drain_timeout: Duration,
}

impl SessionCloser {
    pub fn new(
        counters: Arc<SessionCounterStore>,
        renderer: Arc<dyn ReportRenderer>,
        journal: SessionJournal,
        events: EventBus,
        ingest_gate: Arc<RwLock<()>>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            counters,
            renderer,
            journal,
            events,
            ingest_gate,
            close_lock: Mutex::new(()),
            drain_timeout,
        }
    }

    /// Close the current session into a report
    pub async fn close_session(&self) -> Result<Report, CloseError> {
        let _serial = self.close_lock.lock().await;

        let sealed = {
            // No heartbeat may be half-written across the epoch switch
            let _gate = self.ingest_gate.write().await;
            self.counters.seal_for_close().await
        };
        let epoch = sealed.epoch;

        match sealed.next_epoch {
            Some(next_epoch) => {
                info!(epoch, next_epoch, pending = sealed.pending, "Session sealed for close");
                self.events.emit_lossy(ProctorEvent::SessionSealed {
                    epoch,
                    next_epoch,
                    pending_verifications: sealed.pending,
                    timestamp: Utc::now(),
                });
            }
            None => info!(epoch, pending = sealed.pending, "Retrying close of sealed session"),
        }

        if let Err(pending) = self
            .counters
            .wait_until_settled(epoch, self.drain_timeout)
            .await
        {
            return Err(self.failed(CloseError::DrainTimeout {
                epoch,
                pending,
                timeout: self.drain_timeout,
            }));
        }

        let view = match self.counters.closing_view(epoch).await {
            Some(view) => view,
            None => return Err(self.failed(CloseError::UnknownSession(epoch))),
        };

        let body = ReportBody::from_view(Uuid::new_v4(), view, Utc::now());

        let artifact = match self.renderer.render(&body).await {
            Ok(artifact) => artifact,
            Err(e) => {
                return Err(self.failed(CloseError::RenderFailure {
                    epoch,
                    reason: e.to_string(),
                }))
            }
        };

        let report = Report { body, artifact };

        if let Err(e) = self.journal.finalize_session(&report).await {
            return Err(self.failed(CloseError::Persistence {
                epoch,
                reason: e.to_string(),
            }));
        }

        self.counters.reset(epoch).await;

        let counters = &report.body.counters;
        info!(
            epoch,
            report_id = %report.body.report_id,
            artifact = %report.artifact,
            true_positives = counters.true_positive_total,
            false_positives = counters.false_positive_total,
            inconclusive = counters.inconclusive_total,
            "Session closed"
        );

        self.events.emit_lossy(ProctorEvent::SessionClosed {
            epoch,
            report_id: report.body.report_id,
            true_positive_total: counters.true_positive_total,
            false_positive_total: counters.false_positive_total,
            inconclusive_total: counters.inconclusive_total,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    fn failed(&self, err: CloseError) -> CloseError {
        error!(epoch = err.epoch(), error = %err, "Session close failed");
        self.events.emit_lossy(ProctorEvent::SessionCloseFailed {
            epoch: err.epoch(),
            reason: err.to_string(),
            timestamp: Utc::now(),
        });
        err
    }
}
