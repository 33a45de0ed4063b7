//! Verification pool
//!
//! Each accepted alert gets its own tokio task. A semaphore bounds how many
//! run the detector at once; the tracker lets shutdown wait for all of them.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::models::Alert;

use super::verifier::Verifier;

pub struct VerificationPool {
    verifier: Arc<Verifier>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl VerificationPool {
    pub fn new(verifier: Arc<Verifier>, max_concurrent: usize) -> Self {
        Self {
            verifier,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Schedule verification of an alert and return immediately
    ///
    /// The verification body runs in its own task so a panic is observed as
    /// a `JoinError` and still produces an inconclusive record.
    pub fn dispatch(&self, alert: Alert) {
        let verifier = self.verifier.clone();
        let permits = self.permits.clone();

        self.tracker.spawn(async move {
            // The semaphore is never closed; a failed acquire just runs unthrottled
            let _permit = permits.acquire_owned().await.ok();

            let task_alert = alert.clone();
            let task_verifier = verifier.clone();
            let handle = tokio::spawn(async move {
                task_verifier.process(&task_alert).await;
            });

            match handle.await {
                Ok(()) => debug!(alert_id = %alert.id, "Verification task finished"),
                Err(e) => {
                    error!(alert_id = %alert.id, error = %e, "Verification task failed");
                    verifier
                        .fail_inconclusive(&alert, format!("Verification task failed: {}", e))
                        .await;
                }
            }
        });
    }

    /// Verification tasks not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for running verifications
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
