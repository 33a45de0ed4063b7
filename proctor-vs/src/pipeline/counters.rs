//! Session Counter Store
//!
//! Holds one accumulator per live session epoch: the active one receiving new
//! traffic, plus any sealed ones still waiting for their report. Every
//! mutation happens inside a single write section of the lock, so readers
//! never observe a ledger entry without its counter or the other way round.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::db::RecoveredSession;
use crate::models::{
    AlertId, AlertTypeStats, Classification, HeartbeatSample, InconclusiveRecord,
    SessionCounters, SessionEpoch, SessionSnapshot, SessionView, VerificationOutcome,
};

/// Pending limit reached, nothing was reserved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saturated {
    pub pending: u64,
    pub limit: u64,
}

/// Result of sealing a session for close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedSession {
    /// Epoch being closed
    pub epoch: SessionEpoch,
    /// Newly opened epoch, `None` when an earlier seal is being retried
    pub next_epoch: Option<SessionEpoch>,
    pub pending: u64,
}

#[derive(Debug)]
struct SessionAccumulator {
    epoch: SessionEpoch,
    started_at: DateTime<Utc>,
    sealed: bool,
    counters: SessionCounters,
    alert_types: BTreeMap<String, AlertTypeStats>,
    ledger: Vec<VerificationOutcome>,
    inconclusive: Vec<InconclusiveRecord>,
    resolved: HashSet<AlertId>,
}

impl SessionAccumulator {
    fn new(epoch: SessionEpoch, started_at: DateTime<Utc>) -> Self {
        Self {
            epoch,
            started_at,
            sealed: false,
            counters: SessionCounters::default(),
            alert_types: BTreeMap::new(),
            ledger: Vec::new(),
            inconclusive: Vec::new(),
            resolved: HashSet::new(),
        }
    }

    fn add_heartbeat(&mut self, sample: &HeartbeatSample) {
        let c = &mut self.counters;
        c.frames_processed_total = c.frames_processed_total.saturating_add(sample.frames_processed);
        c.frames_discarded_total = c.frames_discarded_total.saturating_add(sample.frames_discarded);
        c.local_incidents_total = c.local_incidents_total.saturating_add(sample.local_incidents);
        c.heartbeats_total += 1;
    }

    /// Returns false when the alert was already accounted for
    fn apply_verification(&mut self, outcome: VerificationOutcome) -> bool {
        if !self.resolved.insert(outcome.alert_id) {
            return false;
        }

        match outcome.classification {
            Classification::TruePositive => self.counters.true_positive_total += 1,
            Classification::FalsePositive => self.counters.false_positive_total += 1,
        }
        self.alert_types
            .entry(outcome.alert_type.clone())
            .or_default()
            .record(outcome.classification);
        self.ledger.push(outcome);
        true
    }

    fn apply_inconclusive(&mut self, record: InconclusiveRecord) -> bool {
        if !self.resolved.insert(record.alert_id) {
            return false;
        }

        self.counters.inconclusive_total += 1;
        self.alert_types
            .entry(record.alert_type.clone())
            .or_default()
            .record_inconclusive();
        self.inconclusive.push(record);
        true
    }

    fn release_pending(&mut self) {
        self.counters.pending_verifications = self.counters.pending_verifications.saturating_sub(1);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            epoch: self.epoch,
            started_at: self.started_at,
            sealed: self.sealed,
            counters: self.counters.clone(),
            alert_types: self.alert_types.clone(),
        }
    }
}

#[derive(Debug)]
struct SessionBook {
    active: SessionEpoch,
    sessions: BTreeMap<SessionEpoch, SessionAccumulator>,
}

impl SessionBook {
    fn active_mut(&mut self) -> &mut SessionAccumulator {
        let active = self.active;
        self.sessions
            .entry(active)
            .or_insert_with(|| SessionAccumulator::new(active, Utc::now()))
    }

    fn total_pending(&self) -> u64 {
        self.sessions
            .values()
            .map(|s| s.counters.pending_verifications)
            .sum()
    }
}

/// Concurrent session counters, ledger and drain signalling
pub struct SessionCounterStore {
    book: RwLock<SessionBook>,
    settled: Notify,
}

impl SessionCounterStore {
    /// Fresh store whose active session is `epoch`
    pub fn new(epoch: SessionEpoch) -> Self {
        let mut sessions = BTreeMap::new();
        sessions.insert(epoch, SessionAccumulator::new(epoch, Utc::now()));

        Self {
            book: RwLock::new(SessionBook {
                active: epoch,
                sessions,
            }),
            settled: Notify::new(),
        }
    }

    /// Seed the active session from journal contents
    ///
    /// Pending alerts are not counted here; they are reserved again when
    /// intake re-dispatches them.
    pub fn from_recovered(recovered: &RecoveredSession) -> Self {
        let mut session = SessionAccumulator::new(recovered.epoch, recovered.started_at);

        for sample in &recovered.heartbeats {
            session.add_heartbeat(sample);
        }
        for outcome in &recovered.outcomes {
            session.apply_verification(outcome.clone());
        }
        for record in &recovered.inconclusive {
            session.apply_inconclusive(record.clone());
        }

        let mut sessions = BTreeMap::new();
        sessions.insert(recovered.epoch, session);

        Self {
            book: RwLock::new(SessionBook {
                active: recovered.epoch,
                sessions,
            }),
            settled: Notify::new(),
        }
    }

    pub async fn active_epoch(&self) -> SessionEpoch {
        self.book.read().await.active
    }

    /// Reserve a pending slot in the active session
    ///
    /// `max_pending == 0` disables the limit. The check and the increment
    /// happen under the same lock.
    pub async fn try_begin(&self, max_pending: u64) -> Result<SessionEpoch, Saturated> {
        let mut book = self.book.write().await;

        if max_pending > 0 {
            let pending = book.total_pending();
            if pending >= max_pending {
                return Err(Saturated {
                    pending,
                    limit: max_pending,
                });
            }
        }

        let session = book.active_mut();
        session.counters.pending_verifications += 1;
        Ok(session.epoch)
    }

    /// Reserve a pending slot in a specific session (recovery)
    pub async fn begin_in(&self, epoch: SessionEpoch) {
        let mut book = self.book.write().await;
        book.sessions
            .entry(epoch)
            .or_insert_with(|| SessionAccumulator::new(epoch, Utc::now()))
            .counters
            .pending_verifications += 1;
    }

    /// Release a reservation whose alert was never dispatched
    pub async fn abandon(&self, epoch: SessionEpoch) {
        {
            let mut book = self.book.write().await;
            match book.sessions.get_mut(&epoch) {
                Some(session) => session.release_pending(),
                None => warn!(epoch, "Abandon for unknown session epoch"),
            }
        }
        self.settled.notify_waiters();
    }

    /// Fold a heartbeat into the active session, returns its epoch
    pub async fn add_heartbeat(&self, sample: &HeartbeatSample) -> SessionEpoch {
        let mut book = self.book.write().await;
        let session = book.active_mut();
        session.add_heartbeat(sample);
        session.epoch
    }

    /// Ledger append, counter increment and pending decrement in one step
    ///
    /// Returns false (and changes nothing) if the alert was already resolved.
    pub async fn apply_verification(&self, outcome: VerificationOutcome) -> bool {
        let applied = {
            let mut book = self.book.write().await;
            let alert_id = outcome.alert_id;
            match book.sessions.get_mut(&outcome.epoch) {
                Some(session) => {
                    let applied = session.apply_verification(outcome);
                    if applied {
                        session.release_pending();
                    }
                    applied
                }
                None => {
                    warn!(%alert_id, epoch = outcome.epoch, "Outcome for closed session dropped");
                    false
                }
            }
        };

        self.settled.notify_waiters();
        applied
    }

    /// Record an inconclusive failure and release its pending slot
    pub async fn apply_inconclusive(&self, record: InconclusiveRecord) -> bool {
        let applied = {
            let mut book = self.book.write().await;
            let alert_id = record.alert_id;
            match book.sessions.get_mut(&record.epoch) {
                Some(session) => {
                    let applied = session.apply_inconclusive(record);
                    if applied {
                        session.release_pending();
                    }
                    applied
                }
                None => {
                    warn!(%alert_id, epoch = record.epoch, "Inconclusive record for closed session dropped");
                    false
                }
            }
        };

        self.settled.notify_waiters();
        applied
    }

    /// Consistent copy of the active session
    pub async fn read_snapshot(&self) -> SessionSnapshot {
        let book = self.book.read().await;
        match book.sessions.get(&book.active) {
            Some(session) => session.snapshot(),
            None => SessionAccumulator::new(book.active, Utc::now()).snapshot(),
        }
    }

    /// Copies of sealed sessions still awaiting their report
    pub async fn sealed_snapshots(&self) -> Vec<SessionSnapshot> {
        let book = self.book.read().await;
        book.sessions
            .values()
            .filter(|s| s.sealed)
            .map(SessionAccumulator::snapshot)
            .collect()
    }

    /// Pending verifications across all live sessions
    pub async fn total_pending(&self) -> u64 {
        self.book.read().await.total_pending()
    }

    /// Pick the session to close
    ///
    /// The oldest sealed session wins if one is still waiting for its report;
    /// otherwise the active session is sealed and the next epoch opened.
    pub async fn seal_for_close(&self) -> SealedSession {
        let mut book = self.book.write().await;

        if let Some(session) = book.sessions.values().find(|s| s.sealed) {
            return SealedSession {
                epoch: session.epoch,
                next_epoch: None,
                pending: session.counters.pending_verifications,
            };
        }

        let sealed_epoch = book.active;
        let next_epoch = sealed_epoch + 1;
        let pending = {
            let session = book.active_mut();
            session.sealed = true;
            session.counters.pending_verifications
        };

        book.sessions
            .insert(next_epoch, SessionAccumulator::new(next_epoch, Utc::now()));
        book.active = next_epoch;

        debug!(epoch = sealed_epoch, next_epoch, pending, "Session sealed");
        SealedSession {
            epoch: sealed_epoch,
            next_epoch: Some(next_epoch),
            pending,
        }
    }

    fn pending_in(book: &SessionBook, epoch: SessionEpoch) -> u64 {
        book.sessions
            .get(&epoch)
            .map(|s| s.counters.pending_verifications)
            .unwrap_or(0)
    }

    /// Wait until `epoch` has no pending verifications
    ///
    /// On timeout returns the number still pending.
    pub async fn wait_until_settled(&self, epoch: SessionEpoch, timeout: Duration) -> Result<(), u64> {
        let wait = async {
            loop {
                let notified = self.settled.notified();
                tokio::pin!(notified);
                // Register before checking so a decrement in between is not missed
                notified.as_mut().enable();

                if Self::pending_in(&*self.book.read().await, epoch) == 0 {
                    return;
                }

                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Self::pending_in(&*self.book.read().await, epoch)),
        }
    }

    /// Final counters, ledger and per-type stats of a session
    pub async fn closing_view(&self, epoch: SessionEpoch) -> Option<SessionView> {
        let book = self.book.read().await;
        book.sessions.get(&epoch).map(|session| SessionView {
            snapshot: session.snapshot(),
            ledger: session.ledger.clone(),
            inconclusive: session.inconclusive.clone(),
        })
    }

    /// Drop a sealed session after its report was produced
    ///
    /// Unknown epochs are ignored. The active session is never dropped.
    pub async fn reset(&self, epoch: SessionEpoch) {
        let mut book = self.book.write().await;

        if epoch == book.active {
            warn!(epoch, "Refusing to reset the active session");
            return;
        }
        if book.sessions.remove(&epoch).is_some() {
            debug!(epoch, "Session state reset");
        }
    }
}
