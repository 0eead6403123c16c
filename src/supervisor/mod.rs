//! Supervisor loop
//!
//! Owns one unit's baseline fingerprint. Every interval it fingerprints the
//! unit again; on drift it either restores the unit from its snapshot
//! artifact or, without one, adopts the drifted digest and warns.

pub mod events;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{Result, WardenError};
use crate::fingerprint::{Digest, FingerprintEngine};
use crate::recovery::{RecoveryOrchestrator, RecoveryStep, SnapshotArtifact};

pub use events::{EventKind, EventSink, IntegrityEvent};

/// Default seconds between integrity checks
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Baselining,
    Steady,
    Drifted,
    Recovering,
    /// Terminal: no baseline could be established
    Unmonitorable,
    Stopped,
}

/// Why a loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    Unmonitorable(String),
    /// The task ended abnormally (panic or abort)
    Aborted(String),
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::Stopped => write!(f, "stopped"),
            LoopExit::Unmonitorable(reason) => write!(f, "unmonitorable: {}", reason),
            LoopExit::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Integrity supervision of a single unit
pub struct SupervisorLoop {
    unit: String,
    snapshot: Option<SnapshotArtifact>,
    interval: Duration,
    engine: FingerprintEngine,
    orchestrator: Arc<RecoveryOrchestrator>,
    events: EventSink,
    baseline: Option<Digest>,
    state: LoopState,
    /// Set after a failed recovery; cleared once one succeeds or the unit
    /// matches its baseline again
    recovery_pending: bool,
    stop: Option<watch::Receiver<bool>>,
}

impl SupervisorLoop {
    pub fn new(
        unit: &str,
        snapshot: Option<SnapshotArtifact>,
        interval: Duration,
        engine: FingerprintEngine,
        orchestrator: Arc<RecoveryOrchestrator>,
        events: EventSink,
    ) -> Self {
        Self {
            unit: unit.to_string(),
            snapshot,
            interval,
            engine,
            orchestrator,
            events,
            baseline: None,
            state: LoopState::Baselining,
            recovery_pending: false,
            stop: None,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn baseline(&self) -> Option<&Digest> {
        self.baseline.as_ref()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Detection-only loops have no snapshot to restore from
    pub fn is_detection_only(&self) -> bool {
        self.snapshot.is_none()
    }

    pub fn is_recovery_pending(&self) -> bool {
        self.recovery_pending
    }

    /// Watch `stop` inside ticks as well as between them
    pub fn set_stop(&mut self, stop: watch::Receiver<bool>) {
        self.stop = Some(stop);
    }

    /// A dropped sender counts as a stop
    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| *stop.borrow() || stop.has_changed().is_err())
    }

    fn emit(&self, event: IntegrityEvent) {
        self.events.emit(event);
    }

    /// Capture the initial fingerprint. Failure is terminal for this loop.
    pub async fn establish_baseline(&mut self) -> Result<()> {
        self.state = LoopState::Baselining;
        match self.engine.fingerprint(&self.unit).await {
            Ok(fingerprint) => {
                info!(unit = %self.unit, digest = %fingerprint.digest.short(), "baseline established");
                self.baseline = Some(fingerprint.digest);
                self.state = LoopState::Steady;
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                error!(unit = %self.unit, error = %reason, "cannot establish baseline; unit excluded");
                self.state = LoopState::Unmonitorable;
                self.emit(
                    IntegrityEvent::new(&self.unit, EventKind::Unmonitorable)
                        .with_detail(format!("Unmonitorable: {}", reason)),
                );
                Err(WardenError::Unmonitorable {
                    unit: self.unit.clone(),
                    reason,
                })
            }
        }
    }

    /// One integrity check against the baseline. Returns the kind of the
    /// last event emitted.
    pub async fn tick(&mut self) -> EventKind {
        let Some(baseline) = self.baseline else {
            return match self.establish_baseline().await {
                Ok(()) => EventKind::NoDrift,
                Err(_) => EventKind::Unmonitorable,
            };
        };

        let current = match self.engine.fingerprint(&self.unit).await {
            Ok(fingerprint) => fingerprint.digest,
            Err(e) => {
                warn!(unit = %self.unit, error = %e, "fingerprint unavailable; keeping baseline");
                self.emit(
                    IntegrityEvent::new(&self.unit, EventKind::Unreadable)
                        .with_detail(format!("Unreadable: {}", e)),
                );
                // a failed recovery may have torn the unit down already
                let retry = self.snapshot.clone().filter(|_| self.recovery_pending);
                return match retry {
                    Some(snapshot) if !self.stop_requested() => {
                        info!(unit = %self.unit, "retrying unfinished recovery");
                        self.remediate(&snapshot).await
                    }
                    _ => EventKind::Unreadable,
                };
            }
        };

        if current == baseline {
            self.recovery_pending = false;
            info!(unit = %self.unit, "integrity check passed; no drift");
            self.emit(IntegrityEvent::new(&self.unit, EventKind::NoDrift).with_digest(current));
            return EventKind::NoDrift;
        }

        self.state = LoopState::Drifted;
        warn!(
            unit = %self.unit,
            baseline = %baseline.short(),
            observed = %current.short(),
            "integrity violation detected"
        );
        self.emit(
            IntegrityEvent::new(&self.unit, EventKind::Drifted)
                .with_digest(current)
                .with_detail(format!("baseline {} observed {}", baseline.short(), current.short())),
        );

        let Some(snapshot) = self.snapshot.clone() else {
            warn!(unit = %self.unit, "no snapshot configured; adopting drifted digest (detection only)");
            self.baseline = Some(current);
            self.state = LoopState::Steady;
            return EventKind::Drifted;
        };

        if self.stop_requested() {
            info!(unit = %self.unit, "stop requested; leaving drifted unit in place");
            self.state = LoopState::Steady;
            return EventKind::Drifted;
        }

        self.remediate(&snapshot).await
    }

    /// Recover from `snapshot` and adopt the replacement's digest
    async fn remediate(&mut self, snapshot: &SnapshotArtifact) -> EventKind {
        self.state = LoopState::Recovering;
        let kind = match self.recover(snapshot).await {
            Ok(digest) => {
                info!(unit = %self.unit, digest = %digest.short(), "unit restored; new baseline adopted");
                self.baseline = Some(digest);
                self.recovery_pending = false;
                self.emit(IntegrityEvent::new(&self.unit, EventKind::RecoveryOk).with_digest(digest));
                EventKind::RecoveryOk
            }
            Err(e) => {
                error!(unit = %self.unit, error = %e, "recovery failed; keeping previous baseline");
                self.recovery_pending = true;
                self.emit(
                    IntegrityEvent::new(&self.unit, EventKind::RecoveryFailed)
                        .with_detail(format!("RecoveryFailed: {}", e)),
                );
                EventKind::RecoveryFailed
            }
        };
        self.state = LoopState::Steady;
        kind
    }

    /// Restore the unit and fingerprint the replacement
    async fn recover(&self, snapshot: &SnapshotArtifact) -> Result<Digest> {
        let unit = self
            .orchestrator
            .recover_cancellable(&self.unit, snapshot, || self.stop_requested())
            .await?;
        self.engine
            .fingerprint(&unit.name)
            .await
            .map(|fingerprint| fingerprint.digest)
            .map_err(|e| WardenError::RecoveryFailed {
                unit: self.unit.clone(),
                step: RecoveryStep::Rebaseline,
                reason: e.to_string(),
            })
    }

    /// Run until `stop` is signalled or the unit proves unmonitorable.
    /// The stop signal is checked at every sleep boundary, after each
    /// fingerprint and before each recovery step. A dropped sender counts as
    /// a stop.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> LoopExit {
        self.set_stop(stop.clone());

        info!(
            unit = %self.unit,
            interval = ?self.interval,
            detection_only = self.is_detection_only(),
            "starting integrity supervision"
        );

        if *stop.borrow() {
            self.state = LoopState::Stopped;
            return LoopExit::Stopped;
        }

        if let Err(e) = self.establish_baseline().await {
            return LoopExit::Unmonitorable(e.to_string());
        }

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.changed() => break,
            }

            if *stop.borrow() {
                break;
            }
            self.tick().await;
        }

        info!(unit = %self.unit, "integrity supervision stopped");
        self.state = LoopState::Stopped;
        LoopExit::Stopped
    }
}
