//! Multi-target coordinator
//!
//! Starts one supervisor loop per selected unit, each as its own task, and
//! keeps their fates independent: a loop that ends (for example because its
//! unit is unmonitorable) is reaped and reported while the others keep
//! running. The coordinator finishes on the shutdown signal, or once no
//! loops remain.

pub mod catalog;
pub mod selection;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::{Result, WardenError};
use crate::fingerprint::FingerprintEngine;
use crate::platform::HostIdentity;
use crate::recovery::{RecoveryOrchestrator, SnapshotArtifact};
use crate::runtime::Runtime;
use crate::supervisor::{EventSink, LoopExit, SupervisorLoop};
use crate::unit::validate_unit_name;

pub use catalog::{ChainedCatalog, ExplicitSnapshots, SnapshotCatalog, SnapshotDir};
pub use selection::Selection;

/// Handle to one running supervisor loop
#[derive(Debug)]
pub struct SupervisionHandle {
    unit: String,
    detection_only: bool,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<LoopExit>,
}

impl SupervisionHandle {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_detection_only(&self) -> bool {
        self.detection_only
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it to wind down
    pub async fn stop(self) -> LoopExit {
        self.stop_tx.send_replace(true);
        join_exit(self.task).await
    }

    async fn join(self) -> LoopExit {
        join_exit(self.task).await
    }
}

async fn join_exit(task: JoinHandle<LoopExit>) -> LoopExit {
    match task.await {
        Ok(exit) => exit,
        Err(e) => LoopExit::Aborted(e.to_string()),
    }
}

/// Fans out and tracks supervisor loops, keyed by unit name
pub struct Coordinator {
    runtime: Arc<dyn Runtime>,
    engine: FingerprintEngine,
    orchestrator: Arc<RecoveryOrchestrator>,
    interval: Duration,
    events: EventSink,
    handles: HashMap<String, SupervisionHandle>,
    done_tx: mpsc::UnboundedSender<String>,
    done_rx: mpsc::UnboundedReceiver<String>,
}

impl Coordinator {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        host: HostIdentity,
        settings: &Settings,
        events: EventSink,
    ) -> Self {
        let engine = FingerprintEngine::new(runtime.clone(), settings.fingerprint_timeout());
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            runtime.clone(),
            host,
            settings.recovery_timeout(),
        ));
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        Self {
            runtime,
            engine,
            orchestrator,
            interval: settings.interval(),
            events,
            handles: HashMap::new(),
            done_tx,
            done_rx,
        }
    }

    /// Query the runtime for the live set of units
    pub async fn discover(&self) -> Result<Vec<String>> {
        let units = self.runtime.list_live_units().await?;
        info!(count = units.len(), "discovered running units");
        Ok(units)
    }

    /// Start supervising `unit`. Without a snapshot the loop runs in
    /// detection-only mode. Must be called within a tokio runtime.
    pub fn start_supervision(
        &mut self,
        unit: &str,
        snapshot: Option<SnapshotArtifact>,
        interval: Option<Duration>,
    ) -> Result<&SupervisionHandle> {
        validate_unit_name(unit)?;
        if self.handles.contains_key(unit) {
            return Err(WardenError::Config(format!(
                "unit '{}' is already supervised",
                unit
            )));
        }

        let detection_only = snapshot.is_none();
        if detection_only {
            info!(unit, "no snapshot available; supervising in detection-only mode");
        }

        let supervisor = SupervisorLoop::new(
            unit,
            snapshot,
            interval.unwrap_or(self.interval),
            self.engine.clone(),
            self.orchestrator.clone(),
            self.events.clone(),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let done_tx = self.done_tx.clone();
        let name = unit.to_string();
        let task = tokio::spawn(async move {
            let exit = supervisor.run(stop_rx).await;
            let _ = done_tx.send(name);
            exit
        });

        let handle = SupervisionHandle {
            unit: unit.to_string(),
            detection_only,
            stop_tx,
            task,
        };
        Ok(self.handles.entry(unit.to_string()).or_insert(handle))
    }

    /// Start one loop per unit, asking `catalog` once per unit for its
    /// snapshot. Returns how many loops were started.
    pub fn start_all(&mut self, units: &[String], catalog: &dyn SnapshotCatalog) -> Result<usize> {
        let mut started = 0;
        for unit in units {
            let snapshot = catalog.snapshot_for(unit);
            match self.start_supervision(unit, snapshot, None) {
                Ok(_) => started += 1,
                Err(e) => warn!(unit = %unit, error = %e, "not supervising unit"),
            }
        }
        Ok(started)
    }

    /// Stop supervising `unit`
    pub async fn stop(&mut self, unit: &str) -> Option<LoopExit> {
        let handle = self.handles.remove(unit)?;
        Some(handle.stop().await)
    }

    /// Names of units with a live loop
    pub fn supervised(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.handles.keys().map(|s| s.as_str()).collect();
        units.sort_unstable();
        units
    }

    pub fn get(&self, unit: &str) -> Option<&SupervisionHandle> {
        self.handles.get(unit)
    }

    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Reap loops as they end and wait for `shutdown`. On shutdown every
    /// remaining loop is stopped. Returns how each loop ended.
    pub async fn run_until_stopped(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Vec<(String, LoopExit)> {
        let mut exits = Vec::new();

        while !self.handles.is_empty() && !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(unit) = self.done_rx.recv() => {
                    if let Some(handle) = self.handles.remove(&unit) {
                        let exit = handle.join().await;
                        match &exit {
                            LoopExit::Stopped => info!(unit = %unit, "supervision ended"),
                            other => error!(unit = %unit, reason = %other, "supervision ended; other units continue"),
                        }
                        exits.push((unit, exit));
                    }
                }
            }
        }

        if !self.handles.is_empty() {
            info!(count = self.handles.len(), "stopping supervision");
        }
        for (unit, handle) in self.handles.drain() {
            let exit = handle.stop().await;
            exits.push((unit, exit));
        }
        exits
    }
}
