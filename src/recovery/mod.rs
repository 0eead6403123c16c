//! Recovery orchestrator
//!
//! Replaces a drifted unit with a fresh instance restored from a snapshot
//! artifact: tear the old unit down, load the artifact, relaunch under a
//! hardened policy. Each step is bounded by the recovery deadline and a
//! failure is attributed to the step that produced it.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError, WardenError};
use crate::platform::{resolve_detailed, HostIdentity};
use crate::runtime::Runtime;
use crate::unit::{LaunchPolicy, Unit};

/// Steps of a recovery, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStep {
    Teardown,
    Load,
    Launch,
    /// Fingerprinting the replacement, driven by the supervisor loop
    Rebaseline,
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryStep::Teardown => "teardown",
            RecoveryStep::Load => "load",
            RecoveryStep::Launch => "launch",
            RecoveryStep::Rebaseline => "rebaseline",
        };
        f.write_str(name)
    }
}

/// A known-good saved unit image, referenced by path and never modified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotArtifact {
    pub path: PathBuf,
    /// Image the artifact is known to contain, when the caller knows it
    #[serde(default)]
    pub image: Option<String>,
}

impl SnapshotArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Image reference derived from the artifact's own file name:
    /// `/snapshots/web1.tar` loads as `web1`
    pub fn derived_image(&self) -> Option<String> {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().trim().to_string())
            .filter(|stem| !stem.is_empty())
    }
}

/// Where the relaunch image reference came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Explicit,
    ArtifactName,
    PlatformResolver,
}

/// Choose the image to relaunch from: explicit, else derived from the
/// artifact name, else the platform recommendation for `host`
pub fn select_image(artifact: &SnapshotArtifact, host: &HostIdentity) -> (String, ImageSource) {
    if let Some(image) = artifact.image.as_deref().filter(|i| !i.trim().is_empty()) {
        return (image.to_string(), ImageSource::Explicit);
    }
    if let Some(image) = artifact.derived_image() {
        return (image, ImageSource::ArtifactName);
    }
    let resolution = resolve_detailed(&host.family, &host.version);
    (resolution.image.to_string(), ImageSource::PlatformResolver)
}

/// Tears down and relaunches units from snapshot artifacts
pub struct RecoveryOrchestrator {
    runtime: Arc<dyn Runtime>,
    host: HostIdentity,
    timeout: Duration,
}

impl RecoveryOrchestrator {
    pub fn new(runtime: Arc<dyn Runtime>, host: HostIdentity, timeout: Duration) -> Self {
        Self {
            runtime,
            host,
            timeout,
        }
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Replace `unit` with a fresh instance from `artifact`. Any step failure
    /// aborts the whole recovery.
    pub async fn recover(&self, unit: &str, artifact: &SnapshotArtifact) -> Result<Unit> {
        self.recover_cancellable(unit, artifact, || false).await
    }

    /// Like [`recover`](Self::recover), but `cancelled` is consulted before
    /// each step and a set flag aborts the recovery at that step.
    pub async fn recover_cancellable(
        &self,
        unit: &str,
        artifact: &SnapshotArtifact,
        cancelled: impl Fn() -> bool,
    ) -> Result<Unit> {
        let deadline = Instant::now() + self.timeout;
        info!(unit, snapshot = %artifact.path.display(), "restoring unit from snapshot");

        self.check_cancelled(unit, RecoveryStep::Teardown, &cancelled)?;
        self.step(unit, RecoveryStep::Teardown, deadline, self.runtime.remove(unit))
            .await?;
        debug!(unit, "removed drifted unit");

        self.check_cancelled(unit, RecoveryStep::Load, &cancelled)?;
        let reported = self
            .step(
                unit,
                RecoveryStep::Load,
                deadline,
                self.runtime.load_artifact(&artifact.path),
            )
            .await?;

        let (image, source) = select_image(artifact, &self.host);
        if !reported.is_empty() && reported != image && !reported.starts_with(&format!("{image}:")) {
            warn!(unit, %image, %reported, "runtime reported a different image for the snapshot");
        }
        debug!(unit, %image, ?source, "selected relaunch image");

        self.check_cancelled(unit, RecoveryStep::Launch, &cancelled)?;
        let policy = LaunchPolicy::hardened(unit, &self.host);
        self.step(
            unit,
            RecoveryStep::Launch,
            deadline,
            self.runtime.run(&image, &policy),
        )
        .await?;

        info!(unit, %image, user = %policy.user, "unit relaunched read-only");
        Ok(Unit::launched(&image, policy))
    }

    fn check_cancelled(
        &self,
        unit: &str,
        step: RecoveryStep,
        cancelled: &impl Fn() -> bool,
    ) -> Result<()> {
        if !cancelled() {
            return Ok(());
        }
        warn!(unit, %step, "stop requested; abandoning recovery");
        Err(WardenError::RecoveryFailed {
            unit: unit.to_string(),
            step,
            reason: "cancelled: stop requested".to_string(),
        })
    }

    async fn step<T>(
        &self,
        unit: &str,
        step: RecoveryStep,
        deadline: Instant,
        call: impl Future<Output = std::result::Result<T, RuntimeError>>,
    ) -> Result<T> {
        let outcome = tokio::time::timeout_at(deadline, call)
            .await
            .unwrap_or(Err(RuntimeError::Timeout(self.timeout)));

        outcome.map_err(|e| {
            warn!(unit, %step, error = %e, "recovery step failed");
            WardenError::RecoveryFailed {
                unit: unit.to_string(),
                step,
                reason: e.to_string(),
            }
        })
    }
}

/// Check that a snapshot artifact exists before supervision relies on it
pub fn check_artifact(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(WardenError::Config(format!(
            "snapshot artifact '{}' does not exist",
            path.display()
        )))
    }
}
