//! Configuration for Warden
//!
//! Settings come from an optional TOML file; command line flags (and their
//! `WARDEN_*` environment fallbacks) override individual values.
//!
//! ```toml
//! runtime = "docker"
//! interval_secs = 30
//! snapshot_dir = "/var/lib/warden/snapshots"
//!
//! [[targets]]
//! unit = "web1"
//! snapshot = "/var/lib/warden/snapshots/web1-golden.tar"
//! image = "web1:golden"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::ExplicitSnapshots;
use crate::error::{Result, WardenError};
use crate::recovery::SnapshotArtifact;
use crate::supervisor::DEFAULT_INTERVAL_SECS;
use crate::unit::validate_unit_name;

pub const DEFAULT_RUNTIME: &str = "docker";
pub const DEFAULT_RUNTIME_GROUP: &str = "docker";
pub const DEFAULT_FINGERPRINT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 300;

/// A unit listed in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub unit: String,
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
    /// Image the snapshot contains, when it differs from the file name
    #[serde(default)]
    pub image: Option<String>,
}

impl TargetConfig {
    pub fn artifact(&self) -> Option<SnapshotArtifact> {
        self.snapshot.as_ref().map(|path| {
            let artifact = SnapshotArtifact::new(path);
            match &self.image {
                Some(image) => artifact.with_image(image),
                None => artifact,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Container runtime command line client
    pub runtime: String,
    /// Group granting access to the runtime
    pub runtime_group: String,
    pub interval_secs: u64,
    pub fingerprint_timeout_secs: u64,
    pub recovery_timeout_secs: u64,
    /// Directory searched for `<unit>.tar` snapshot artifacts
    pub snapshot_dir: Option<PathBuf>,
    pub targets: Vec<TargetConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runtime: DEFAULT_RUNTIME.to_string(),
            runtime_group: DEFAULT_RUNTIME_GROUP.to_string(),
            interval_secs: DEFAULT_INTERVAL_SECS,
            fingerprint_timeout_secs: DEFAULT_FINGERPRINT_TIMEOUT_SECS,
            recovery_timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
            snapshot_dir: None,
            targets: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| WardenError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` if given, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.trim().is_empty() {
            return Err(WardenError::Config("runtime must not be empty".to_string()));
        }
        for (name, value) in [
            ("interval_secs", self.interval_secs),
            ("fingerprint_timeout_secs", self.fingerprint_timeout_secs),
            ("recovery_timeout_secs", self.recovery_timeout_secs),
        ] {
            if value == 0 {
                return Err(WardenError::Config(format!("{} must be greater than 0", name)));
            }
        }
        for target in &self.targets {
            validate_unit_name(&target.unit)?;
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fingerprint_timeout(&self) -> Duration {
        Duration::from_secs(self.fingerprint_timeout_secs)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn target_units(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.unit.clone()).collect()
    }

    /// Snapshots named by the configured targets
    pub fn explicit_snapshots(&self) -> ExplicitSnapshots {
        let mut snapshots = ExplicitSnapshots::new();
        for target in &self.targets {
            if let Some(artifact) = target.artifact() {
                snapshots.insert(&target.unit, artifact);
            }
        }
        snapshots
    }
}
