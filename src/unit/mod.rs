//! Unit model
//!
//! A Unit is one running isolated execution instance (a container) known to
//! the runtime by a unique name, together with the hardened policy it was
//! launched under.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::platform::HostIdentity;

/// Identity used for relaunched units on general-purpose platforms
pub const GENERAL_UNPRIVILEGED_USER: &str = "nobody";

/// Identity used for relaunched units on the Windows family
pub const WINDOWS_UNPRIVILEGED_USER: &str = "nonroot";

/// Whether a unit is currently known to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Running,
    Absent,
}

/// Hardened runtime policy applied to a relaunched unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPolicy {
    /// Name the new unit is registered under
    pub name: String,
    /// Mount the unit's root filesystem read-only
    pub read_only: bool,
    /// Non-administrative identity the unit's process runs as
    pub user: String,
}

impl LaunchPolicy {
    /// Hardened policy for `name`, with the identity chosen per host platform
    pub fn hardened(name: &str, host: &HostIdentity) -> Self {
        Self {
            name: name.to_string(),
            read_only: true,
            user: unprivileged_user(host).to_string(),
        }
    }
}

/// The fixed unprivileged identity for a host platform
pub fn unprivileged_user(host: &HostIdentity) -> &'static str {
    if host.is_windows() {
        WINDOWS_UNPRIVILEGED_USER
    } else {
        GENERAL_UNPRIVILEGED_USER
    }
}

/// A live isolated execution unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Unique name among live units
    pub name: String,
    /// Image the unit was launched from
    pub image: String,
    pub liveness: Liveness,
    pub policy: LaunchPolicy,
    /// When this instance was launched
    pub launched_at: DateTime<Utc>,
}

impl Unit {
    /// Describe a unit that was just launched under `policy`
    pub fn launched(image: &str, policy: LaunchPolicy) -> Self {
        Self {
            name: policy.name.clone(),
            image: image.to_string(),
            liveness: Liveness::Running,
            policy,
            launched_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.liveness == Liveness::Running
    }

    pub fn is_readonly(&self) -> bool {
        self.policy.read_only
    }
}

fn unit_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("unit name pattern is valid")
    })
}

/// Check a unit name against the runtime's container-name grammar
pub fn validate_unit_name(name: &str) -> Result<()> {
    if unit_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(WardenError::InvalidUnitName(name.to_string()))
    }
}
