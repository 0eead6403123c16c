//! Host platform identity
//!
//! Detects the (family, version) pair of the machine Warden runs on. The
//! identity feeds the platform resolver and the choice of unprivileged user
//! for relaunched units.

pub mod resolver;

use serde::{Deserialize, Serialize};
use sysinfo::System;

pub use resolver::{resolve, resolve_detailed, Resolution, ResolutionSource, GLOBAL_DEFAULT_IMAGE};

/// Distribution family and version describing a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub family: String,
    pub version: String,
}

impl HostIdentity {
    pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            version: version.into(),
        }
    }

    pub fn is_windows(&self) -> bool {
        normalize_family(&self.family) == "windows"
    }

    /// Recommended base image for this host
    pub fn recommended_image(&self) -> &'static str {
        resolve(&self.family, &self.version)
    }
}

impl std::fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.family)
        } else {
            write!(f, "{} {}", self.family, self.version)
        }
    }
}

/// Lowercase a family name and read `-`/`_` as spaces
pub fn normalize_family(family: &str) -> String {
    family
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Detect the identity of the current host
pub fn detect_host_identity() -> HostIdentity {
    let os = std::env::consts::OS;
    let version = System::os_version().unwrap_or_default().to_lowercase();

    match os {
        "windows" => HostIdentity::new("windows", version),
        "freebsd" | "openbsd" | "netbsd" | "dragonfly" => HostIdentity::new("bsd", ""),
        "linux" => {
            let id = System::distribution_id().to_lowercase();
            if id == "nixos" {
                HostIdentity::new("nix", "")
            } else if id.is_empty() {
                HostIdentity::new("linux", version)
            } else {
                HostIdentity::new(id, version)
            }
        }
        other => {
            let name = System::name().unwrap_or_else(|| other.to_string());
            HostIdentity::new(name.to_lowercase(), "")
        }
    }
}
