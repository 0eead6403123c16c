//! Container runtime collaborator
//!
//! Supervision never talks to the runtime directly; it goes through the
//! [`Runtime`] trait so the Docker CLI backend can be swapped for a scripted
//! one in tests.

mod docker;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::RuntimeError;
use crate::unit::LaunchPolicy;

pub use docker::DockerCli;

/// A unit's serialized filesystem, readable incrementally
#[async_trait]
pub trait ExportStream: AsyncRead + Send + Unpin {
    /// Wait for the producer to exit. A producer that fails after (or
    /// instead of) writing is reported here, so a truncated or empty stream
    /// is never mistaken for a complete one.
    async fn finish(self: Box<Self>) -> Result<(), RuntimeError>;
}

/// Operations the supervision core consumes from the container runtime
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Start streaming the full filesystem export of `unit`
    async fn export_stream(&self, unit: &str) -> Result<Box<dyn ExportStream>, RuntimeError>;

    /// Forcefully remove `unit`. Removing an absent unit succeeds.
    async fn remove(&self, unit: &str) -> Result<(), RuntimeError>;

    /// Load a snapshot artifact into the local artifact store and return
    /// the image name the runtime reported for it
    async fn load_artifact(&self, path: &Path) -> Result<String, RuntimeError>;

    /// Launch a detached unit from `image` under `policy`; returns its name
    async fn run(&self, image: &str, policy: &LaunchPolicy) -> Result<String, RuntimeError>;

    /// Names of all running units
    async fn list_live_units(&self) -> Result<Vec<String>, RuntimeError>;
}
