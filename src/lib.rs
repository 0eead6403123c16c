//! Warden - container integrity supervision with snapshot-based self-healing
//!
//! Warden fingerprints the exported filesystem of running containers, detects
//! drift from a trusted baseline, and restores drifted containers from a
//! known-good snapshot under a hardened launch policy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden::{Coordinator, EventSink, Settings};
//! use warden::platform::detect_host_identity;
//! use warden::runtime::DockerCli;
//!
//! # async fn demo() -> warden::Result<()> {
//! let settings = Settings::default();
//! let (sink, mut events) = EventSink::channel();
//! let mut coordinator = Coordinator::new(
//!     Arc::new(DockerCli::default()),
//!     detect_host_identity(),
//!     &settings,
//!     sink,
//! );
//! coordinator.start_supervision("web1", None, None)?;
//! while let Some(event) = events.recv().await {
//!     println!("{} {}", event.unit, event.kind);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod output;
pub mod platform;
pub mod recovery;
pub mod runtime;
pub mod supervisor;
pub mod unit;

pub use bootstrap::{Bootstrap, BootstrapOutcome, BootstrapState, HostAccess};
pub use config::Settings;
pub use coordinator::{Coordinator, Selection, SnapshotCatalog, SupervisionHandle};
pub use error::{Result, RuntimeError, WardenError};
pub use fingerprint::{Digest, Fingerprint, FingerprintEngine};
pub use output::{format_output, OutputFormat, Report};
pub use platform::{resolve, HostIdentity};
pub use recovery::{RecoveryOrchestrator, RecoveryStep, SnapshotArtifact};
pub use supervisor::{EventKind, EventSink, IntegrityEvent, LoopExit, SupervisorLoop};
pub use unit::{LaunchPolicy, Unit};
