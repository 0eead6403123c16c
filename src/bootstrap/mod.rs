//! Privilege bootstrap
//!
//! Makes sure the process can operate the container runtime before any
//! supervision starts. The state machine never replaces the process itself:
//! when a re-exec is needed it returns [`BootstrapOutcome::ReExec`] and the
//! caller performs it. Whether this process already is the re-executed one is
//! passed in explicitly, so the re-exec path is taken at most once.

pub mod host;

use std::fmt;

use tracing::{info, warn};

use crate::error::{Result, WardenError};

pub use host::SystemHost;

/// Host operations the bootstrap drives
pub trait HostAccess {
    /// Cheap no-op runtime query; true when it succeeds
    fn probe_runtime_access(&self) -> bool;

    fn is_runtime_installed(&self) -> bool;

    fn install_runtime(&self) -> Result<()>;

    /// Grant the current identity membership of the runtime's group
    fn grant_runtime_group(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Unchecked,
    Checking,
    Installing,
    FixingPermissions,
    ReExecuted,
    Ready,
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapState::Unchecked => "unchecked",
            BootstrapState::Checking => "checking",
            BootstrapState::Installing => "installing",
            BootstrapState::FixingPermissions => "fixing permissions",
            BootstrapState::ReExecuted => "re-executed",
            BootstrapState::Ready => "ready",
            BootstrapState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// What the caller must do after [`Bootstrap::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Runtime access confirmed; proceed
    Ready,
    /// Re-execute the whole process with the post-re-exec flag set
    ReExec,
}

#[derive(Debug)]
pub struct Bootstrap {
    already_reexecuted: bool,
    state: BootstrapState,
    history: Vec<BootstrapState>,
}

impl Bootstrap {
    pub fn new(already_reexecuted: bool) -> Self {
        Self {
            already_reexecuted,
            state: BootstrapState::Unchecked,
            history: vec![BootstrapState::Unchecked],
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[BootstrapState] {
        &self.history
    }

    fn enter(&mut self, state: BootstrapState) {
        info!(from = %self.state, to = %state, "bootstrap transition");
        self.state = state;
        self.history.push(state);
    }

    fn fail(&mut self, reason: String) -> WardenError {
        self.enter(BootstrapState::Failed);
        WardenError::BootstrapFailed(reason)
    }

    pub fn run(&mut self, host: &dyn HostAccess) -> Result<BootstrapOutcome> {
        match self.state {
            BootstrapState::Ready => return Ok(BootstrapOutcome::Ready),
            BootstrapState::ReExecuted => return Ok(BootstrapOutcome::ReExec),
            BootstrapState::Failed => {
                return Err(WardenError::BootstrapFailed(
                    "bootstrap already failed".to_string(),
                ))
            }
            _ => {}
        }

        self.enter(BootstrapState::Checking);
        if host.probe_runtime_access() {
            self.enter(BootstrapState::Ready);
            return Ok(BootstrapOutcome::Ready);
        }

        if self.already_reexecuted {
            return Err(self.fail(
                "runtime is still not accessible after installation and permission fix; \
                 log out and back in, or run as a member of the runtime group"
                    .to_string(),
            ));
        }

        if !host.is_runtime_installed() {
            self.enter(BootstrapState::Installing);
            if let Err(e) = host.install_runtime() {
                return Err(self.fail(format!("installation failed: {}", e)));
            }
            self.enter(BootstrapState::Checking);
            if host.probe_runtime_access() {
                self.enter(BootstrapState::Ready);
                return Ok(BootstrapOutcome::Ready);
            }
        }

        warn!("runtime installed but not accessible; fixing group membership");
        self.enter(BootstrapState::FixingPermissions);
        if let Err(e) = host.grant_runtime_group() {
            return Err(self.fail(format!("permission fix failed: {}", e)));
        }
        self.enter(BootstrapState::ReExecuted);
        Ok(BootstrapOutcome::ReExec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeHost {
        probe_results: Vec<bool>,
        probes: Cell<usize>,
        installed: bool,
        install_ok: bool,
        grant_ok: bool,
        installs: Cell<usize>,
        grants: Cell<usize>,
    }

    impl FakeHost {
        fn new(probe_results: Vec<bool>) -> Self {
            Self {
                probe_results,
                probes: Cell::new(0),
                installed: true,
                install_ok: true,
                grant_ok: true,
                installs: Cell::new(0),
                grants: Cell::new(0),
            }
        }
    }

    impl HostAccess for FakeHost {
        fn probe_runtime_access(&self) -> bool {
            let n = self.probes.get();
            self.probes.set(n + 1);
            self.probe_results.get(n).copied().unwrap_or(false)
        }

        fn is_runtime_installed(&self) -> bool {
            self.installed
        }

        fn install_runtime(&self) -> Result<()> {
            self.installs.set(self.installs.get() + 1);
            if self.install_ok {
                Ok(())
            } else {
                Err(WardenError::BootstrapFailed("no package manager".to_string()))
            }
        }

        fn grant_runtime_group(&self) -> Result<()> {
            self.grants.set(self.grants.get() + 1);
            if self.grant_ok {
                Ok(())
            } else {
                Err(WardenError::BootstrapFailed("usermod failed".to_string()))
            }
        }
    }

    #[test]
    fn test_ready_when_probe_succeeds() {
        let host = FakeHost::new(vec![true]);
        let mut bootstrap = Bootstrap::new(false);
        assert_eq!(bootstrap.run(&host).unwrap(), BootstrapOutcome::Ready);
        assert_eq!(
            bootstrap.history(),
            &[BootstrapState::Unchecked, BootstrapState::Checking, BootstrapState::Ready]
        );
        assert_eq!(host.installs.get(), 0);
    }

    #[test]
    fn test_install_then_ready() {
        let mut host = FakeHost::new(vec![false, true]);
        host.installed = false;
        let mut bootstrap = Bootstrap::new(false);
        assert_eq!(bootstrap.run(&host).unwrap(), BootstrapOutcome::Ready);
        assert_eq!(host.installs.get(), 1);
        assert_eq!(host.grants.get(), 0);
        assert!(bootstrap.history().contains(&BootstrapState::Installing));
    }

    #[test]
    fn test_reexec_exactly_once_then_fail_fast() {
        let mut host = FakeHost::new(vec![false, false]);
        host.installed = false;

        let mut first = Bootstrap::new(false);
        assert_eq!(first.run(&host).unwrap(), BootstrapOutcome::ReExec);
        assert_eq!(first.state(), BootstrapState::ReExecuted);
        assert_eq!(host.grants.get(), 1);

        // the re-executed process
        let host = FakeHost::new(vec![false]);
        let mut second = Bootstrap::new(true);
        let err = second.run(&host).unwrap_err();
        assert!(matches!(err, WardenError::BootstrapFailed(_)));
        assert_eq!(second.state(), BootstrapState::Failed);
        assert_eq!(host.installs.get(), 0);
        assert_eq!(host.grants.get(), 0);
        assert_eq!(host.probes.get(), 1);
    }

    #[test]
    fn test_reexecuted_process_ready_when_fix_took_effect() {
        let host = FakeHost::new(vec![true]);
        let mut bootstrap = Bootstrap::new(true);
        assert_eq!(bootstrap.run(&host).unwrap(), BootstrapOutcome::Ready);
    }

    #[test]
    fn test_installed_but_inaccessible_skips_install() {
        let host = FakeHost::new(vec![false]);
        let mut bootstrap = Bootstrap::new(false);
        assert_eq!(bootstrap.run(&host).unwrap(), BootstrapOutcome::ReExec);
        assert_eq!(host.installs.get(), 0);
        assert_eq!(
            bootstrap.history(),
            &[
                BootstrapState::Unchecked,
                BootstrapState::Checking,
                BootstrapState::FixingPermissions,
                BootstrapState::ReExecuted
            ]
        );
    }

    #[test]
    fn test_install_failure_is_terminal() {
        let mut host = FakeHost::new(vec![false]);
        host.installed = false;
        host.install_ok = false;
        let mut bootstrap = Bootstrap::new(false);
        assert!(bootstrap.run(&host).is_err());
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
        assert!(bootstrap.run(&host).is_err());
        assert_eq!(host.installs.get(), 1);
    }

    #[test]
    fn test_grant_failure_is_terminal() {
        let mut host = FakeHost::new(vec![false]);
        host.grant_ok = false;
        let mut bootstrap = Bootstrap::new(false);
        assert!(bootstrap.run(&host).is_err());
        assert_eq!(bootstrap.state(), BootstrapState::Failed);
    }

    #[test]
    fn test_run_is_idempotent_once_ready() {
        let host = FakeHost::new(vec![true]);
        let mut bootstrap = Bootstrap::new(false);
        bootstrap.run(&host).unwrap();
        assert_eq!(bootstrap.run(&host).unwrap(), BootstrapOutcome::Ready);
        assert_eq!(host.probes.get(), 1);
    }
}
