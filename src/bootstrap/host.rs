//! Bootstrap actions against the real host

use std::convert::Infallible;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use super::HostAccess;
use crate::error::{Result, RuntimeError, WardenError};
use crate::platform::{normalize_family, HostIdentity};

/// Hidden flag marking the re-executed process
pub const POST_REEXEC_FLAG: &str = "--post-reexec";

/// Linux package managers in order of preference
const LINUX_PACKAGE_MANAGERS: &[&str] = &["apt-get", "dnf", "yum", "zypper", "pacman"];

/// One command of an installation plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Needs root
    pub privileged: bool,
}

impl PlannedCommand {
    fn root(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            privileged: true,
        }
    }
}

/// Commands that install `runtime` on a host of `family`. `available` says
/// whether a program is on the PATH.
pub fn install_plan(
    family: &str,
    runtime: &str,
    available: impl Fn(&str) -> bool,
) -> Result<Vec<PlannedCommand>> {
    let family = normalize_family(family);
    match family.as_str() {
        "windows" => Err(WardenError::BootstrapFailed(
            "automatic runtime installation is not supported on Windows".to_string(),
        )),
        "bsd" => {
            if !available("pkg") {
                return Err(WardenError::BootstrapFailed("'pkg' not found".to_string()));
            }
            Ok(vec![
                PlannedCommand::root("pkg", &["update"]),
                PlannedCommand::root("pkg", &["install", "-y", runtime]),
            ])
        }
        "nix" => {
            if !available("nix-env") {
                return Err(WardenError::BootstrapFailed("'nix-env' not found".to_string()));
            }
            Ok(vec![PlannedCommand::root("nix-env", &["-i", runtime])])
        }
        _ => {
            let manager = LINUX_PACKAGE_MANAGERS
                .iter()
                .copied()
                .find(|pm| available(pm))
                .ok_or_else(|| {
                    WardenError::BootstrapFailed("no supported package manager found".to_string())
                })?;

            let mut plan = match manager {
                "apt-get" => {
                    let package = if runtime == "docker" { "docker.io" } else { runtime };
                    vec![
                        PlannedCommand::root("apt-get", &["update", "-y"]),
                        PlannedCommand::root("apt-get", &["install", "-y", package]),
                    ]
                }
                "dnf" | "yum" => vec![PlannedCommand::root(manager, &["-y", "install", runtime])],
                "zypper" => vec![
                    PlannedCommand::root("zypper", &["refresh"]),
                    PlannedCommand::root("zypper", &["--non-interactive", "install", runtime]),
                ],
                _ => vec![PlannedCommand::root(
                    "pacman",
                    &["-S", "--noconfirm", "--needed", runtime],
                )],
            };

            if available("systemctl") {
                plan.push(PlannedCommand::root("systemctl", &["enable", runtime]));
                plan.push(PlannedCommand::root("systemctl", &["start", runtime]));
            }
            Ok(plan)
        }
    }
}

/// Quote for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Shell line run under `sg` to restart this process with the group active
pub fn reexec_command_line(program: &str, args: &[String]) -> String {
    let mut line = format!("exec {}", shell_quote(program));
    for arg in args.iter().filter(|a| a.as_str() != POST_REEXEC_FLAG) {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line.push(' ');
    line.push_str(POST_REEXEC_FLAG);
    line
}

/// The machine Warden runs on
#[derive(Debug, Clone)]
pub struct SystemHost {
    runtime: String,
    group: String,
    identity: HostIdentity,
}

impl SystemHost {
    pub fn new(runtime: impl Into<String>, group: impl Into<String>, identity: HostIdentity) -> Self {
        Self {
            runtime: runtime.into(),
            group: group.into(),
            identity,
        }
    }

    fn is_root() -> bool {
        #[cfg(unix)]
        {
            // SAFETY: geteuid has no preconditions and cannot fail
            unsafe { libc::geteuid() == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn command(&self, planned: &PlannedCommand) -> Command {
        let mut cmd = if planned.privileged && !Self::is_root() {
            let mut cmd = Command::new("sudo");
            cmd.arg(&planned.program);
            cmd
        } else {
            Command::new(&planned.program)
        };
        cmd.args(&planned.args);
        cmd
    }

    fn execute(&self, planned: &PlannedCommand) -> Result<()> {
        let description = format!("{} {}", planned.program, planned.args.join(" "));
        info!(command = %description, "running host command");
        let output = self
            .command(planned)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RuntimeError::Spawn {
                program: planned.program.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                command: description,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into())
        }
    }

    fn current_user() -> Option<String> {
        std::env::var("SUDO_USER")
            .or_else(|_| std::env::var("USER"))
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|u| !u.is_empty())
    }

    fn group_exists(&self) -> bool {
        Command::new("getent")
            .args(["group", self.group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn user_in_group(&self, user: &str) -> bool {
        Command::new("id")
            .args(["-nG", user])
            .output()
            .map(|out| {
                String::from_utf8_lossy(&out.stdout)
                    .split_whitespace()
                    .any(|g| g == self.group)
            })
            .unwrap_or(false)
    }

    /// Replace this process with itself under `sg <group>`, appending the
    /// post-re-exec flag. Returns only on failure.
    #[cfg(unix)]
    pub fn reexec(&self, args: &[String]) -> Result<Infallible> {
        use std::os::unix::process::CommandExt;

        let program = std::env::current_exe()?;
        let line = reexec_command_line(&program.to_string_lossy(), args);
        info!(group = %self.group, "re-executing to activate group membership");
        debug!(command = %line, "sg command line");
        let err = Command::new("sg").args([self.group.as_str(), "-c", line.as_str()]).exec();
        Err(WardenError::BootstrapFailed(format!("re-exec via sg failed: {}", err)))
    }

    #[cfg(not(unix))]
    pub fn reexec(&self, _args: &[String]) -> Result<Infallible> {
        Err(WardenError::BootstrapFailed(
            "re-exec is not supported on this platform".to_string(),
        ))
    }
}

impl HostAccess for SystemHost {
    fn probe_runtime_access(&self) -> bool {
        let ok = Command::new(&self.runtime)
            .arg("ps")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        debug!(runtime = %self.runtime, ok, "probed runtime access");
        ok
    }

    fn is_runtime_installed(&self) -> bool {
        which::which(&self.runtime).is_ok()
    }

    fn install_runtime(&self) -> Result<()> {
        let plan = install_plan(&self.identity.family, &self.runtime, |program| {
            which::which(program).is_ok()
        })?;
        info!(host = %self.identity, steps = plan.len(), "installing runtime");
        for step in &plan {
            self.execute(step)?;
        }
        Ok(())
    }

    fn grant_runtime_group(&self) -> Result<()> {
        let user = Self::current_user().ok_or_else(|| {
            WardenError::BootstrapFailed("cannot determine the current user".to_string())
        })?;

        if !self.group_exists() {
            self.execute(&PlannedCommand::root("groupadd", &[self.group.as_str()]))?;
        }
        if self.user_in_group(&user) {
            debug!(user = %user, group = %self.group, "user already in group");
        } else {
            self.execute(&PlannedCommand::root(
                "usermod",
                &["-aG", self.group.as_str(), user.as_str()],
            ))?;
        }

        if which::which("systemctl").is_ok() {
            if let Err(e) = self.execute(&PlannedCommand::root("systemctl", &["start", self.runtime.as_str()])) {
                warn!(error = %e, "could not start runtime service");
            }
        }
        Ok(())
    }
}
