//! Docker CLI backend

use std::path::Path;
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ExportStream, Runtime};
use crate::error::RuntimeError;
use crate::unit::LaunchPolicy;

/// Runtime backed by a docker-compatible command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    /// Run to completion, failing on a non-zero exit
    async fn output(&self, args: &[&str]) -> Result<Output, RuntimeError> {
        debug!(command = %self.describe(args), "invoking runtime");
        let output = self
            .command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(RuntimeError::CommandFailed {
                command: self.describe(args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl Runtime for DockerCli {
    async fn export_stream(&self, unit: &str) -> Result<Box<dyn ExportStream>, RuntimeError> {
        let args = ["export", unit];
        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "export output was not captured",
            )));
        };

        Ok(Box::new(DockerExport {
            command: self.describe(&args),
            child,
            stdout,
            stderr: tokio::spawn(collect_stderr(stderr)),
        }))
    }

    async fn remove(&self, unit: &str) -> Result<(), RuntimeError> {
        match self.output(&["rm", "-f", unit]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::CommandFailed { stderr, .. })
                if stderr.contains("No such container") =>
            {
                debug!(unit, "unit already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_artifact(&self, path: &Path) -> Result<String, RuntimeError> {
        let path = path.to_string_lossy();
        let output = self.output(&["load", "-i", path.as_ref()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_loaded_image(&stdout).unwrap_or_default())
    }

    async fn run(&self, image: &str, policy: &LaunchPolicy) -> Result<String, RuntimeError> {
        let mut args = vec!["run", "-d"];
        if policy.read_only {
            args.push("--read-only");
        }
        args.extend(["--user", policy.user.as_str(), "--name", policy.name.as_str(), image]);
        self.output(&args).await?;
        Ok(policy.name.clone())
    }

    async fn list_live_units(&self) -> Result<Vec<String>, RuntimeError> {
        let output = self.output(&["ps", "--format", "{{.Names}}"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }
}

/// `docker export` child process with its stdout exposed as the stream.
/// Stderr is read concurrently so a chatty child cannot block on a full pipe.
struct DockerExport {
    command: String,
    child: Child,
    stdout: ChildStdout,
    stderr: JoinHandle<Vec<u8>>,
}

async fn collect_stderr(mut stderr: ChildStderr) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        debug!(error = %e, "stopped reading export stderr");
    }
    buf
}

impl AsyncRead for DockerExport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

#[async_trait]
impl ExportStream for DockerExport {
    async fn finish(self: Box<Self>) -> Result<(), RuntimeError> {
        let DockerExport {
            command,
            mut child,
            stdout,
            stderr,
        } = *self;
        drop(stdout);

        let status = child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = stderr.await.unwrap_or_default();
        Err(RuntimeError::CommandFailed {
            command,
            status: status.to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        })
    }
}

/// Extract the reference from `docker load` output ("Loaded image: web1:latest")
fn parse_loaded_image(stdout: &str) -> Option<String> {
    stdout.lines().rev().find_map(|line| {
        line.strip_prefix("Loaded image: ")
            .or_else(|| line.strip_prefix("Loaded image ID: "))
            .map(|s| s.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loaded_image() {
        assert_eq!(
            parse_loaded_image("Loaded image: web1:latest\n"),
            Some("web1:latest".to_string())
        );
        assert_eq!(
            parse_loaded_image("Loaded image ID: sha256:abc\n"),
            Some("sha256:abc".to_string())
        );
        assert_eq!(parse_loaded_image(""), None);
    }

    /// Fake runtime binary: a shell script standing in for `docker`
    #[cfg(unix)]
    fn script_runtime(dir: &tempfile::TempDir, body: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-docker");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(path.to_string_lossy())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_export_survives_large_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = script_runtime(&dir, "head -c 1048576 /dev/zero >&2\nprintf rootfs");

        let mut export = runtime.export_stream("web1").await.unwrap();
        let mut data = Vec::new();
        tokio::time::timeout(std::time::Duration::from_secs(20), export.read_to_end(&mut data))
            .await
            .expect("export stalled")
            .unwrap();
        assert_eq!(data, b"rootfs");
        export.finish().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_export_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = script_runtime(&dir, "echo 'No such container: web1' >&2\nexit 1");

        let mut export = runtime.export_stream("web1").await.unwrap();
        let mut data = Vec::new();
        export.read_to_end(&mut data).await.unwrap();
        match export.finish().await.unwrap_err() {
            RuntimeError::CommandFailed { stderr, .. } => {
                assert_eq!(stderr, "No such container: web1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runtime = DockerCli::new("warden-no-such-runtime-binary");
        let err = runtime.list_live_units().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
