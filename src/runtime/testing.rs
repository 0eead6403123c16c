//! Scripted in-memory runtime for exercising supervision without a daemon

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use super::{ExportStream, Runtime};
use crate::error::RuntimeError;
use crate::unit::LaunchPolicy;

/// Which collaborator call should fail or stall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    Remove,
    Load,
    Run,
    List,
}

#[derive(Default)]
struct State {
    /// Live units and their filesystem contents
    units: HashMap<String, Vec<u8>>,
    /// Images in the local store
    images: HashMap<String, Vec<u8>>,
    /// Snapshot artifacts on "disk": path -> (image name, contents)
    artifacts: HashMap<PathBuf, (String, Vec<u8>)>,
    unreadable: HashSet<String>,
    truncated: HashSet<String>,
    hanging: HashSet<String>,
    export_delay: Duration,
    failing: HashSet<FailOn>,
    stalled: HashSet<FailOn>,
    launched: Vec<(String, LaunchPolicy)>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn with_unit(self, name: &str, contents: &[u8]) -> Self {
        self.set_contents(name, contents);
        self
    }

    pub fn with_artifact(self, path: &str, image: &str, contents: &[u8]) -> Self {
        self.with_state(|s| {
            s.artifacts
                .insert(PathBuf::from(path), (image.to_string(), contents.to_vec()))
        });
        self
    }

    /// Overwrite a unit's filesystem, simulating drift
    pub fn set_contents(&self, name: &str, contents: &[u8]) {
        self.with_state(|s| s.units.insert(name.to_string(), contents.to_vec()));
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.with_state(|s| s.units.get(name).cloned())
    }

    /// Exports of `name` fail before producing a stream
    pub fn make_unreadable(&self, name: &str) {
        self.with_state(|s| s.unreadable.insert(name.to_string()));
    }

    /// Exports of `name` produce data and then report a transport failure
    pub fn make_truncated(&self, name: &str) {
        self.with_state(|s| s.truncated.insert(name.to_string()));
    }

    /// Exports of `name` never complete
    pub fn make_hanging(&self, name: &str) {
        self.with_state(|s| s.hanging.insert(name.to_string()));
    }

    /// Every export waits `delay` before reading the unit
    pub fn with_export_delay(self, delay: Duration) -> Self {
        self.with_state(|s| s.export_delay = delay);
        self
    }

    /// Calls of `step` are recorded and then never complete
    pub fn hang_on(&self, step: FailOn) {
        self.with_state(|s| s.stalled.insert(step));
    }

    pub fn fail_on(&self, step: FailOn) {
        self.with_state(|s| s.failing.insert(step));
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| s.failing.clear());
    }

    pub fn launched(&self) -> Vec<(String, LaunchPolicy)> {
        self.with_state(|s| s.launched.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    async fn settle<T>(outcome: Option<T>) -> T {
        match outcome {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        }
    }

    fn scripted_failure(command: &str) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            stderr: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl Runtime for ScriptedRuntime {
    async fn export_stream(&self, unit: &str) -> Result<Box<dyn ExportStream>, RuntimeError> {
        let delay = self.with_state(|s| {
            s.calls.push(format!("export {unit}"));
            s.export_delay
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.with_state(|s| {
            if s.hanging.contains(unit) {
                return None;
            }
            if s.unreadable.contains(unit) {
                return Some(Err(Self::scripted_failure(&format!("export {unit}"))));
            }
            Some(match s.units.get(unit) {
                Some(contents) => Ok(MemoryExport {
                    data: Cursor::new(contents.clone()),
                    truncated: s.truncated.contains(unit),
                }),
                None => Err(RuntimeError::CommandFailed {
                    command: format!("export {unit}"),
                    status: "exit status: 1".to_string(),
                    stderr: format!("No such container: {unit}"),
                }),
            })
        });

        Self::settle(outcome)
            .await
            .map(|export| Box::new(export) as Box<dyn ExportStream>)
    }

    async fn remove(&self, unit: &str) -> Result<(), RuntimeError> {
        let outcome = self.with_state(|s| {
            s.calls.push(format!("remove {unit}"));
            if s.stalled.contains(&FailOn::Remove) {
                return None;
            }
            if s.failing.contains(&FailOn::Remove) {
                return Some(Err(Self::scripted_failure("rm -f")));
            }
            s.units.remove(unit);
            Some(Ok(()))
        });
        Self::settle(outcome).await
    }

    async fn load_artifact(&self, path: &Path) -> Result<String, RuntimeError> {
        let outcome = self.with_state(|s| {
            s.calls.push(format!("load {}", path.display()));
            if s.stalled.contains(&FailOn::Load) {
                return None;
            }
            if s.failing.contains(&FailOn::Load) {
                return Some(Err(Self::scripted_failure("load")));
            }
            Some(match s.artifacts.get(path).cloned() {
                Some((image, contents)) => {
                    s.images.insert(image.clone(), contents);
                    Ok(image)
                }
                None => Err(RuntimeError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                ))),
            })
        });
        Self::settle(outcome).await
    }

    async fn run(&self, image: &str, policy: &LaunchPolicy) -> Result<String, RuntimeError> {
        let outcome = self.with_state(|s| {
            s.calls.push(format!("run {image} as {}", policy.name));
            if s.stalled.contains(&FailOn::Run) {
                return None;
            }
            if s.failing.contains(&FailOn::Run) {
                return Some(Err(Self::scripted_failure("run")));
            }
            let Some(contents) = s.images.get(image).cloned() else {
                return Some(Err(Self::scripted_failure(&format!("run {image}: no such image"))));
            };
            s.units.insert(policy.name.clone(), contents);
            s.launched.push((image.to_string(), policy.clone()));
            Some(Ok(policy.name.clone()))
        });
        Self::settle(outcome).await
    }

    async fn list_live_units(&self) -> Result<Vec<String>, RuntimeError> {
        self.with_state(|s| {
            s.calls.push("list".to_string());
            if s.failing.contains(&FailOn::List) {
                return Err(Self::scripted_failure("ps"));
            }
            let mut names: Vec<String> = s.units.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }
}

struct MemoryExport {
    data: Cursor<Vec<u8>>,
    truncated: bool,
}

impl AsyncRead for MemoryExport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}

#[async_trait]
impl ExportStream for MemoryExport {
    async fn finish(self: Box<Self>) -> Result<(), RuntimeError> {
        if self.truncated {
            Err(RuntimeError::CommandFailed {
                command: "export".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "unexpected EOF".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
