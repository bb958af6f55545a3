//! Compositor snapshot adapter and snapshotter collaborators.
//!
//! The adapter turns an opaque niri snapshot blob into an un-normalized
//! [`State`]. Two payload shapes are accepted: an object with `workspaces`
//! and `windows` arrays, or a bare array interpreted as windows-only (the
//! shape `niri msg -j windows` emits). Numeric ids are coerced to strings
//! and `null` names are treated as absent. Window keys are synthesized as
//! `"w:" + app_id + ":" + numeric_id` so they stay stable per logical window
//! across captures.
//!
//! [`CommandSnapshotter`] produces the blob by running the configured shell
//! command through an injected [`CommandRunner`]. When that command is
//! exactly `niri msg -j windows`, a second `niri msg -j workspaces` run is
//! merged into a combined `{workspaces, windows}` payload so workspace
//! names and indices are captured too; if the workspaces run or the merge
//! fails, the windows-only payload is returned as-is.

use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::state::{State, Window, Workspace, normalize};

/// Produces a compositor snapshot blob for the collector.
pub trait Snapshotter: Send + Sync {
    /// Produce one snapshot blob.
    fn snapshot(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct SnapshotPayload {
    #[serde(default)]
    workspaces: Vec<WorkspacePayload>,
    #[serde(default)]
    windows: Vec<WindowPayload>,
}

#[derive(Debug, Deserialize)]
struct WorkspacePayload {
    #[serde(default)]
    id: Value,
    #[serde(default, alias = "idx")]
    index: u32,
    #[serde(default)]
    name: Value,
}

#[derive(Debug, Deserialize)]
struct WindowPayload {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    app_id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    workspace_id: Value,
    #[serde(default)]
    pid: Option<i64>,
}

/// Parse a compositor snapshot blob into an un-normalized state.
///
/// Fails only on payloads that parse as neither shape.
pub fn parse_snapshot(raw: &[u8]) -> Result<State> {
    let payload = match serde_json::from_slice::<SnapshotPayload>(raw) {
        Ok(payload) => payload,
        Err(object_err) => match serde_json::from_slice::<Vec<WindowPayload>>(raw) {
            Ok(windows) => SnapshotPayload {
                workspaces: Vec::new(),
                windows,
            },
            Err(_) => return Err(Error::Decode(object_err)),
        },
    };

    let workspaces = payload
        .workspaces
        .into_iter()
        .map(|workspace| Workspace {
            id: value_as_string(&workspace.id).unwrap_or_default(),
            index: workspace.index,
            name: value_as_string(&workspace.name),
        })
        .collect();

    let windows = payload
        .windows
        .into_iter()
        .map(|window| {
            let app_id = value_as_string(&window.app_id).unwrap_or_default();
            Window {
                key: format!("w:{app_id}:{}", window.id),
                app_id,
                workspace_id: value_as_string(&window.workspace_id).unwrap_or_default(),
                title: window.title,
                pid: window.pid,
                terminal: None,
            }
        })
        .collect();

    Ok(normalize(&State {
        workspaces,
        windows,
    }))
}

/// Coerce an id-ish JSON value to a string; `null` and `""` become absent.
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_f64().map(|f| format!("{f:.0}"))),
        other => Some(other.to_string()),
    }
}

/// Runs a compositor shell command and captures its stdout.
pub trait CommandRunner: Send + Sync {
    /// Run the command line, returning stdout on success.
    fn run(&self, command: &str) -> Result<Vec<u8>>;
}

/// [`CommandRunner`] spawning commands through `sh -lc`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<Vec<u8>> {
        let output = Command::new("sh")
            .arg("-lc")
            .arg(command)
            .output()
            .map_err(|err| Error::CollectorUnavailable(format!("spawn {command:?}: {err}")))?;
        if !output.status.success() {
            return Err(Error::CollectorUnavailable(format!(
                "{command:?} exited with {}",
                output.status
            )));
        }
        Ok(output.stdout)
    }
}

/// The windows command whose output is merged with a workspaces run.
const WINDOWS_COMMAND: &str = "niri msg -j windows";

/// The companion command supplying workspace names and indices.
const WORKSPACES_COMMAND: &str = "niri msg -j workspaces";

/// Snapshotter that runs the configured compositor command through a shell.
///
/// When the configured command is exactly `niri msg -j windows`, a second
/// `niri msg -j workspaces` run is merged in so the captured state carries
/// workspace metadata. Workspaces-run or merge failures fall back to the
/// windows-only payload.
pub struct CommandSnapshotter {
    command: String,
    runner: Box<dyn CommandRunner>,
}

impl CommandSnapshotter {
    /// Snapshotter over the real shell.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_runner(command, Box::new(ShellRunner))
    }

    /// Snapshotter over an injected runner (used by tests).
    #[must_use]
    pub fn with_runner(command: impl Into<String>, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            command: command.into(),
            runner,
        }
    }
}

impl Snapshotter for CommandSnapshotter {
    fn snapshot(&self) -> Result<Vec<u8>> {
        let windows = self.runner.run(&self.command)?;
        if !is_windows_command(&self.command) {
            return Ok(windows);
        }

        let workspaces = match self.runner.run(WORKSPACES_COMMAND) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(error = %err, "workspaces_snapshot_error");
                return Ok(windows);
            }
        };
        match combine_snapshot_payloads(&workspaces, &windows) {
            Ok(combined) => Ok(combined),
            Err(err) => {
                tracing::debug!(error = %err, "workspaces_combine_error");
                Ok(windows)
            }
        }
    }
}

fn is_windows_command(command: &str) -> bool {
    command.trim() == WINDOWS_COMMAND
}

/// Merge bare workspaces and windows arrays into one combined payload.
fn combine_snapshot_payloads(workspaces: &[u8], windows: &[u8]) -> Result<Vec<u8>> {
    let workspaces: Vec<Value> = serde_json::from_slice(workspaces)?;
    let windows: Vec<Value> = serde_json::from_slice(windows)?;
    Ok(serde_json::to_vec(&serde_json::json!({
        "workspaces": workspaces,
        "windows": windows,
    }))?)
}

/// Snapshotter that reads a fixture file instead of the live compositor.
#[derive(Debug, Clone)]
pub struct FileSnapshotter {
    /// Path to the fixture blob.
    pub path: PathBuf,
}

impl Snapshotter for FileSnapshotter {
    fn snapshot(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|err| {
            Error::CollectorUnavailable(format!("read {}: {err}", self.path.display()))
        })
    }
}
