//! Canonical in-memory session state and its stable hash.
//!
//! A [`State`] is an unordered collection of workspaces and windows as seen
//! in one compositor snapshot. [`normalize`] produces the deterministic
//! ordering and canonicalization that makes hashing stable:
//!
//! - workspaces sorted by `(index, id)`, windows by `key`
//! - `process_tags` deduplicated and sorted
//! - empty optional strings treated as absent
//!
//! Two states are semantically equal iff their normalized JSON serialization
//! is byte-identical; [`State::hash`] is a pure function of those bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// App ids that receive process-metadata enrichment and terminal-aware
/// restore handling.
pub const TERMINAL_APP_IDS: [&str; 4] = ["kitty", "alacritty", "foot", "wezterm"];

/// Whether an `app_id` names a known terminal emulator.
#[must_use]
pub fn is_terminal_app(app_id: &str) -> bool {
    let normalized = app_id.trim().to_lowercase();
    TERMINAL_APP_IDS.contains(&normalized.as_str())
}

/// One captured session state: workspaces plus windows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Workspaces present in the snapshot.
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
    /// Windows present in the snapshot.
    #[serde(default)]
    pub windows: Vec<Window>,
}

/// A compositor workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Opaque id, unique within a state.
    pub id: String,
    /// Ordering index reported by the compositor.
    #[serde(default)]
    pub index: u32,
    /// Optional human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A compositor window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Opaque key, stable per logical window, unique within a state.
    pub key: String,
    /// Application id reported by the compositor.
    #[serde(default)]
    pub app_id: String,
    /// Id of the workspace this window lives on.
    #[serde(default)]
    pub workspace_id: String,
    /// Window title at capture time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Process id of the window's client, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    /// Enriched terminal metadata; present only for terminal windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<Terminal>,
}

/// Enriched metadata attached to terminal-emulator windows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminal {
    /// Working directory of the most relevant descendant process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Notable child-process tags, deduplicated and sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_tags: Vec<String>,
    /// Multiplexer session name, when resolvable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_tag: Option<String>,
}

impl Terminal {
    /// True when no field carries information; such attachments are dropped
    /// during normalization so they cannot perturb the hash.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cwd.is_none() && self.process_tags.is_empty() && self.session_tag.is_none()
    }
}

/// Collapse an empty-string optional to absent.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Produce the canonical form of a state.
///
/// Idempotent and total: `normalize(normalize(s)) == normalize(s)` for every
/// input. The result upholds the structural invariants the hash depends on.
#[must_use]
pub fn normalize(state: &State) -> State {
    let mut workspaces = state.workspaces.clone();
    for workspace in &mut workspaces {
        workspace.name = non_empty(workspace.name.take());
    }
    workspaces.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));

    let mut windows = state.windows.clone();
    for window in &mut windows {
        window.title = non_empty(window.title.take());
        window.pid = window.pid.filter(|pid| *pid > 0);
        // Windows without an app id never carry a terminal attachment.
        if window.app_id.is_empty() {
            window.terminal = None;
        }
        if let Some(terminal) = window.terminal.take() {
            window.terminal = normalize_terminal(terminal);
        }
    }
    windows.sort_by(|a, b| a.key.cmp(&b.key));

    State {
        workspaces,
        windows,
    }
}

/// Canonicalize a terminal attachment; empty attachments collapse to `None`.
#[must_use]
pub fn normalize_terminal(mut terminal: Terminal) -> Option<Terminal> {
    terminal.cwd = non_empty(terminal.cwd.take());
    terminal.session_tag = non_empty(terminal.session_tag.take());
    terminal.process_tags.retain(|tag| !tag.is_empty());
    terminal.process_tags.sort();
    terminal.process_tags.dedup();
    if terminal.is_empty() {
        None
    } else {
        Some(terminal)
    }
}

impl State {
    /// Canonical `sha256` fingerprint of the normalized state.
    ///
    /// Rendered as `"sha256:" + hex`; equality of hashes defines semantic
    /// equality of states.
    pub fn hash(&self) -> Result<String> {
        let payload = serde_json::to_vec(&normalize(self))?;
        let mut hasher = Sha256::new();
        hasher.update(&payload);
        Ok(format!("sha256:{:x}", hasher.finalize()))
    }
}
