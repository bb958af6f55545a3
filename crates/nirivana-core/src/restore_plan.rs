//! Restore planning: classify each replayed window into an action.
//!
//! The planner never touches the compositor and never fails — every window
//! yields exactly one [`PlanItem`] whose status is `ready`, `skipped`, or
//! `degraded`, with failure conditions expressed as reasons. Execution is
//! delegated to [`crate::restore_exec`].
//!
//! Terminal windows are restored through the configured terminal binary,
//! optionally attaching or creating the multiplexer session; other windows
//! go through the app allowlist. Each item carries a `workspace_ref`
//! suitable for the compositor: the workspace name when present, else its
//! 1-based index, else the raw id — and when the state carries no workspace
//! metadata at all, compact 1-based indices are derived from the numerically
//! sorted distinct workspace ids observed on windows.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::state::{State, Window, is_terminal_app};

/// Restore status of a plan item or execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// A concrete restore command is available.
    Ready,
    /// Nothing will be done for this window.
    Skipped,
    /// A partial restore command is available.
    Degraded,
    /// Execution was attempted and failed.
    Failed,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Skipped => write!(f, "skipped"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Restore mode for an allowlisted app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// Launch once per captured window.
    #[default]
    PerWindow,
    /// Launch only for the first captured window of the app.
    Oneshot,
}

/// Terminal restore settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalRestoreConfig {
    /// Terminal binary used for terminal-window restore commands.
    pub command: String,
    /// Attach to (or create) the captured zellij session when a session tag
    /// is available.
    pub zellij_attach_or_create: bool,
}

impl Default for TerminalRestoreConfig {
    fn default() -> Self {
        Self {
            command: "kitty".to_string(),
            zellij_attach_or_create: true,
        }
    }
}

/// Planner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Normalized `app_id` → restore command template.
    #[serde(default)]
    pub app_allowlist: BTreeMap<String, String>,
    /// Normalized `app_id` → restore mode.
    #[serde(default)]
    pub app_mode: BTreeMap<String, AppMode>,
    /// Terminal restore settings.
    #[serde(default)]
    pub terminal: TerminalRestoreConfig,
}

/// One window's planned restore action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    /// Key of the window the item restores.
    pub window_key: String,
    /// Compositor-facing workspace reference.
    pub workspace_ref: String,
    /// The window's app id.
    pub app_id: String,
    /// Classification outcome.
    pub status: Status,
    /// Why the item is not plainly ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Restore command for ready (and partially for degraded) items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// The full restore plan for one state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// One item per window, in state order.
    pub items: Vec<PlanItem>,
}

/// Classifies windows into restore actions.
#[derive(Debug, Clone)]
pub struct Planner {
    allowlist: BTreeMap<String, String>,
    app_mode: BTreeMap<String, AppMode>,
    terminal: TerminalRestoreConfig,
}

impl Planner {
    /// Build a planner, normalizing allowlist and mode keys.
    #[must_use]
    pub fn new(config: PlannerConfig) -> Self {
        let mut terminal = config.terminal;
        if terminal.command.trim().is_empty() {
            terminal.command = "kitty".to_string();
        }
        let allowlist = config
            .app_allowlist
            .into_iter()
            .map(|(app_id, command)| (normalize_app_id(&app_id), command.trim().to_string()))
            .collect();
        let app_mode = config
            .app_mode
            .into_iter()
            .map(|(app_id, mode)| (normalize_app_id(&app_id), mode))
            .collect();
        Self {
            allowlist,
            app_mode,
            terminal,
        }
    }

    /// Build the plan for a state. Total: one item per window.
    #[must_use]
    pub fn build(&self, state: &State) -> Plan {
        let workspace_refs = workspace_refs_by_id(state);
        let mut oneshot_seen: BTreeSet<String> = BTreeSet::new();

        let mut items = Vec::with_capacity(state.windows.len());
        for window in &state.windows {
            let workspace_ref = workspace_refs
                .get(window.workspace_id.trim())
                .cloned()
                .unwrap_or_else(|| window.workspace_id.clone());

            let mut item = if is_terminal_app(&window.app_id) {
                self.plan_terminal(window, workspace_ref)
            } else {
                let mut item = self.plan_app(window, workspace_ref);
                if self.app_mode(&window.app_id) == AppMode::Oneshot && item.status == Status::Ready
                {
                    let app_id = normalize_app_id(&window.app_id);
                    if !oneshot_seen.insert(app_id) {
                        item.status = Status::Skipped;
                        item.reason = Some("oneshot app already scheduled".to_string());
                        item.command = None;
                    }
                }
                item
            };
            if item.status == Status::Ready {
                item.reason = None;
            }
            items.push(item);
        }

        Plan { items }
    }

    fn app_mode(&self, app_id: &str) -> AppMode {
        self.app_mode
            .get(&normalize_app_id(app_id))
            .copied()
            .unwrap_or_default()
    }

    fn plan_terminal(&self, window: &Window, workspace_ref: String) -> PlanItem {
        let mut item = PlanItem {
            window_key: window.key.clone(),
            workspace_ref,
            app_id: window.app_id.clone(),
            status: Status::Skipped,
            reason: None,
            command: None,
        };

        let Some(terminal) = &window.terminal else {
            item.reason = Some("missing terminal metadata".to_string());
            return item;
        };
        let cwd = terminal.cwd.as_deref().map(str::trim).unwrap_or("");
        let session_tag = terminal.session_tag.as_deref().map(str::trim).unwrap_or("");
        if cwd.is_empty() && session_tag.is_empty() {
            item.reason = Some("missing terminal metadata".to_string());
            return item;
        }

        let mut command = self.terminal.command.trim().to_string();
        if !cwd.is_empty() {
            command = format!("{command} --directory {cwd:?}");
        }
        if self.terminal.zellij_attach_or_create && !session_tag.is_empty() {
            let attach = format!("zellij attach {session_tag} || zellij -s {session_tag}");
            command = format!("{command} -e sh -lc {attach:?}");
        }
        item.command = Some(command);

        if cwd.is_empty() {
            item.status = Status::Degraded;
            item.reason = Some("missing terminal cwd".to_string());
            return item;
        }
        if self.terminal.zellij_attach_or_create && session_tag.is_empty() {
            item.status = Status::Degraded;
            item.reason = Some("missing terminal session tag".to_string());
            return item;
        }

        item.status = Status::Ready;
        item
    }

    fn plan_app(&self, window: &Window, workspace_ref: String) -> PlanItem {
        let mut item = PlanItem {
            window_key: window.key.clone(),
            workspace_ref,
            app_id: window.app_id.clone(),
            status: Status::Skipped,
            reason: None,
            command: None,
        };
        match self.allowlist.get(&normalize_app_id(&window.app_id)) {
            None => {
                item.reason = Some("app not allowlisted".to_string());
            }
            Some(command) if command.is_empty() => {
                item.reason = Some("allowlist command is empty".to_string());
            }
            Some(command) => {
                item.status = Status::Ready;
                item.command = Some(command.clone());
            }
        }
        item
    }
}

/// Normalize an app id for allowlist/mode lookups.
#[must_use]
pub fn normalize_app_id(app_id: &str) -> String {
    app_id.trim().to_lowercase()
}

/// Compositor-facing refs for every workspace id referenced by the state.
fn workspace_refs_by_id(state: &State) -> BTreeMap<String, String> {
    let mut refs = BTreeMap::new();
    for workspace in &state.workspaces {
        let id = workspace.id.trim();
        if id.is_empty() {
            continue;
        }
        let name = workspace.name.as_deref().map(str::trim).unwrap_or("");
        let reference = if !name.is_empty() {
            name.to_string()
        } else if workspace.index > 0 {
            workspace.index.to_string()
        } else {
            id.to_string()
        };
        refs.insert(id.to_string(), reference);
    }

    if refs.is_empty() {
        return infer_workspace_refs_from_windows(state);
    }

    // Windows referencing workspaces the state doesn't describe fall back
    // to the raw id.
    for window in &state.windows {
        let id = window.workspace_id.trim();
        if !id.is_empty() {
            refs.entry(id.to_string()).or_insert_with(|| id.to_string());
        }
    }

    refs
}

/// With no workspace metadata, derive compact 1-based indices from the
/// numerically sorted distinct workspace ids observed on windows.
fn infer_workspace_refs_from_windows(state: &State) -> BTreeMap<String, String> {
    let mut refs = BTreeMap::new();
    let mut numeric = BTreeSet::new();
    for window in &state.windows {
        let raw = window.workspace_id.trim();
        if raw.is_empty() || refs.contains_key(raw) {
            continue;
        }
        match raw.parse::<i64>() {
            Ok(id) => {
                numeric.insert((id, raw.to_string()));
            }
            Err(_) => {
                refs.insert(raw.to_string(), raw.to_string());
            }
        }
    }

    for (position, (_, raw)) in numeric.into_iter().enumerate() {
        refs.entry(raw).or_insert_with(|| (position + 1).to_string());
    }

    refs
}
