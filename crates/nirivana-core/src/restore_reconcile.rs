//! Post-restore workspace reconciliation.
//!
//! Freshly launched windows land on the focused workspace, not where their
//! originals lived. Given the pre-restore and post-restore states, this
//! module pairs each newly-appeared window whose `app_id` matches a ready
//! plan item with that item's workspace ref — in numerical order of the new
//! window ids — and applies the moves best-effort through an injected
//! [`WindowMover`]. A failed move is recorded and does not abort the rest.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Command;

use crate::error::{Error, Result};
use crate::restore_plan::{Plan, Status, normalize_app_id};
use crate::state::State;

/// One pending workspace move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRequest {
    /// Key of the newly-appeared window.
    pub window_key: String,
    /// Numeric compositor window id parsed from the key.
    pub window_id: i64,
    /// Normalized app id the pairing was made on.
    pub app_id: String,
    /// Target workspace reference.
    pub workspace_ref: String,
}

/// Moves a window to a workspace on the compositor.
pub trait WindowMover: Send + Sync {
    /// Move `window_id` to `workspace_ref`.
    fn move_to_workspace(&self, window_id: i64, workspace_ref: &str) -> Result<()>;
}

/// Pair newly-appeared windows with ready plan items' workspace refs.
#[must_use]
pub fn build_move_requests(plan: &Plan, before: &State, after: &State) -> Vec<MoveRequest> {
    let before_keys: BTreeSet<&str> = before
        .windows
        .iter()
        .map(|window| window.key.as_str())
        .collect();

    let mut ready_targets_by_app: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &plan.items {
        if item.status != Status::Ready {
            continue;
        }
        let workspace_ref = item.workspace_ref.trim();
        if workspace_ref.is_empty() {
            continue;
        }
        ready_targets_by_app
            .entry(normalize_app_id(&item.app_id))
            .or_default()
            .push(workspace_ref.to_string());
    }

    let mut new_windows_by_app: BTreeMap<String, Vec<(i64, String)>> = BTreeMap::new();
    for window in &after.windows {
        if before_keys.contains(window.key.as_str()) {
            continue;
        }
        let app_id = normalize_app_id(&window.app_id);
        if !ready_targets_by_app.contains_key(&app_id) {
            continue;
        }
        new_windows_by_app
            .entry(app_id)
            .or_default()
            .push((window_numeric_id(&window.key), window.key.clone()));
    }
    for windows in new_windows_by_app.values_mut() {
        windows.sort();
    }

    let mut requests = Vec::new();
    for (app_id, targets) in &ready_targets_by_app {
        let Some(windows) = new_windows_by_app.get(app_id) else {
            continue;
        };
        for ((window_id, window_key), workspace_ref) in windows.iter().zip(targets) {
            if *window_id <= 0 {
                continue;
            }
            requests.push(MoveRequest {
                window_key: window_key.clone(),
                window_id: *window_id,
                app_id: app_id.clone(),
                workspace_ref: workspace_ref.clone(),
            });
        }
    }

    requests.sort_by(|a, b| {
        a.workspace_ref
            .cmp(&b.workspace_ref)
            .then_with(|| a.app_id.cmp(&b.app_id))
            .then_with(|| a.window_id.cmp(&b.window_id))
    });
    requests
}

/// Apply moves best-effort; returns how many succeeded.
pub fn apply_move_requests(mover: &dyn WindowMover, requests: &[MoveRequest]) -> usize {
    let mut applied = 0;
    for request in requests {
        match mover.move_to_workspace(request.window_id, &request.workspace_ref) {
            Ok(()) => applied += 1,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    window_key = %request.window_key,
                    workspace_ref = %request.workspace_ref,
                    "workspace_move_failed"
                );
            }
        }
    }
    applied
}

/// Numeric window id from a `w:<app_id>:<id>` key; -1 when absent.
fn window_numeric_id(window_key: &str) -> i64 {
    let mut parts = window_key.split(':');
    let (Some(_), Some(_), Some(last)) = (parts.next(), parts.next(), parts.next_back()) else {
        return -1;
    };
    last.parse().unwrap_or(-1)
}

/// [`WindowMover`] driving niri: focus the window, then move it.
#[derive(Debug, Clone, Default)]
pub struct NiriWindowMover;

impl WindowMover for NiriWindowMover {
    fn move_to_workspace(&self, window_id: i64, workspace_ref: &str) -> Result<()> {
        let workspace_ref = workspace_ref.trim();
        if window_id <= 0 || workspace_ref.is_empty() {
            return Err(Error::ValidationFailed("invalid move request".to_string()));
        }

        run_niri_action("focus-window", &window_id.to_string())?;
        run_niri_action("move-window-to-workspace", workspace_ref)
    }
}

fn run_niri_action(action: &str, arg: &str) -> Result<()> {
    let status = Command::new("niri")
        .args(["msg", "action", action, arg])
        .status()?;
    if !status.success() {
        return Err(Error::Io(std::io::Error::other(format!(
            "niri msg action {action} exited with {status}"
        ))));
    }
    Ok(())
}
