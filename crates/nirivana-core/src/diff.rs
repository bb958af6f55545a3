//! Sparse per-window diffing between two normalized states.
//!
//! `diff(before, after)` short-circuits on equal hashes, then walks the
//! sorted union of window keys emitting one patch per changed window:
//! a full field snapshot for new windows, `deleted` for removed ones, and a
//! sparse map of only the changed fields otherwise. Terminal-attachment
//! equality compares `cwd`, `session_tag`, and the ordered `process_tags`;
//! nil vs non-nil counts as a change.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::patch::{PatchOp, WindowPatch};
use crate::state::{State, Window, normalize};

/// One window's patch, addressed by key.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Key of the window the patch applies to.
    pub window_key: String,
    /// The sparse field updates.
    pub fields: WindowPatch,
}

/// Compute the patches turning `before` into `after`.
///
/// Returns `(patches, changed)`; `changed` is false exactly when the states
/// hash identically, in which case no patches are emitted.
pub fn diff(before: &State, after: &State) -> Result<(Vec<Patch>, bool)> {
    if before.hash()? == after.hash()? {
        return Ok((Vec::new(), false));
    }

    let before = normalize(before);
    let after = normalize(after);

    let before_by_key: BTreeMap<&str, &Window> = before
        .windows
        .iter()
        .map(|window| (window.key.as_str(), window))
        .collect();
    let after_by_key: BTreeMap<&str, &Window> = after
        .windows
        .iter()
        .map(|window| (window.key.as_str(), window))
        .collect();

    let mut keys: Vec<&str> = before_by_key.keys().copied().collect();
    for key in after_by_key.keys() {
        if !before_by_key.contains_key(key) {
            keys.push(key);
        }
    }
    keys.sort_unstable();

    let mut patches = Vec::new();
    for key in keys {
        match (before_by_key.get(key), after_by_key.get(key)) {
            (None, Some(window)) => patches.push(Patch {
                window_key: key.to_string(),
                fields: new_window_patch(window),
            }),
            (Some(_), None) => patches.push(Patch {
                window_key: key.to_string(),
                fields: WindowPatch::from_ops(vec![PatchOp::Delete]),
            }),
            (Some(before_window), Some(after_window)) => {
                let fields = diff_window_fields(before_window, after_window);
                if !fields.is_empty() {
                    patches.push(Patch {
                        window_key: key.to_string(),
                        fields,
                    });
                }
            }
            (None, None) => unreachable!("key came from one of the maps"),
        }
    }

    let changed = !patches.is_empty();
    Ok((patches, changed))
}

/// Full field snapshot for a freshly-appeared window.
fn new_window_patch(window: &Window) -> WindowPatch {
    WindowPatch::from_ops(vec![
        PatchOp::AppId(window.app_id.clone()),
        PatchOp::WorkspaceId(window.workspace_id.clone()),
        PatchOp::Title(window.title.clone().unwrap_or_default()),
        PatchOp::Terminal(window.terminal.clone()),
    ])
}

/// Sparse field updates for a window present on both sides.
fn diff_window_fields(before: &Window, after: &Window) -> WindowPatch {
    let mut patch = WindowPatch::new();
    if before.app_id != after.app_id {
        patch.push(PatchOp::AppId(after.app_id.clone()));
    }
    if before.workspace_id != after.workspace_id {
        patch.push(PatchOp::WorkspaceId(after.workspace_id.clone()));
    }
    if before.title != after.title {
        patch.push(PatchOp::Title(after.title.clone().unwrap_or_default()));
    }
    if before.pid != after.pid {
        if let Some(pid) = after.pid {
            patch.push(PatchOp::Pid(pid));
        }
    }
    if before.terminal != after.terminal {
        patch.push(PatchOp::Terminal(after.terminal.clone()));
    }
    patch
}
