//! Sparse per-window patches: the typed form of the on-disk patch map.
//!
//! On disk a patch is a sparse JSON object keyed by
//! `{app_id, workspace_id, title, pid, terminal, deleted}` where a missing
//! key means "unchanged". In memory the patch is a tagged sum — one
//! [`PatchOp`] variant per field plus `Delete` — so no untyped map crosses
//! the crate's public boundary. Serialization lowers the ops to the sparse
//! map; deserialization lifts the map back, ignoring unknown keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::state::{Terminal, Window, normalize_terminal};

/// A single field update within a window patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Set the window's application id.
    AppId(String),
    /// Set the window's workspace id.
    WorkspaceId(String),
    /// Set the window title; an empty string clears it.
    Title(String),
    /// Set the window's client pid.
    Pid(i64),
    /// Replace the terminal attachment wholesale; `None` clears it.
    Terminal(Option<Terminal>),
    /// Remove the window.
    Delete,
}

impl PatchOp {
    fn key(&self) -> &'static str {
        match self {
            Self::AppId(_) => "app_id",
            Self::WorkspaceId(_) => "workspace_id",
            Self::Title(_) => "title",
            Self::Pid(_) => "pid",
            Self::Terminal(_) => "terminal",
            Self::Delete => "deleted",
        }
    }
}

/// An ordered set of field updates applied to one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowPatch {
    ops: Vec<PatchOp>,
}

impl WindowPatch {
    /// Create an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch from a list of ops.
    #[must_use]
    pub fn from_ops(ops: Vec<PatchOp>) -> Self {
        Self { ops }
    }

    /// Append an op.
    pub fn push(&mut self, op: PatchOp) {
        self.ops.push(op);
    }

    /// The ops in serialization order.
    #[must_use]
    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    /// True when the patch carries no ops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True when the patch removes the window.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, PatchOp::Delete))
    }

    /// Merge this patch into a window map keyed by window key.
    ///
    /// Applying a delete twice is a no-op the second time, so deletes are
    /// idempotent. Non-delete ops upsert the window, creating it when the
    /// key is unknown.
    pub fn apply(&self, windows: &mut BTreeMap<String, Window>, key: &str) {
        if self.is_delete() {
            windows.remove(key);
            return;
        }

        let window = windows.entry(key.to_string()).or_insert_with(|| Window {
            key: key.to_string(),
            ..Window::default()
        });
        for op in &self.ops {
            match op {
                PatchOp::AppId(app_id) => window.app_id = app_id.clone(),
                PatchOp::WorkspaceId(workspace_id) => {
                    window.workspace_id = workspace_id.clone();
                }
                PatchOp::Title(title) => {
                    window.title = if title.is_empty() {
                        None
                    } else {
                        Some(title.clone())
                    };
                }
                PatchOp::Pid(pid) => window.pid = Some(*pid),
                PatchOp::Terminal(terminal) => {
                    window.terminal = terminal
                        .clone()
                        .and_then(normalize_terminal);
                }
                PatchOp::Delete => unreachable!("delete handled above"),
            }
        }
    }
}

impl Serialize for WindowPatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.ops.len()))?;
        for op in &self.ops {
            match op {
                PatchOp::AppId(v) | PatchOp::WorkspaceId(v) | PatchOp::Title(v) => {
                    map.serialize_entry(op.key(), v)?;
                }
                PatchOp::Pid(v) => map.serialize_entry(op.key(), v)?,
                PatchOp::Terminal(v) => map.serialize_entry(op.key(), v)?,
                PatchOp::Delete => map.serialize_entry(op.key(), &true)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WindowPatch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PatchVisitor;

        impl<'de> Visitor<'de> for PatchVisitor {
            type Value = WindowPatch;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sparse window patch map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut patch = WindowPatch::new();
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        "app_id" => {
                            if let Some(v) = as_string(access.next_value()?) {
                                patch.push(PatchOp::AppId(v));
                            }
                        }
                        "workspace_id" => {
                            if let Some(v) = as_string(access.next_value()?) {
                                patch.push(PatchOp::WorkspaceId(v));
                            }
                        }
                        "title" => {
                            if let Some(v) = as_string(access.next_value()?) {
                                patch.push(PatchOp::Title(v));
                            }
                        }
                        "pid" => {
                            let value: serde_json::Value = access.next_value()?;
                            if let Some(pid) = value.as_i64() {
                                patch.push(PatchOp::Pid(pid));
                            }
                        }
                        "terminal" => {
                            let value: serde_json::Value = access.next_value()?;
                            let terminal = if value.is_null() {
                                None
                            } else {
                                serde_json::from_value::<Terminal>(value)
                                    .ok()
                                    .and_then(normalize_terminal)
                            };
                            patch.push(PatchOp::Terminal(terminal));
                        }
                        "deleted" => {
                            let value: serde_json::Value = access.next_value()?;
                            if value.as_bool() == Some(true) {
                                patch.push(PatchOp::Delete);
                            }
                        }
                        // Unknown keys are ignored so newer producers can
                        // extend the schema without breaking old readers.
                        _ => {
                            let _: serde::de::IgnoredAny = access.next_value()?;
                        }
                    }
                }
                Ok(patch)
            }
        }

        deserializer.deserialize_map(PatchVisitor)
    }
}

/// Accept only JSON strings for string-valued patch keys; anything else is
/// treated as absent.
fn as_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(v) => Some(v),
        _ => None,
    }
}
