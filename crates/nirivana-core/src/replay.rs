//! State reconstruction from snapshot plus event tail.
//!
//! `at(T)` reconstructs "the result of applying all events with `ts ≤ T` in
//! file order, starting from the nearest snapshot at or before T (or the
//! empty state)". The timestamp bound is inclusive. Snapshot presence
//! changes performance, never semantics: the two file families are
//! independent, so corruption in one does not block the other.
//!
//! Replay is deliberately tolerant where the append path is strict:
//! malformed or validation-failing lines are skipped silently (out-of-band
//! writes, torn tails), as are events beyond T — a retry at a future T may
//! include them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::events::{Event, EventType, EVENTS_FILE};
use crate::snapshots::SnapshotStore;
use crate::state::{State, Window, normalize};

/// Replay engine over one state directory.
#[derive(Debug, Clone)]
pub struct Engine {
    events_path: PathBuf,
    snapshots: SnapshotStore,
}

impl Engine {
    /// Open the engine over `root`.
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            events_path: root.join(EVENTS_FILE),
            snapshots: SnapshotStore::new(root)?,
        })
    }

    /// Reconstruct the state as it existed at `at` (inclusive).
    pub fn at(&self, at: DateTime<Utc>) -> Result<State> {
        let mut state = State::default();
        let mut cursor = 0u64;

        match self.snapshots.load_nearest(at) {
            Ok((snapshot, _)) => {
                cursor = snapshot.last_event_offset;
                state = snapshot.state;
            }
            Err(Error::NoSnapshot) => {}
            Err(err) => return Err(err),
        }

        let file = match File::open(&self.events_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(normalize(&state));
            }
            Err(err) => return Err(err.into()),
        };

        let mut windows: BTreeMap<String, Window> = state
            .windows
            .drain(..)
            .map(|window| (window.key.clone(), window))
            .collect();

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(cursor))?;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let Ok(event) = serde_json::from_str::<Event>(line.trim_end_matches('\n')) else {
                continue;
            };
            if event.validate().is_err() {
                continue;
            }
            if event.ts > at {
                continue;
            }
            match event.event_type {
                EventType::WindowPatch => {
                    if let (Some(key), Some(patch)) = (&event.window_key, &event.patch) {
                        patch.apply(&mut windows, key);
                    }
                }
                EventType::StateFull => {
                    if let Some(full) = event.state {
                        state.workspaces = full.workspaces;
                        windows = full
                            .windows
                            .into_iter()
                            .map(|window| (window.key.clone(), window))
                            .collect();
                    }
                }
            }
        }

        state.windows = windows.into_values().collect();
        Ok(normalize(&state))
    }

    /// List all valid events in file order, optionally bounded by an
    /// inclusive time range. Malformed lines are skipped.
    pub fn list_events(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>> {
        let file = match File::open(&self.events_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let Ok(event) = serde_json::from_str::<Event>(line.trim_end_matches('\n')) else {
                continue;
            };
            if event.validate().is_err() {
                continue;
            }
            if from.is_some_and(|from| event.ts < from) {
                continue;
            }
            if to.is_some_and(|to| event.ts > to) {
                continue;
            }
            out.push(event);
        }

        Ok(out)
    }
}
