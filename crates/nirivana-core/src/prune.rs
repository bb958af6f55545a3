//! Age-based retention that preserves replayability of the kept window.
//!
//! Pruning keeps every event with `ts ≥ cutoff` plus at most one *anchor* —
//! the newest pruned event — prepended before the kept tail, so any query
//! `at(T)` for T inside the retained window still sees the latest
//! pre-cutoff state. Snapshots keep the newest overall plus the newest at
//! or before the cutoff. The events file is rewritten atomically
//! (`.tmp` then rename) and never partially truncated.
//!
//! The pruner refuses to run while the writer lock is held.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::events::{Event, EVENTS_FILE, LOCK_FILE, META_DIR};
use crate::snapshots::SNAPSHOTS_DIR;

/// Retention pruner over one state directory.
pub struct Pruner {
    root: PathBuf,
    days: i64,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send>,
}

/// What one prune run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    /// Valid events dropped from the log.
    pub events_pruned: usize,
    /// Snapshot files deleted.
    pub snapshots_pruned: usize,
}

impl Pruner {
    /// Build a pruner retaining `days` of history.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, days: i64) -> Self {
        Self {
            root: root.into(),
            days,
            now_fn: Box::new(Utc::now),
        }
    }

    /// Replace the clock (used by tests for deterministic cutoffs).
    #[must_use]
    pub fn with_now(mut self, now_fn: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.now_fn = Box::new(now_fn);
        self
    }

    /// Run one prune pass.
    ///
    /// Fails fast with [`Error::ActiveWriter`] while the writer lock exists;
    /// nothing is touched in that case.
    pub fn run(&self) -> Result<PruneSummary> {
        let lock_path = self.root.join(META_DIR).join(LOCK_FILE);
        if lock_path.exists() {
            return Err(Error::ActiveWriter(lock_path.display().to_string()));
        }

        let cutoff = (self.now_fn)() - Duration::days(self.days);
        let events_pruned = self.prune_events(cutoff)?;
        let snapshots_pruned = self.prune_snapshots(cutoff)?;

        tracing::info!(
            events_pruned,
            snapshots_pruned,
            cutoff = %cutoff,
            "prune_complete"
        );
        Ok(PruneSummary {
            events_pruned,
            snapshots_pruned,
        })
    }

    fn prune_events(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let events_path = self.root.join(EVENTS_FILE);
        let file = match File::open(&events_path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut total_valid = 0usize;
        let mut anchor: Option<Event> = None;
        let mut kept = Vec::new();
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
            total_valid += 1;
            if event.ts < cutoff {
                // The newest pruned event becomes the anchor.
                anchor = Some(event);
            } else {
                kept.push(event);
            }
        }

        if let Some(anchor) = anchor {
            kept.insert(0, anchor);
        }

        rewrite_events(&events_path, &kept)?;
        Ok(total_valid.saturating_sub(kept.len()))
    }

    fn prune_snapshots(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let dir = self.root.join(SNAPSHOTS_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut all: Vec<(i64, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(ts) = name
                .strip_suffix(".json")
                .and_then(|stem| stem.parse::<i64>().ok())
            else {
                continue;
            };
            all.push((ts, entry.path()));
        }
        if all.is_empty() {
            return Ok(0);
        }
        all.sort_by_key(|(ts, _)| *ts);

        // Keep the newest overall, plus the newest at or before the cutoff.
        let mut keep: Vec<&Path> = vec![all[all.len() - 1].1.as_path()];
        if let Some((_, path)) = all
            .iter()
            .rev()
            .find(|(ts, _)| *ts <= cutoff.timestamp())
        {
            if !keep.contains(&path.as_path()) {
                keep.push(path.as_path());
            }
        }

        let mut pruned = 0;
        for (_, path) in &all {
            if keep.contains(&path.as_path()) {
                continue;
            }
            std::fs::remove_file(path)?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

/// Rewrite the events file atomically with the kept events.
fn rewrite_events(path: &Path, kept: &[Event]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = File::create(&tmp)?;
        for event in kept {
            let mut payload = serde_json::to_vec(event)?;
            payload.push(b'\n');
            file.write_all(&payload)?;
        }
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventStore, EventType, EVENT_VERSION};
    use crate::patch::{PatchOp, WindowPatch};
    use crate::replay::Engine;
    use crate::snapshots::{Snapshot, SnapshotStore};
    use crate::state::State;

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn now() -> DateTime<Utc> {
        ts("2026-03-01T00:00:00Z")
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    fn title_event(at: DateTime<Utc>, key: &str, title: &str) -> Event {
        Event {
            v: EVENT_VERSION,
            ts: at,
            host: "local".to_string(),
            profile: "default".to_string(),
            event_type: EventType::WindowPatch,
            window_key: Some(key.to_string()),
            patch: Some(WindowPatch::from_ops(vec![PatchOp::Title(
                title.to_string(),
            )])),
            state: None,
            source: None,
            state_hash: "sha256:abc".to_string(),
        }
    }

    fn append_all(root: &Path, events: &[Event]) {
        let store = EventStore::new(root).unwrap();
        let mut writer = store.acquire_writer().unwrap();
        for event in events {
            writer.append(event).unwrap();
        }
        writer.close().unwrap();
    }

    fn pruner(root: &Path, days: i64) -> Pruner {
        Pruner::new(root, days).with_now(now)
    }

    #[test]
    fn keeps_anchor_plus_recent_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        append_all(
            dir.path(),
            &[
                title_event(days_ago(50), "w-1", "old"),
                title_event(days_ago(31), "w-1", "anchor"),
                title_event(days_ago(5), "w-1", "recent"),
            ],
        );

        let summary = pruner(dir.path(), 30).run().unwrap();
        assert_eq!(summary.events_pruned, 1);

        let store = EventStore::new(dir.path()).unwrap();
        let (events, _) = store.read_since(0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ts, days_ago(31));
        assert_eq!(events[1].ts, days_ago(5));

        let engine = Engine::new(dir.path()).unwrap();
        let state = engine.at(now()).unwrap();
        assert_eq!(
            state.windows[0].title.as_deref(),
            Some("recent")
        );
    }

    #[test]
    fn replay_inside_retained_window_is_stable() {
        let dir = tempfile::TempDir::new().unwrap();
        append_all(
            dir.path(),
            &[
                title_event(days_ago(50), "w-1", "a"),
                title_event(days_ago(40), "w-1", "b"),
                title_event(days_ago(10), "w-1", "c"),
            ],
        );

        let engine = Engine::new(dir.path()).unwrap();
        let before_at_20 = engine.at(days_ago(20)).unwrap();
        let before_now = engine.at(now()).unwrap();

        pruner(dir.path(), 30).run().unwrap();

        assert_eq!(engine.at(days_ago(20)).unwrap(), before_at_20);
        assert_eq!(engine.at(now()).unwrap(), before_now);
    }

    #[test]
    fn refuses_to_run_with_active_writer() {
        let dir = tempfile::TempDir::new().unwrap();
        append_all(dir.path(), &[title_event(days_ago(50), "w-1", "a")]);

        let store = EventStore::new(dir.path()).unwrap();
        let writer = store.acquire_writer().unwrap();
        let err = pruner(dir.path(), 30).run().unwrap_err();
        assert!(matches!(err, Error::ActiveWriter(_)));

        // Nothing was touched.
        let (events, _) = store.read_since(0).unwrap();
        assert_eq!(events.len(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn missing_files_prune_to_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let summary = pruner(dir.path(), 30).run().unwrap();
        assert_eq!(summary, PruneSummary::default());
    }

    #[test]
    fn invalid_lines_are_dropped_by_rewrite() {
        let dir = tempfile::TempDir::new().unwrap();
        append_all(dir.path(), &[title_event(days_ago(5), "w-1", "a")]);
        {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(dir.path().join(EVENTS_FILE))
                .unwrap();
            file.write_all(b"{garbage}\n").unwrap();
        }

        let summary = pruner(dir.path(), 30).run().unwrap();
        assert_eq!(summary.events_pruned, 0);

        let store = EventStore::new(dir.path()).unwrap();
        let (events, _) = store.read_since(0).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn snapshot_pruning_keeps_newest_and_anchor() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        for days in [50, 35, 10, 2] {
            store
                .write(&Snapshot {
                    v: 1,
                    created_at: days_ago(days),
                    host: "local".to_string(),
                    profile: "default".to_string(),
                    last_event_offset: 0,
                    state_hash: "sha256:abc".to_string(),
                    state: State::default(),
                })
                .unwrap();
        }

        let summary = pruner(dir.path(), 30).run().unwrap();
        assert_eq!(summary.snapshots_pruned, 2);

        let mut remaining: Vec<String> = std::fs::read_dir(dir.path().join(SNAPSHOTS_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        let expected = {
            let mut v = vec![
                format!("{}.json", days_ago(35).timestamp()),
                format!("{}.json", days_ago(2).timestamp()),
            ];
            v.sort();
            v
        };
        assert_eq!(remaining, expected);
    }

    #[test]
    fn rewrite_leaves_no_tmp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        append_all(dir.path(), &[title_event(days_ago(50), "w-1", "a")]);
        pruner(dir.path(), 30).run().unwrap();
        assert!(!dir.path().join("events.jsonl.tmp").exists());
    }
}
