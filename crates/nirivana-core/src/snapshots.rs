//! Periodic full-state snapshots indexed by timestamp.
//!
//! Each snapshot is one JSON object at `snapshots/<unix_seconds>.json`,
//! written atomically (`.tmp` then rename) so readers never observe a torn
//! file. Snapshots are immutable once written. They are a replay
//! accelerator, not a source of truth: `last_event_offset` points just past
//! the last event whose effect is included in `state`, so the replay engine
//! can seed from the snapshot and scan only the tail.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::State;

/// Snapshot directory name inside the state directory.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Schema version accepted by the store.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One full-state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version; always 1.
    pub v: u32,
    /// Capture timestamp, UTC. Also the filename (as unix seconds).
    pub created_at: DateTime<Utc>,
    /// Capturing host.
    pub host: String,
    /// Capture profile.
    pub profile: String,
    /// Byte offset just past the last event included in `state`.
    pub last_event_offset: u64,
    /// Hash of `state`.
    pub state_hash: String,
    /// The full captured state.
    pub state: State,
}

impl Snapshot {
    /// Validate the fields the store requires.
    pub fn validate(&self) -> Result<()> {
        if self.v != SNAPSHOT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "invalid version: {}",
                self.v
            )));
        }
        if self.created_at.timestamp_millis() == 0 {
            return Err(Error::InvalidSnapshot("created_at is required".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::InvalidSnapshot("host is required".to_string()));
        }
        if self.profile.trim().is_empty() {
            return Err(Error::InvalidSnapshot("profile is required".to_string()));
        }
        if self.state_hash.trim().is_empty() {
            return Err(Error::InvalidSnapshot("state_hash is required".to_string()));
        }
        Ok(())
    }
}

/// Snapshot store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating as needed) the snapshot directory under `root`.
    pub fn new(root: &Path) -> Result<Self> {
        let dir = root.join(SNAPSHOTS_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Snapshot directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Validate and write one snapshot atomically. Returns the final path.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        snapshot.validate()?;

        let payload = serde_json::to_vec(snapshot)?;
        let path = self
            .dir
            .join(format!("{}.json", snapshot.created_at.timestamp()));
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &payload)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Read and validate one snapshot file.
    pub fn read(&self, path: &Path) -> Result<Snapshot> {
        let payload = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&payload)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// The snapshot with the maximum `created_at` at or before `at`, or
    /// [`Error::NoSnapshot`] when none exists.
    pub fn load_nearest(&self, at: DateTime<Utc>) -> Result<(Snapshot, PathBuf)> {
        let mut best: Option<(i64, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(ts) = parse_snapshot_unix(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            if ts <= at.timestamp() && best.as_ref().is_none_or(|(b, _)| ts > *b) {
                best = Some((ts, entry.path()));
            }
        }

        let Some((_, path)) = best else {
            return Err(Error::NoSnapshot);
        };
        let snapshot = self.read(&path)?;
        Ok((snapshot, path))
    }
}

/// Whether the cadence calls for a snapshot after `total_events` appended
/// events.
#[must_use]
pub fn should_snapshot(total_events: u64, cadence: u64) -> bool {
    total_events > 0 && cadence > 0 && total_events % cadence == 0
}

/// Parse a snapshot filename (`<unix_seconds>.json`) into its timestamp.
fn parse_snapshot_unix(name: &str) -> Option<i64> {
    name.strip_suffix(".json")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            v: SNAPSHOT_VERSION,
            created_at: at,
            host: "local".to_string(),
            profile: "default".to_string(),
            last_event_offset: 512,
            state_hash: "sha256:abc".to_string(),
            state: State::default(),
        }
    }

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let snapshot = sample_snapshot(ts("2026-01-02T03:04:05Z"));

        let path = store.write(&snapshot).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}.json", snapshot.created_at.timestamp())
        );
        assert_eq!(store.read(&path).unwrap(), snapshot);
    }

    #[test]
    fn write_leaves_no_tmp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        store.write(&sample_snapshot(ts("2026-01-02T03:04:05Z"))).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn load_nearest_picks_latest_at_or_before() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        store.write(&sample_snapshot(ts("2026-01-01T00:00:00Z"))).unwrap();
        store.write(&sample_snapshot(ts("2026-01-02T00:00:00Z"))).unwrap();
        store.write(&sample_snapshot(ts("2026-01-03T00:00:00Z"))).unwrap();

        let (snapshot, _) = store.load_nearest(ts("2026-01-02T12:00:00Z")).unwrap();
        assert_eq!(snapshot.created_at, ts("2026-01-02T00:00:00Z"));

        // Exactly-at is inclusive.
        let (snapshot, _) = store.load_nearest(ts("2026-01-02T00:00:00Z")).unwrap();
        assert_eq!(snapshot.created_at, ts("2026-01-02T00:00:00Z"));
    }

    #[test]
    fn load_nearest_without_candidates_is_no_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.load_nearest(ts("2026-01-01T00:00:00Z")),
            Err(Error::NoSnapshot)
        ));

        store.write(&sample_snapshot(ts("2026-06-01T00:00:00Z"))).unwrap();
        assert!(matches!(
            store.load_nearest(ts("2026-01-01T00:00:00Z")),
            Err(Error::NoSnapshot)
        ));
    }

    #[test]
    fn load_nearest_ignores_unrelated_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"x").unwrap();
        std::fs::write(store.dir().join("not-a-number.json"), b"{}").unwrap();
        store.write(&sample_snapshot(ts("2026-01-01T00:00:00Z"))).unwrap();

        let (snapshot, _) = store.load_nearest(ts("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(snapshot.created_at, ts("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn read_rejects_invalid_snapshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let path = store.dir().join("1.json");
        std::fs::write(&path, br#"{"v":2,"created_at":"2026-01-01T00:00:00Z","host":"h","profile":"p","last_event_offset":0,"state_hash":"x","state":{}}"#).unwrap();
        assert!(matches!(
            store.read(&path),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn should_snapshot_truth_table() {
        assert!(!should_snapshot(0, 2));
        assert!(!should_snapshot(5, 0));
        assert!(!should_snapshot(3, 2));
        assert!(should_snapshot(2, 2));
        assert!(should_snapshot(100, 100));
        assert!(should_snapshot(200, 100));
    }
}
