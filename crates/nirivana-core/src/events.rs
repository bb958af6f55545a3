//! Append-only event log with an exclusive writer lock.
//!
//! On-disk layout inside a state directory:
//!
//! ```text
//! events.jsonl   # one event per line, newline-terminated JSON
//! meta/lock      # exclusive writer lock file (holds the owner pid)
//! ```
//!
//! At most one writer holds the lock at a time, process- and host-wide; the
//! lock is a plain file created exclusively so other processes (including
//! the retention pruner) can observe it by existence alone. Readers never
//! take the lock and tolerate concurrent appends — a scan stops cleanly at
//! end-of-file. Events are appended atomically at line granularity, and the
//! byte offset returned from an append is a valid cursor for a subsequent
//! [`EventStore::read_since`].

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::patch::WindowPatch;
use crate::state::State;

/// Event log filename inside the state directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Writer lock path components inside the state directory.
pub const LOCK_FILE: &str = "lock";

/// Metadata directory holding the lock file.
pub const META_DIR: &str = "meta";

/// Schema version accepted by the append path.
pub const EVENT_VERSION: u32 = 1;

/// The kind of mutation an event carries.
///
/// The capture runner emits only `window_patch` events. `state_full` is an
/// externally-produced event type (bootstrap or alternative producers); the
/// replay engine honors it by replacing its in-memory state wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Sparse per-window patch.
    WindowPatch,
    /// Full-state replacement.
    StateFull,
}

/// One captured mutation, as persisted on a log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Schema version; always 1.
    pub v: u32,
    /// Capture timestamp, UTC. Persisted as produced; monotonicity is not
    /// required.
    pub ts: DateTime<Utc>,
    /// Capturing host.
    pub host: String,
    /// Capture profile.
    pub profile: String,
    /// Mutation kind.
    pub event_type: EventType,
    /// Key of the patched window (`window_patch` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_key: Option<String>,
    /// Sparse patch payload (`window_patch` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<WindowPatch>,
    /// Full-state payload (`state_full` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    /// Producer identity, e.g. `capture.cli`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Hash of the full state produced by applying this event to its
    /// predecessor.
    pub state_hash: String,
}

impl Event {
    /// Validate the fields the append path requires.
    pub fn validate(&self) -> Result<()> {
        if self.v != EVENT_VERSION {
            return Err(Error::InvalidEvent(format!("invalid version: {}", self.v)));
        }
        if self.ts.timestamp_millis() == 0 {
            return Err(Error::InvalidEvent("ts is required".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::InvalidEvent("host is required".to_string()));
        }
        if self.profile.trim().is_empty() {
            return Err(Error::InvalidEvent("profile is required".to_string()));
        }
        if self.state_hash.trim().is_empty() {
            return Err(Error::InvalidEvent("state_hash is required".to_string()));
        }
        match self.event_type {
            EventType::WindowPatch => {
                if self.window_key.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(Error::InvalidEvent(
                        "window_key is required for window_patch".to_string(),
                    ));
                }
                if self.patch.is_none() || self.state.is_some() {
                    return Err(Error::InvalidEvent(
                        "window_patch carries exactly a patch".to_string(),
                    ));
                }
            }
            EventType::StateFull => {
                if self.state.is_none() || self.patch.is_some() {
                    return Err(Error::InvalidEvent(
                        "state_full carries exactly a state".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The event log store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct EventStore {
    events_path: PathBuf,
    lock_path: PathBuf,
}

impl EventStore {
    /// Open (creating as needed) the event log under `root`.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join(META_DIR))?;
        let events_path = root.join(EVENTS_FILE);
        if !events_path.exists() {
            std::fs::write(&events_path, b"")?;
        }
        Ok(Self {
            events_path,
            lock_path: root.join(META_DIR).join(LOCK_FILE),
        })
    }

    /// Path of the events file.
    #[must_use]
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Acquire the exclusive writer.
    ///
    /// Fails with [`Error::Locked`] when another writer holds the lock. The
    /// returned writer removes the lock when closed or dropped, so a
    /// cancelled tick cannot leak it.
    pub fn acquire_writer(&self) -> Result<EventWriter> {
        let mut lock_file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Locked(self.lock_path.display().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = writeln!(lock_file, "{}", std::process::id()) {
            drop(lock_file);
            let _ = std::fs::remove_file(&self.lock_path);
            return Err(err.into());
        }
        drop(lock_file);

        let file = match OpenOptions::new().append(true).open(&self.events_path) {
            Ok(file) => file,
            Err(err) => {
                let _ = std::fs::remove_file(&self.lock_path);
                return Err(err.into());
            }
        };

        tracing::debug!(lock = %self.lock_path.display(), "acquired event writer lock");
        Ok(EventWriter {
            file: Some(file),
            lock_path: self.lock_path.clone(),
        })
    }

    /// Read events from `cursor` (a byte offset; 0 means from the
    /// beginning) to end-of-file.
    ///
    /// Every line on this path must decode and validate; an invalid line is
    /// an error. Returns the events in file order and the byte position
    /// after the last successfully read line.
    pub fn read_since(&self, cursor: u64) -> Result<(Vec<Event>, u64)> {
        let mut file = File::open(&self.events_path)?;
        file.seek(SeekFrom::Start(cursor))?;
        let mut reader = BufReader::new(file);

        let mut out = Vec::new();
        let mut next_cursor = cursor;
        let mut line = String::new();
        loop {
            line.clear();
            let consumed = reader.read_line(&mut line)?;
            if consumed == 0 {
                break;
            }
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                next_cursor += consumed as u64;
                continue;
            }
            let event: Event = serde_json::from_str(trimmed)?;
            event.validate()?;
            out.push(event);
            next_cursor += consumed as u64;
        }

        Ok((out, next_cursor))
    }
}

/// Exclusive append handle over the event log.
///
/// Closing (or dropping) the writer closes the file and removes the lock.
#[derive(Debug)]
pub struct EventWriter {
    file: Option<File>,
    lock_path: PathBuf,
}

impl EventWriter {
    /// Validate, marshal, and append one event.
    ///
    /// Returns the file offset immediately after the written line. A
    /// validation or I/O failure aborts this append only; the writer stays
    /// open so a later append may still succeed.
    pub fn append(&mut self, event: &Event) -> Result<u64> {
        event.validate()?;

        let mut payload = serde_json::to_vec(event)?;
        payload.push(b'\n');

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Io(std::io::Error::other("writer closed")))?;
        file.write_all(&payload)?;
        file.flush()?;
        Ok(file.stream_position()?)
    }

    /// Close the writer and release the lock.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        self.file.take();
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => {
                tracing::debug!(lock = %self.lock_path.display(), "released event writer lock");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for EventWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(err) = self.release() {
                tracing::warn!(error = %err, "failed to release event writer lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{PatchOp, WindowPatch};

    fn sample_event(ts: DateTime<Utc>, window_key: &str, title: &str) -> Event {
        Event {
            v: EVENT_VERSION,
            ts,
            host: "local".to_string(),
            profile: "default".to_string(),
            event_type: EventType::WindowPatch,
            window_key: Some(window_key.to_string()),
            patch: Some(WindowPatch::from_ops(vec![PatchOp::Title(
                title.to_string(),
            )])),
            state: None,
            source: Some("test".to_string()),
            state_hash: "sha256:abc".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn append_then_read_roundtrips_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();

        let mut writer = store.acquire_writer().unwrap();
        let first = sample_event(now(), "w-1", "a");
        let second = sample_event(now(), "w-2", "b");
        writer.append(&first).unwrap();
        writer.append(&second).unwrap();
        writer.close().unwrap();

        let (events, _) = store.read_since(0).unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn append_offset_is_valid_cursor() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();

        let mut writer = store.acquire_writer().unwrap();
        let offset = writer.append(&sample_event(now(), "w-1", "a")).unwrap();
        let tail_event = sample_event(now(), "w-2", "b");
        writer.append(&tail_event).unwrap();
        writer.close().unwrap();

        let (events, _) = store.read_since(offset).unwrap();
        assert_eq!(events, vec![tail_event]);
    }

    #[test]
    fn read_since_reports_cursor_after_last_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();

        let mut writer = store.acquire_writer().unwrap();
        let offset = writer.append(&sample_event(now(), "w-1", "a")).unwrap();
        writer.close().unwrap();

        let (_, next_cursor) = store.read_since(0).unwrap();
        assert_eq!(next_cursor, offset);

        // Reading from the end again yields nothing and the same cursor.
        let (events, next) = store.read_since(next_cursor).unwrap();
        assert!(events.is_empty());
        assert_eq!(next, next_cursor);
    }

    #[test]
    fn read_since_empty_file_returns_cursor() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();
        let (events, cursor) = store.read_since(0).unwrap();
        assert!(events.is_empty());
        assert_eq!(cursor, 0);
    }

    #[test]
    fn read_since_rejects_invalid_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();
        std::fs::write(store.events_path(), b"{not-json}\n").unwrap();
        assert!(store.read_since(0).is_err());
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();

        let writer = store.acquire_writer().unwrap();
        let err = store.acquire_writer().unwrap_err();
        assert!(matches!(err, Error::Locked(_)));
        drop(writer);

        // Lock released on drop; a new writer succeeds.
        let writer = store.acquire_writer().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn close_removes_lock_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();
        let lock_path = dir.path().join(META_DIR).join(LOCK_FILE);

        let writer = store.acquire_writer().unwrap();
        assert!(lock_path.exists());
        writer.close().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn append_rejects_invalid_event() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();
        let mut writer = store.acquire_writer().unwrap();

        let mut event = sample_event(now(), "w-1", "a");
        event.host = String::new();
        assert!(matches!(
            writer.append(&event).unwrap_err(),
            Error::InvalidEvent(_)
        ));

        // The writer remains usable after a failed append.
        writer.append(&sample_event(now(), "w-1", "a")).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn validate_enforces_payload_shape() {
        let mut event = sample_event(now(), "w-1", "a");
        event.event_type = EventType::StateFull;
        assert!(event.validate().is_err());

        event.patch = None;
        event.state = Some(State::default());
        assert!(event.validate().is_ok());

        event.window_key = None;
        assert!(event.validate().is_ok());
    }

    #[test]
    fn validate_rejects_wrong_version() {
        let mut event = sample_event(now(), "w-1", "a");
        event.v = 2;
        assert!(matches!(event.validate(), Err(Error::InvalidEvent(_))));
    }

    #[test]
    fn unknown_fields_are_ignored_on_decode() {
        let line = r#"{"v":1,"ts":"2026-01-02T03:04:05Z","host":"h","profile":"p","event_type":"window_patch","window_key":"w-1","patch":{"title":"a"},"state_hash":"sha256:abc","shiny_new_field":42}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        event.validate().unwrap();
        assert_eq!(event.window_key.as_deref(), Some("w-1"));
    }

    #[test]
    fn readers_see_events_mid_write_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EventStore::new(dir.path()).unwrap();

        let mut writer = store.acquire_writer().unwrap();
        writer.append(&sample_event(now(), "w-1", "a")).unwrap();

        // No reader lock: concurrent reads succeed while the writer is open.
        let (events, _) = store.read_since(0).unwrap();
        assert_eq!(events.len(), 1);
        writer.close().unwrap();
    }
}
