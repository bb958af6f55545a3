//! Capture orchestration: collect → diff → append → maybe-snapshot.
//!
//! [`StateCollector`] runs the snapshotter, parses the blob, enriches
//! terminal windows, and normalizes. [`Runner`] drives one capture tick at a
//! time against the stores, holding the last-known state between ticks.
//!
//! The last-known state is process-scoped: it starts empty at construction
//! and is discarded at process exit, so the first changed tick after a
//! restart emits one `window_patch` per live window — an effective full
//! snapshot diffed against the empty state. No `state_full` event is ever
//! emitted by this runner.
//!
//! In continuous mode ticks arrive on a channel and each tick runs
//! synchronously to completion; a failed tick logs one structured line and
//! leaves the last-known state untouched so the next tick retries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use crate::compositor::{Snapshotter, parse_snapshot};
use crate::diff::diff;
use crate::enricher::Enricher;
use crate::error::Result;
use crate::events::{Event, EventStore, EventType, EVENT_VERSION};
use crate::snapshots::{Snapshot, SnapshotStore, should_snapshot};
use crate::state::{State, normalize};

/// Produces one full session state per call.
pub trait Collector: Send {
    /// Collect the current state.
    fn collect(&self) -> Result<State>;
}

/// Collector composing snapshotter → adapter → enricher → normalize.
pub struct StateCollector {
    snapshotter: Box<dyn Snapshotter>,
    enricher: Option<Enricher>,
}

impl StateCollector {
    /// Build a collector; pass `None` to skip enrichment entirely.
    #[must_use]
    pub fn new(snapshotter: Box<dyn Snapshotter>, enricher: Option<Enricher>) -> Self {
        Self {
            snapshotter,
            enricher,
        }
    }
}

impl Collector for StateCollector {
    fn collect(&self) -> Result<State> {
        let raw = self.snapshotter.snapshot()?;
        let mut state = parse_snapshot(&raw)?;

        if let Some(enricher) = &self.enricher {
            for window in &mut state.windows {
                match enricher.enrich_window(window) {
                    Ok(enriched) => *window = enriched,
                    // Soft degrade: keep the unenriched window.
                    Err(err) => {
                        tracing::debug!(
                            error = %err,
                            window_key = %window.key,
                            "enrich_window_error"
                        );
                    }
                }
            }
        }

        Ok(normalize(&state))
    }
}

/// Capture runner configuration.
pub struct RunnerConfig {
    /// State collector.
    pub collector: Box<dyn Collector>,
    /// Event log store.
    pub event_store: EventStore,
    /// Snapshot store.
    pub snapshot_store: SnapshotStore,
    /// Write a snapshot every N appended events; 0 disables snapshots.
    pub snapshot_every: u64,
    /// Capturing host, stamped on every event.
    pub host: String,
    /// Capture profile, stamped on every event.
    pub profile: String,
    /// Producer identity, stamped on every event.
    pub source: String,
}

/// Outcome of one capture tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Number of events appended this tick (0 when unchanged).
    pub events_written: usize,
    /// Path of the snapshot written this tick, if the cadence fired.
    pub snapshot_path: Option<PathBuf>,
    /// Hash of the collected state.
    pub state_hash: String,
}

/// Drives capture ticks and owns the last-known state.
pub struct Runner {
    collector: Box<dyn Collector>,
    event_store: EventStore,
    snapshot_store: SnapshotStore,
    snapshot_every: u64,
    host: String,
    profile: String,
    source: String,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send>,

    last_state: Option<State>,
    event_count: u64,
}

impl Runner {
    /// Build a runner; the last-known state starts empty.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            collector: config.collector,
            event_store: config.event_store,
            snapshot_store: config.snapshot_store,
            snapshot_every: config.snapshot_every,
            host: config.host,
            profile: config.profile,
            source: config.source,
            now_fn: Box::new(Utc::now),
            last_state: None,
            event_count: 0,
        }
    }

    /// Replace the clock (used by tests for deterministic timestamps).
    #[must_use]
    pub fn with_now(mut self, now_fn: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.now_fn = Box::new(now_fn);
        self
    }

    /// Run one capture tick.
    ///
    /// Unchanged states write nothing. Otherwise every patch derived from
    /// the new state is appended with the same `ts` and `state_hash`, in
    /// sorted window-key order, under a writer lock held only for the
    /// duration of the appends.
    pub fn capture_once(&mut self) -> Result<CaptureOutcome> {
        let state = self.collector.collect()?;

        let before = self.last_state.clone().unwrap_or_default();
        let (patches, changed) = diff(&before, &state)?;
        let state_hash = state.hash()?;
        if !changed {
            self.last_state = Some(state);
            return Ok(CaptureOutcome {
                state_hash,
                ..CaptureOutcome::default()
            });
        }

        let mut writer = self.event_store.acquire_writer()?;
        let now = (self.now_fn)();
        let mut last_offset = 0;
        for patch in &patches {
            last_offset = writer.append(&Event {
                v: EVENT_VERSION,
                ts: now,
                host: self.host.clone(),
                profile: self.profile.clone(),
                event_type: EventType::WindowPatch,
                window_key: Some(patch.window_key.clone()),
                patch: Some(patch.fields.clone()),
                state: None,
                source: Some(self.source.clone()),
                state_hash: state_hash.clone(),
            })?;
        }
        writer.close()?;

        self.event_count += patches.len() as u64;
        let mut outcome = CaptureOutcome {
            events_written: patches.len(),
            snapshot_path: None,
            state_hash: state_hash.clone(),
        };
        if should_snapshot(self.event_count, self.snapshot_every) {
            let path = self.snapshot_store.write(&Snapshot {
                v: 1,
                created_at: now,
                host: self.host.clone(),
                profile: self.profile.clone(),
                last_event_offset: last_offset,
                state_hash,
                state: state.clone(),
            })?;
            outcome.snapshot_path = Some(path);
        }

        self.last_state = Some(state);
        Ok(outcome)
    }

    /// Drive capture ticks until the tick channel closes or shutdown flips.
    ///
    /// A failed tick logs a single structured line and does not abort the
    /// loop; the last-known state stays as it was so the next tick retries
    /// the same diff.
    pub async fn run(
        &mut self,
        ticks: &mut mpsc::Receiver<()>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
                tick = ticks.recv() => {
                    if tick.is_none() {
                        return Ok(());
                    }
                    if let Err(err) = self.capture_once() {
                        tracing::warn!(error = %err, kind = err.name(), "capture_once_error");
                    }
                }
            }
        }
    }
}
