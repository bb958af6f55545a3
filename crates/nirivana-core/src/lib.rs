//! nirivana-core: capture, replay, and restore for niri window sessions.
//!
//! Captures the state of a niri session — workspaces, windows, and enriched
//! per-terminal metadata — on a cadence, persists the history as a
//! deterministic replayable log, reconstructs the state at any past
//! instant, and plans restore actions for an external executor.
//!
//! # Architecture
//!
//! ```text
//! Snapshotter → compositor adapter → enricher → normalize   (collect)
//!        │
//!        ▼
//! capture::Runner ── diff ──► events.jsonl (append, locked)
//!        │                        │
//!        └── cadence ──► snapshots/<unix>.json
//!                                 │
//! replay::Engine ◄── snapshot + event tail ──┘
//!        │
//!        ▼
//! restore_plan::Planner → restore_exec::Executor → restore_reconcile
//! ```
//!
//! # Modules
//!
//! - `state`: canonical state model, normalization, and hashing
//! - `patch`: sparse per-window patches as a typed sum
//! - `compositor`: snapshot blob adapter plus snapshotter collaborators
//! - `proc_inspect`: `/proc` process-table reader
//! - `enricher`: terminal metadata enrichment (cwd, tags, session tag)
//! - `zellij`: session verifier and session-cwd resolver
//! - `events`: append-only event log with an exclusive writer lock
//! - `snapshots`: periodic full-state snapshots
//! - `diff`: sparse state diffing
//! - `capture`: the capture runner and continuous loop
//! - `replay`: state reconstruction and history listing
//! - `prune`: age-based retention with anchor preservation
//! - `restore_plan` / `restore_exec` / `restore_reconcile`: restore planning,
//!   execution, and post-restore workspace reconciliation
//! - `config`: typed configuration
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod diff;
pub mod enricher;
pub mod error;
pub mod events;
pub mod logging;
pub mod patch;
pub mod proc_inspect;
pub mod prune;
pub mod replay;
pub mod restore_exec;
pub mod restore_plan;
pub mod restore_reconcile;
pub mod snapshots;
pub mod state;
pub mod zellij;

pub use error::{Error, Result};

/// Crate version, stamped into diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
