//! Configuration management for nirivana.
//!
//! Typed settings for every core component, with serde defaults so partial
//! documents deserialize cleanly. Reading and merging a config *file* is the
//! front-end's job; the core is constructed from these types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::restore_plan::PlannerConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State directory owning the event log and snapshots.
    pub state_dir: PathBuf,
    /// Host name stamped on events and snapshots.
    pub host: String,
    /// Capture profile stamped on events and snapshots.
    pub profile: String,
    /// Capture settings.
    pub capture: CaptureConfig,
    /// Process-metadata enrichment settings.
    pub process_metadata: ProcessMetadataConfig,
    /// Retention settings.
    pub retention: RetentionConfig,
    /// Restore settings.
    pub restore: RestoreConfig,
    /// Logging settings.
    pub log: crate::logging::LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            host: default_host(),
            profile: default_profile(),
            capture: CaptureConfig::default(),
            process_metadata: ProcessMetadataConfig::default(),
            retention: RetentionConfig::default(),
            restore: RestoreConfig::default(),
            log: crate::logging::LogConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration constraints.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::ValidationFailed("host must not be empty".to_string()));
        }
        if self.profile.trim().is_empty() {
            return Err(Error::ValidationFailed(
                "profile must not be empty".to_string(),
            ));
        }
        if self.capture.interval_secs == 0 {
            return Err(Error::ValidationFailed(
                "capture.interval_secs must be > 0".to_string(),
            ));
        }
        if self.capture.snapshot_command.trim().is_empty() {
            return Err(Error::ValidationFailed(
                "capture.snapshot_command must not be empty".to_string(),
            ));
        }
        if self.retention.days == 0 {
            return Err(Error::ValidationFailed(
                "retention.days must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Seconds between capture ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Write a snapshot every N appended events; 0 disables snapshots.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Shell command producing the compositor snapshot blob.
    #[serde(default = "default_snapshot_command")]
    pub snapshot_command: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            snapshot_every: default_snapshot_every(),
            snapshot_command: default_snapshot_command(),
        }
    }
}

/// Process-metadata enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetadataConfig {
    /// Whitelisted process-tag names.
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Additional whitelisted names merged on top of `whitelist`.
    #[serde(default)]
    pub whitelist_extra: Vec<String>,
    /// Whether to resolve and attach the session tag.
    #[serde(default = "default_true")]
    pub include_session_tag: bool,
}

impl Default for ProcessMetadataConfig {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            whitelist_extra: Vec::new(),
            include_session_tag: true,
        }
    }
}

/// Retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days of history to keep.
    #[serde(default = "default_retention_days")]
    pub days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

/// Restore settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Planner settings (allowlist, app modes, terminal command).
    #[serde(flatten)]
    pub planner: PlannerConfig,
    /// Move restored windows back to their captured workspaces.
    #[serde(default = "default_true")]
    pub reconcile_workspace_moves: bool,
    /// How long to wait after launching before reconciling, in
    /// milliseconds.
    #[serde(default = "default_reconcile_delay_ms")]
    pub workspace_reconcile_delay_ms: u64,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            reconcile_workspace_moves: true,
            workspace_reconcile_delay_ms: default_reconcile_delay_ms(),
        }
    }
}

/// Default state directory: `~/.nirivana`, or a relative fallback when the
/// home directory is unknown.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map_or_else(|| PathBuf::from(".nirivana"), |home| home.join(".nirivana"))
}

fn default_host() -> String {
    "local".to_string()
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_snapshot_every() -> u64 {
    100
}

fn default_snapshot_command() -> String {
    "niri msg -j windows".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_reconcile_delay_ms() -> u64 {
    1200
}

fn default_true() -> bool {
    true
}
