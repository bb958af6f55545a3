//! Plan execution through an injected command runner.
//!
//! The executor walks the plan sequentially: ready items run their command,
//! everything else passes through with its original status and counts as
//! skipped. A failed launch marks the item `failed` and execution continues
//! with the next item.
//!
//! [`ShellRunner`] detects a "successful" launch by absence of immediate
//! exit within a short startup window (default 200 ms); longer-lived
//! processes are considered launched and the executor proceeds.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::restore_plan::{Plan, Status};

/// Best-effort shell invocation of one restore command.
pub trait CommandRunner: Send + Sync {
    /// Run the command; `Ok` means "launched".
    fn run(&self, command: &str) -> Result<()>;
}

/// Per-item execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Key of the window the item restores.
    pub window_key: String,
    /// Final status after execution.
    pub status: Status,
    /// Reason carried over from planning (skipped/degraded items).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Launch error for failed items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate execution counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Ready items that launched.
    pub restored: usize,
    /// Items not attempted (skipped or degraded plans).
    pub skipped: usize,
    /// Ready items whose launch failed.
    pub failed: usize,
}

/// Full execution outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// One result per plan item, in plan order.
    pub items: Vec<ItemResult>,
    /// Aggregate counts.
    pub summary: ExecutionSummary,
}

/// Sequential plan executor.
pub struct Executor {
    runner: Box<dyn CommandRunner>,
}

impl Executor {
    /// Build an executor over an injected runner.
    #[must_use]
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Execute the plan, continuing past failures.
    #[must_use]
    pub fn execute(&self, plan: &Plan) -> ExecutionResult {
        let mut result = ExecutionResult::default();
        for item in &plan.items {
            if item.status != Status::Ready {
                result.summary.skipped += 1;
                result.items.push(ItemResult {
                    window_key: item.window_key.clone(),
                    status: item.status,
                    reason: item.reason.clone(),
                    error: None,
                });
                continue;
            }

            let command = item.command.as_deref().unwrap_or_default();
            match self.runner.run(command) {
                Ok(()) => {
                    result.summary.restored += 1;
                    result.items.push(ItemResult {
                        window_key: item.window_key.clone(),
                        status: Status::Ready,
                        reason: None,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        window_key = %item.window_key,
                        "restore_item_failed"
                    );
                    result.summary.failed += 1;
                    result.items.push(ItemResult {
                        window_key: item.window_key.clone(),
                        status: Status::Failed,
                        reason: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        result
    }
}

/// Default startup-check window for [`ShellRunner`].
pub const DEFAULT_STARTUP_CHECK: Duration = Duration::from_millis(200);

/// [`CommandRunner`] spawning commands through `sh -lc`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// How long to watch for immediate exit before declaring a launch.
    pub startup_check: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            startup_check: DEFAULT_STARTUP_CHECK,
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<()> {
        let mut child = Command::new("sh")
            .arg("-lc")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let startup_check = if self.startup_check.is_zero() {
            DEFAULT_STARTUP_CHECK
        } else {
            self.startup_check
        };
        let deadline = Instant::now() + startup_check;
        loop {
            match child.try_wait()? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => {
                    return Err(Error::Io(std::io::Error::other(format!(
                        "command exited with {status}"
                    ))));
                }
                None => {
                    if Instant::now() >= deadline {
                        // Still running past the startup window: launched.
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}
