//! Process-table inspection for terminal windows.
//!
//! Reads `/proc/<pid>/{cwd,cmdline,environ,stat,comm}` via `std::fs` to
//! recover the working directory, argument vector, environment, and parent
//! chain of a terminal's client process. The proc root is injectable so
//! tests can point at a fabricated tree.
//!
//! # CWD preference
//!
//! A terminal's own cwd is often stale (the shell or multiplexer below it is
//! where the user actually works), so descendants up to depth 3 are scored:
//!
//! > `10·depth + 50·is_interactive_shell + 20·(cwd ≠ window_cwd) + 10·(cwd ≠ $HOME)`
//!
//! and the highest-scored non-empty descendant cwd replaces the window's own.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;

/// Maximum depth when walking descendants for cwd preference.
const MAX_DESCENDANT_DEPTH: u32 = 3;

/// Maximum parent-chain length collected for process tags.
const MAX_CHAIN_DEPTH: u32 = 8;

/// Command names counted as interactive shells during cwd scoring.
const INTERACTIVE_COMMANDS: [&str; 8] = [
    "zsh", "bash", "fish", "sh", "nu", "zellij", "tmux", "nvim",
];

/// Whether a `comm` value names an interactive shell or multiplexer.
#[must_use]
pub fn is_interactive_comm(comm: &str) -> bool {
    let normalized = comm.trim().to_lowercase();
    INTERACTIVE_COMMANDS.contains(&normalized.as_str())
}

/// Everything the enricher needs to know about one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Preferred working directory (descendant-scored, see module docs).
    pub cwd: Option<String>,
    /// Command names along the parent chain, nearest first.
    pub process_chain: Vec<String>,
    /// The process's own argument vector.
    pub args: Vec<String>,
    /// The process's environment.
    pub env: HashMap<String, String>,
}

/// Reads process information from the system process table.
pub trait ProcessReader: Send + Sync {
    /// Inspect one pid. Non-positive pids yield an empty info.
    fn inspect(&self, pid: i64) -> Result<ProcessInfo>;
}

/// [`ProcessReader`] backed by the `/proc` filesystem.
#[derive(Debug, Clone)]
pub struct ProcInspector {
    proc_root: PathBuf,
    home: Option<PathBuf>,
}

impl Default for ProcInspector {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

impl ProcInspector {
    /// Inspector over an alternate proc root (used by tests).
    #[must_use]
    pub fn with_root(proc_root: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            home,
        }
    }

    fn pid_path(&self, pid: i64) -> PathBuf {
        self.proc_root.join(pid.to_string())
    }

    fn read_comm(&self, pid: i64) -> String {
        std::fs::read_to_string(self.pid_path(pid).join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn read_cwd(&self, pid: i64) -> Option<String> {
        let cwd = std::fs::read_link(self.pid_path(pid).join("cwd")).ok()?;
        let cwd = cwd.to_string_lossy().into_owned();
        if cwd.trim().is_empty() { None } else { Some(cwd) }
    }

    fn read_ppid(&self, pid: i64) -> Option<i64> {
        let stat = std::fs::read_to_string(self.pid_path(pid).join("stat")).ok()?;
        parse_ppid_from_stat(&stat)
    }

    /// Index every process by parent pid in one pass over the proc root.
    fn children_index(&self) -> HashMap<i64, Vec<i64>> {
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        let Ok(entries) = std::fs::read_dir(&self.proc_root) else {
            return children;
        };
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<i64>() else {
                continue;
            };
            if let Some(ppid) = self.read_ppid(pid) {
                children.entry(ppid).or_default().push(pid);
            }
        }
        for pids in children.values_mut() {
            pids.sort_unstable();
        }
        children
    }

    /// BFS descendants of `root_pid` up to `max_depth`, depth-then-pid order.
    fn collect_descendants(&self, root_pid: i64, max_depth: u32) -> Vec<Descendant> {
        let children = self.children_index();
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(Descendant {
            pid: root_pid,
            depth: 0,
            comm: String::new(),
        });
        while let Some(current) = queue.pop_front() {
            if current.depth >= max_depth {
                continue;
            }
            for &child in children.get(&current.pid).map_or(&[][..], Vec::as_slice) {
                let next = Descendant {
                    pid: child,
                    depth: current.depth + 1,
                    comm: self.read_comm(child),
                };
                out.push(next.clone());
                queue.push_back(next);
            }
        }
        out.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.pid.cmp(&b.pid)));
        out
    }

    /// Score descendants and return the preferred cwd, if any beats nothing.
    fn preferred_cwd(&self, root_pid: i64, window_cwd: Option<&str>) -> Option<String> {
        let descendants = self.collect_descendants(root_pid, MAX_DESCENDANT_DEPTH);
        if descendants.is_empty() {
            return None;
        }

        let home = self
            .home
            .as_ref()
            .map(|home| home.to_string_lossy().into_owned());
        let mut best_score = -1i32;
        let mut best_cwd = None;
        for candidate in descendants {
            let Some(cwd) = self.read_cwd(candidate.pid) else {
                continue;
            };
            let mut score = candidate.depth as i32 * 10;
            if is_interactive_comm(&candidate.comm) {
                score += 50;
            }
            if window_cwd.is_some_and(|w| w != cwd) {
                score += 20;
            }
            if home.as_deref().is_some_and(|h| h != cwd) {
                score += 10;
            }
            if score > best_score {
                best_score = score;
                best_cwd = Some(cwd);
            }
        }
        best_cwd
    }

    /// Walk the parent chain, collecting command names nearest-first.
    fn process_chain(&self, pid: i64) -> Vec<String> {
        let mut chain = Vec::with_capacity(MAX_CHAIN_DEPTH as usize);
        let mut current = pid;
        for _ in 0..MAX_CHAIN_DEPTH {
            if current <= 0 {
                break;
            }
            let comm = self.read_comm(current);
            if !comm.is_empty() {
                chain.push(comm);
            }
            match self.read_ppid(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        chain
    }
}

#[derive(Debug, Clone)]
struct Descendant {
    pid: i64,
    depth: u32,
    comm: String,
}

impl ProcessReader for ProcInspector {
    fn inspect(&self, pid: i64) -> Result<ProcessInfo> {
        if pid <= 0 {
            return Ok(ProcessInfo::default());
        }

        let mut info = ProcessInfo {
            cwd: self.read_cwd(pid),
            ..ProcessInfo::default()
        };
        let window_cwd = info.cwd.clone();

        if let Ok(payload) = std::fs::read(self.pid_path(pid).join("cmdline")) {
            info.args = parse_null_separated(&payload);
        }
        if let Ok(payload) = std::fs::read(self.pid_path(pid).join("environ")) {
            info.env = parse_env(&payload);
        }
        if let Some(preferred) = self.preferred_cwd(pid, window_cwd.as_deref()) {
            info.cwd = Some(preferred);
        }
        info.process_chain = self.process_chain(pid);

        Ok(info)
    }
}

/// Split a NUL-separated `/proc` payload into trimmed non-empty parts.
fn parse_null_separated(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .split('\0')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse a NUL-separated `KEY=VALUE` environment payload.
fn parse_env(payload: &[u8]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for part in parse_null_separated(payload) {
        if let Some((key, value)) = part.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }
    env
}

/// Extract the ppid from `/proc/<pid>/stat`.
///
/// The comm field can contain spaces and parens, so fields are taken after
/// the last `)`.
fn parse_ppid_from_stat(stat: &str) -> Option<i64> {
    let idx = stat.rfind(')')?;
    let rest = stat.get(idx + 2..)?;
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}
