//! Zellij-backed session collaborators.
//!
//! [`ZellijSessionVerifier`] shells out to `zellij list-sessions --short` to
//! confirm that a title-derived session candidate actually exists.
//! [`ZellijSessionCwdResolver`] finds the session's server process in the
//! process table and scores its descendants' working directories, so a
//! home-directory terminal cwd can be upgraded to where the session really
//! lives. Both take their external seams by injection so tests never touch
//! the real system.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use crate::enricher::{SessionCwdResolver, SessionVerifier};
use crate::error::{Error, Result};
use crate::proc_inspect::is_interactive_comm;

/// Runs an external program and captures its stdout.
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, returning stdout on success.
    fn output(&self, program: &str, args: &[&str]) -> Result<Vec<u8>>;
}

/// [`CommandExecutor`] backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct OsCommandExecutor;

impl CommandExecutor for OsCommandExecutor {
    fn output(&self, program: &str, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(program).args(args).output()?;
        if !output.status.success() {
            return Err(Error::ProcessInspect(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        Ok(output.stdout)
    }
}

/// Confirms zellij sessions via `zellij list-sessions --short`.
pub struct ZellijSessionVerifier {
    exec: Box<dyn CommandExecutor>,
}

impl ZellijSessionVerifier {
    /// Verifier over an injected executor; pass [`OsCommandExecutor`] for
    /// the real thing.
    #[must_use]
    pub fn new(exec: Box<dyn CommandExecutor>) -> Self {
        Self { exec }
    }
}

impl Default for ZellijSessionVerifier {
    fn default() -> Self {
        Self::new(Box::new(OsCommandExecutor))
    }
}

impl SessionVerifier for ZellijSessionVerifier {
    fn exists(&self, name: &str) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(false);
        }

        let out = self.exec.output("zellij", &["list-sessions", "--short"])?;
        for line in String::from_utf8_lossy(&out).lines() {
            // Newer zellij versions append annotations after the name.
            let session = line.trim().split_whitespace().next().unwrap_or_default();
            if session == name {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Resolves a zellij session's cwd by scanning the process table.
#[derive(Debug, Clone)]
pub struct ZellijSessionCwdResolver {
    proc_root: PathBuf,
    home: Option<PathBuf>,
}

impl Default for ZellijSessionCwdResolver {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

impl ZellijSessionCwdResolver {
    /// Resolver over an alternate proc root (used by tests).
    #[must_use]
    pub fn with_root(proc_root: impl Into<PathBuf>, home: Option<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            home,
        }
    }

    fn read_comm(&self, pid: i64) -> String {
        std::fs::read_to_string(self.proc_root.join(pid.to_string()).join("comm"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn read_cwd(&self, pid: i64) -> Option<String> {
        let cwd = std::fs::read_link(self.proc_root.join(pid.to_string()).join("cwd")).ok()?;
        let cwd = cwd.to_string_lossy().into_owned();
        if cwd.trim().is_empty() { None } else { Some(cwd) }
    }

    fn read_cmdline(&self, pid: i64) -> String {
        std::fs::read(self.proc_root.join(pid.to_string()).join("cmdline"))
            .map(|payload| {
                String::from_utf8_lossy(&payload)
                    .split('\0')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    fn read_ppid(&self, pid: i64) -> Option<i64> {
        let stat = std::fs::read_to_string(self.proc_root.join(pid.to_string()).join("stat")).ok()?;
        let idx = stat.rfind(')')?;
        let rest = stat.get(idx + 2..)?;
        let mut fields = rest.split_whitespace();
        let _state = fields.next()?;
        fields.next()?.parse().ok()
    }

    /// One pass over the proc root: pid → (comm, cmdline) plus a
    /// children-by-parent index.
    fn scan(&self) -> (HashMap<i64, (String, String)>, HashMap<i64, Vec<i64>>) {
        let mut metas = HashMap::new();
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        let Ok(entries) = std::fs::read_dir(&self.proc_root) else {
            return (metas, children);
        };
        for entry in entries.flatten() {
            let Ok(pid) = entry.file_name().to_string_lossy().parse::<i64>() else {
                continue;
            };
            let Some(ppid) = self.read_ppid(pid) else {
                continue;
            };
            metas.insert(pid, (self.read_comm(pid), self.read_cmdline(pid)));
            children.entry(ppid).or_default().push(pid);
        }
        for pids in children.values_mut() {
            pids.sort_unstable();
        }
        (metas, children)
    }
}

/// Maximum BFS depth below a session server when scoring cwds.
const MAX_SERVER_DESCENDANT_DEPTH: u32 = 4;

impl SessionCwdResolver for ZellijSessionCwdResolver {
    fn resolve(&self, name: &str) -> Result<Option<String>> {
        let session = name.trim();
        if session.is_empty() {
            return Ok(None);
        }

        let (metas, children) = self.scan();

        // Zellij server cmdlines carry the session's ipc path, which ends in
        // the session name.
        let needle = format!("/{session}");
        let servers: Vec<i64> = metas
            .iter()
            .filter(|(_, (comm, cmdline))| {
                comm.to_lowercase() == "zellij"
                    && cmdline.contains("--server")
                    && cmdline.contains(&needle)
            })
            .map(|(pid, _)| *pid)
            .collect();
        if servers.is_empty() {
            return Ok(None);
        }

        let home = self
            .home
            .as_ref()
            .map(|home| home.to_string_lossy().into_owned());
        let mut best_score = -1i32;
        let mut best = None;
        for server_pid in servers {
            for (pid, depth) in bfs_children(&children, server_pid, MAX_SERVER_DESCENDANT_DEPTH) {
                let Some(cwd) = self.read_cwd(pid) else {
                    continue;
                };
                let comm = metas.get(&pid).map(|(comm, _)| comm.as_str()).unwrap_or("");
                let mut score = depth as i32 * 10;
                if is_interactive_comm(comm) {
                    score += 50;
                }
                if home.as_deref().is_some_and(|h| h != cwd) {
                    score += 20;
                }
                if score > best_score {
                    best_score = score;
                    best = Some(cwd);
                }
            }
        }

        Ok(best)
    }
}

/// BFS over a children index, yielding `(pid, depth)` in depth-then-pid order.
fn bfs_children(
    children: &HashMap<i64, Vec<i64>>,
    root_pid: i64,
    max_depth: u32,
) -> Vec<(i64, u32)> {
    let mut out = Vec::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back((root_pid, 0u32));
    while let Some((pid, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for &child in children.get(&pid).map_or(&[][..], Vec::as_slice) {
            out.push((child, depth + 1));
            queue.push_back((child, depth + 1));
        }
    }
    out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use std::path::Path;

    struct StubExecutor {
        stdout: Vec<u8>,
        fail: bool,
    }

    impl CommandExecutor for StubExecutor {
        fn output(&self, _program: &str, _args: &[&str]) -> Result<Vec<u8>> {
            if self.fail {
                return Err(Error::ProcessInspect("zellij not installed".to_string()));
            }
            Ok(self.stdout.clone())
        }
    }

    #[test]
    fn verifier_matches_exact_session_name() {
        let verifier = ZellijSessionVerifier::new(Box::new(StubExecutor {
            stdout: b"proj-a\nproj-b [Created 2h ago]\n".to_vec(),
            fail: false,
        }));
        assert!(verifier.exists("proj-a").unwrap());
        assert!(verifier.exists("proj-b").unwrap());
        assert!(!verifier.exists("proj").unwrap());
    }

    #[test]
    fn verifier_empty_name_is_false_without_exec() {
        let verifier = ZellijSessionVerifier::new(Box::new(StubExecutor {
            stdout: Vec::new(),
            fail: true,
        }));
        assert!(!verifier.exists("  ").unwrap());
    }

    #[test]
    fn verifier_propagates_executor_failure() {
        let verifier = ZellijSessionVerifier::new(Box::new(StubExecutor {
            stdout: Vec::new(),
            fail: true,
        }));
        assert!(verifier.exists("proj").is_err());
    }

    fn fake_proc(root: &Path, pid: i64, ppid: i64, comm: &str, cmdline: &[&str], cwd: Option<&Path>) {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("stat"),
            format!("{pid} ({comm}) S {ppid} {pid} {pid} 0 -1"),
        )
        .unwrap();
        std::fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        std::fs::write(dir.join("cmdline"), cmdline.join("\0")).unwrap();
        if let Some(cwd) = cwd {
            std::fs::create_dir_all(cwd).unwrap();
            symlink(cwd, dir.join("cwd")).unwrap();
        }
    }

    #[test]
    fn resolver_finds_session_server_cwd() {
        let tmp = tempfile::TempDir::new().unwrap();
        let proc_root = tmp.path().join("proc");
        let home = tmp.path().join("home");
        let project = tmp.path().join("project");
        std::fs::create_dir_all(&proc_root).unwrap();

        fake_proc(
            &proc_root,
            900,
            1,
            "zellij",
            &["zellij", "--server", "/run/user/1000/zellij/0.40.0/proj"],
            Some(&home),
        );
        fake_proc(&proc_root, 901, 900, "zsh", &["zsh"], Some(&project));

        let resolver = ZellijSessionCwdResolver::with_root(&proc_root, Some(home));
        let cwd = resolver.resolve("proj").unwrap();
        assert_eq!(cwd.as_deref(), Some(project.to_string_lossy().as_ref()));
    }

    #[test]
    fn resolver_unknown_session_is_none() {
        let tmp = tempfile::TempDir::new().unwrap();
        let proc_root = tmp.path().join("proc");
        std::fs::create_dir_all(&proc_root).unwrap();
        let resolver = ZellijSessionCwdResolver::with_root(&proc_root, None);
        assert!(resolver.resolve("missing").unwrap().is_none());
    }

    #[test]
    fn resolver_empty_session_is_none() {
        let resolver = ZellijSessionCwdResolver::with_root("/nonexistent", None);
        assert!(resolver.resolve("  ").unwrap().is_none());
    }
}
