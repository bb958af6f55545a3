//! Process-metadata enrichment for terminal windows.
//!
//! For each window whose `app_id` is a known terminal emulator and whose pid
//! is positive, the enricher attaches a [`Terminal`] built from the process
//! table: the preferred working directory, whitelisted child-process tags,
//! and (when enabled) the multiplexer session tag.
//!
//! Session tag resolution, in order:
//!
//! 1. the `ZELLIJ_SESSION_NAME` environment variable
//! 2. the argument following `--session`, `-s`, or `attach` in the
//!    process's own args
//! 3. a candidate extracted from the window title — kept only when the
//!    injected [`SessionVerifier`] confirms the session exists
//!
//! When the tag came from the title and the window cwd is missing or is the
//! home directory, an injected [`SessionCwdResolver`] may upgrade the cwd to
//! the session's actual working directory.
//!
//! All collaborators arrive by explicit dependency injection at
//! construction; there are no singletons or environment-implicit lookups.

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::Result;
use crate::proc_inspect::{ProcessInfo, ProcessReader};
use crate::state::{Terminal, Window, is_terminal_app, normalize_terminal};

/// Confirms that a named multiplexer session exists.
pub trait SessionVerifier: Send + Sync {
    /// Whether the session is currently live.
    fn exists(&self, name: &str) -> Result<bool>;
}

/// Maps a multiplexer session name to its working directory.
pub trait SessionCwdResolver: Send + Sync {
    /// The session's cwd, when one can be determined.
    fn resolve(&self, name: &str) -> Result<Option<String>>;
}

/// Process-tag names retained even with an empty configured whitelist.
const DEFAULT_TAG_WHITELIST: [&str; 2] = ["opencode", "claude"];

/// Enricher configuration.
#[derive(Debug, Clone, Default)]
pub struct EnricherConfig {
    /// Whitelisted process names (case-insensitive).
    pub whitelist: Vec<String>,
    /// Additional whitelisted names merged on top of `whitelist`.
    pub whitelist_extra: Vec<String>,
    /// Whether to resolve and attach the session tag.
    pub include_session_tag: bool,
    /// Home directory used to decide whether a cwd is worth upgrading.
    pub home: Option<String>,
}

/// Attaches process metadata to terminal windows.
pub struct Enricher {
    reader: Box<dyn ProcessReader>,
    verifier: Option<Box<dyn SessionVerifier>>,
    cwd_resolver: Option<Box<dyn SessionCwdResolver>>,
    whitelist: BTreeSet<String>,
    include_session_tag: bool,
    home: Option<String>,
    title_session_pattern: Regex,
    title_prefix_pattern: Regex,
}

impl Enricher {
    /// Build an enricher around a process reader and optional session
    /// collaborators.
    #[must_use]
    pub fn new(
        reader: Box<dyn ProcessReader>,
        verifier: Option<Box<dyn SessionVerifier>>,
        cwd_resolver: Option<Box<dyn SessionCwdResolver>>,
        config: EnricherConfig,
    ) -> Self {
        let mut whitelist: BTreeSet<String> = DEFAULT_TAG_WHITELIST
            .iter()
            .map(ToString::to_string)
            .collect();
        for name in config.whitelist.iter().chain(config.whitelist_extra.iter()) {
            let normalized = name.trim().to_lowercase();
            if !normalized.is_empty() {
                whitelist.insert(normalized);
            }
        }

        Self {
            reader,
            verifier,
            cwd_resolver,
            whitelist,
            include_session_tag: config.include_session_tag,
            home: config.home,
            title_session_pattern: Regex::new(r"\[session:([^\]]+)\]")
                .expect("static pattern compiles"),
            title_prefix_pattern: Regex::new(r"^([A-Za-z0-9._-]+)\s+\|")
                .expect("static pattern compiles"),
        }
    }

    /// Enrich one window. Non-terminal windows and windows without a usable
    /// pid pass through unchanged; a reader error propagates to the caller,
    /// which treats it as a soft degrade.
    pub fn enrich_window(&self, window: &Window) -> Result<Window> {
        if !is_terminal_app(&window.app_id) {
            return Ok(window.clone());
        }
        let Some(pid) = window.pid.filter(|pid| *pid > 0) else {
            return Ok(window.clone());
        };

        let info = self.reader.inspect(pid)?;

        let mut terminal = Terminal {
            cwd: info.cwd.clone().filter(|cwd| !cwd.trim().is_empty()),
            process_tags: self.filter_tags(&info.process_chain),
            session_tag: None,
        };
        if self.include_session_tag {
            let (tag, from_title) = self.resolve_session_tag(window.title.as_deref(), &info);
            if let Some(tag) = &tag {
                if from_title {
                    self.maybe_upgrade_cwd(&mut terminal, tag);
                }
            }
            terminal.session_tag = tag;
        }

        let mut out = window.clone();
        out.terminal = normalize_terminal(terminal);
        Ok(out)
    }

    /// Retain only whitelisted command names; deduplicated and sorted.
    fn filter_tags(&self, chain: &[String]) -> Vec<String> {
        let set: BTreeSet<String> = chain
            .iter()
            .map(|name| name.trim().to_lowercase())
            .filter(|name| self.whitelist.contains(name))
            .collect();
        set.into_iter().collect()
    }

    /// Resolve the session tag; the bool reports whether it was derived from
    /// the window title (as opposed to the process itself).
    fn resolve_session_tag(
        &self,
        title: Option<&str>,
        info: &ProcessInfo,
    ) -> (Option<String>, bool) {
        if let Some(tag) = session_tag_from_process(info) {
            return (Some(tag), false);
        }

        let Some(candidate) = self.session_tag_from_title(title.unwrap_or_default()) else {
            return (None, false);
        };
        let Some(verifier) = &self.verifier else {
            return (None, false);
        };
        match verifier.exists(&candidate) {
            Ok(true) => (Some(candidate), true),
            Ok(false) => (None, false),
            Err(err) => {
                tracing::debug!(error = %err, session = %candidate, "session_verify_error");
                (None, false)
            }
        }
    }

    fn session_tag_from_title(&self, title: &str) -> Option<String> {
        if let Some(captures) = self.title_session_pattern.captures(title) {
            let tag = captures[1].trim().to_string();
            if !tag.is_empty() {
                return Some(tag);
            }
        }
        self.title_prefix_pattern
            .captures(title)
            .map(|captures| captures[1].to_string())
    }

    /// Replace a missing or home-directory cwd with the session's cwd.
    fn maybe_upgrade_cwd(&self, terminal: &mut Terminal, session: &str) {
        let at_home = match (&terminal.cwd, &self.home) {
            (None, _) => true,
            (Some(cwd), Some(home)) => cwd == home,
            (Some(_), None) => false,
        };
        if !at_home {
            return;
        }
        let Some(resolver) = &self.cwd_resolver else {
            return;
        };
        match resolver.resolve(session) {
            Ok(Some(cwd)) if !cwd.trim().is_empty() => {
                terminal.cwd = Some(cwd);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, session = %session, "session_cwd_resolve_error");
            }
        }
    }
}

/// Session tag carried by the process itself: environment first, then
/// multiplexer-style arguments.
fn session_tag_from_process(info: &ProcessInfo) -> Option<String> {
    if let Some(session) = info.env.get("ZELLIJ_SESSION_NAME") {
        let session = session.trim();
        if !session.is_empty() {
            return Some(session.to_string());
        }
    }

    for (i, arg) in info.args.iter().enumerate() {
        if matches!(arg.as_str(), "--session" | "-s" | "attach") {
            if let Some(next) = info.args.get(i + 1) {
                let next = next.trim();
                if !next.is_empty() && !next.starts_with('-') {
                    return Some(next.to_string());
                }
            }
        }
    }

    None
}
