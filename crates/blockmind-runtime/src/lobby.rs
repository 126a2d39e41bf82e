//! Lobby detection and automatic transfer to a survival server.
//!
//! Proxy networks drop new connections into a lobby and announce the
//! playable servers in chat.  [`LobbyTracker`] reads those server messages,
//! picks the first server with the configured prefix and produces the chat
//! command that transfers the agent there, retrying at a fixed spacing until
//! a `connected to <server>` message confirms the move.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use blockmind_runtime::lobby::{LobbyConfig, LobbyTracker};
//!
//! let now = Instant::now();
//! let mut lobby = LobbyTracker::new(LobbyConfig::default());
//!
//! let update = lobby.on_server_message("Available servers: lobby-1, §asurvival-2, creative", now);
//! assert_eq!(update.join.unwrap().command, "/server survival-2");
//!
//! // Retries are spaced out.
//! assert!(lobby.retry("lobby poll", now + Duration::from_secs(3)).is_none());
//! assert!(lobby.retry("lobby poll", now + Duration::from_secs(7)).is_some());
//!
//! let update = lobby.on_server_message("You are now connected to survival-2", now);
//! assert_eq!(update.server_context.as_deref(), Some("survival-2"));
//! assert!(lobby.state().joined);
//! ```

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static ANSI pattern"));
static COLOR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"§[0-9A-FK-ORa-fk-or]").expect("static colour-code pattern"));
static NON_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w.-]").expect("static token pattern"));
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9._-]*").expect("static token pattern"));
static CONNECTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)connected to\s+([A-Za-z0-9._-]+)").expect("static connected pattern")
});
static CONNECTED_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bconnected to\b").expect("static connected pattern"));
static REJECTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)unknown or incomplete command").expect("static rejection pattern")
});

const SERVER_LIST_MARKER: &str = "Available servers:";

// ─────────────────────────────────────────────────────────────────────────────
// Text helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Remove ANSI colour escapes (`ESC[...m`).
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Reduce a raw server-list entry to a bare server name: colour codes are
/// dropped, anything outside `[\w.-]` becomes a space, and the first
/// remaining token is returned.
pub fn sanitize_server_token(token: &str) -> Option<String> {
    let clean = COLOR_CODE_RE.replace_all(token, "");
    let clean = NON_TOKEN_RE.replace_all(&clean, " ");
    TOKEN_RE
        .find(clean.trim())
        .map(|m| m.as_str().to_string())
}

/// Server names announced after `Available servers:`, in order.
pub fn parse_server_list(text: &str) -> Option<Vec<String>> {
    let plain = strip_ansi(text);
    let idx = plain.find(SERVER_LIST_MARKER)?;
    let list = &plain[idx + SERVER_LIST_MARKER.len()..];
    Some(list.split(',').filter_map(sanitize_server_token).collect())
}

/// The server named in a `connected to <server>` message.
pub fn parse_connected_server(text: &str) -> Option<String> {
    let plain = strip_ansi(text);
    CONNECTED_RE
        .captures(&plain)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Fill `{server}` into `template`, making sure the result is a `/` command.
pub fn join_command(template: &str, server: &str) -> String {
    let command = template.replace("{server}", server);
    let command = command.trim();
    if command.starts_with('/') {
        command.to_string()
    } else {
        format!("/{command}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub auto_join: bool,
    /// Servers whose name starts with this prefix are join targets.
    pub target_prefix: String,
    /// Chat command template; `{server}` is replaced by the target.
    pub command_template: String,
    pub retry_spacing_ms: u64,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            auto_join: true,
            target_prefix: "survival-".to_string(),
            command_template: "/server {server}".to_string(),
            retry_spacing_ms: 7_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinState {
    pub target: Option<String>,
    pub attempted: bool,
    pub joined: bool,
    pub attempts: u32,
    pub last_attempt_at: Option<Instant>,
    /// Server context learned from chat, used when the world does not report
    /// one.
    pub server_name: Option<String>,
}

/// A join command to send now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinAttempt {
    pub target: String,
    pub command: String,
    pub attempt: u32,
    pub reason: String,
}

/// What a server message changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LobbyUpdate {
    pub server_context: Option<String>,
    pub join: Option<JoinAttempt>,
    pub joined: bool,
}

#[derive(Debug, Clone)]
pub struct LobbyTracker {
    config: LobbyConfig,
    state: JoinState,
}

impl LobbyTracker {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            config,
            state: JoinState::default(),
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    pub fn state(&self) -> &JoinState {
        &self.state
    }

    pub fn server_name(&self) -> Option<&str> {
        self.state.server_name.as_deref()
    }

    /// Feed one server/system chat line.
    pub fn on_server_message(&mut self, text: &str, now: Instant) -> LobbyUpdate {
        let plain = strip_ansi(text);
        let mut update = LobbyUpdate::default();

        if let Some(server) = parse_connected_server(&plain) {
            info!(server = %server, "server context updated");
            self.state.server_name = Some(server.clone());
            update.server_context = Some(server);
        }

        if let Some(servers) = parse_server_list(&plain) {
            update.join = self.pick_target(&servers, now);
        }

        if update.join.is_none()
            && self.state.attempted
            && self.state.target.is_some()
            && REJECTED_RE.is_match(&plain)
        {
            update.join = self.retry("command rejected", now);
        }

        if CONNECTED_WORD_RE.is_match(&plain) && plain.contains(&self.config.target_prefix) {
            if !self.state.joined {
                info!(text = %plain, "survival transfer confirmed");
            }
            self.state.joined = true;
            update.joined = true;
        }
        update
    }

    fn pick_target(&mut self, servers: &[String], now: Instant) -> Option<JoinAttempt> {
        if !self.config.auto_join || self.state.joined || self.state.attempted {
            return None;
        }
        let target = servers
            .iter()
            .find(|s| s.starts_with(&self.config.target_prefix))?
            .clone();
        self.state.attempted = true;
        self.state.target = Some(target.clone());
        self.state.attempts = 0;
        Some(self.attempt(target, "server list", now))
    }

    /// Re-send the join command if a target is known, the transfer is not
    /// confirmed and the retry spacing has passed.
    pub fn retry(&mut self, reason: &str, now: Instant) -> Option<JoinAttempt> {
        if !self.config.auto_join || self.state.joined {
            return None;
        }
        let target = self.state.target.clone()?;
        let spacing = Duration::from_millis(self.config.retry_spacing_ms);
        if self
            .state
            .last_attempt_at
            .is_some_and(|at| now.saturating_duration_since(at) < spacing)
        {
            return None;
        }
        Some(self.attempt(target, reason, now))
    }

    fn attempt(&mut self, target: String, reason: &str, now: Instant) -> JoinAttempt {
        let command = join_command(&self.config.command_template, &target);
        self.state.last_attempt_at = Some(now);
        self.state.attempts += 1;
        info!(target = %target, command = %command, attempt = self.state.attempts, reason, "auto-join");
        JoinAttempt {
            target,
            command,
            attempt: self.state.attempts,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_sequences() {
        assert_eq!(strip_ansi("\x1b[1;32mhello\x1b[0m world"), "hello world");
    }

    #[test]
    fn sanitizes_colour_codes_and_punctuation() {
        assert_eq!(sanitize_server_token(" §a§lsurvival-1§r "), Some("survival-1".into()));
        assert_eq!(sanitize_server_token("[lobby_2]"), Some("lobby_2".into()));
        assert_eq!(sanitize_server_token(" ** "), None);
    }

    #[test]
    fn parses_server_list_after_marker() {
        let servers = parse_server_list("\x1b[33mAvailable servers: lobby, survival-a,  creative.\x1b[0m").unwrap();
        assert_eq!(servers, vec!["lobby", "survival-a", "creative."]);
        assert!(parse_server_list("welcome!").is_none());
    }

    #[test]
    fn parses_connected_server_case_insensitively() {
        assert_eq!(
            parse_connected_server("You are now CONNECTED TO lobby-3!"),
            Some("lobby-3".into())
        );
        assert_eq!(parse_connected_server("connected"), None);
    }

    #[test]
    fn join_command_is_normalized() {
        assert_eq!(join_command("server {server}", "survival-1"), "/server survival-1");
        assert_eq!(join_command(" /join {server} ", "s"), "/join s");
    }

    #[test]
    fn first_attempt_only_once_per_session() {
        let now = Instant::now();
        let mut lobby = LobbyTracker::new(LobbyConfig::default());
        let first = lobby.on_server_message("Available servers: survival-1", now);
        assert_eq!(first.join.map(|j| j.attempt), Some(1));
        let again = lobby.on_server_message("Available servers: survival-2", now + Duration::from_secs(30));
        assert!(again.join.is_none());
        assert_eq!(lobby.state().target.as_deref(), Some("survival-1"));
    }

    #[test]
    fn no_target_without_matching_prefix() {
        let mut lobby = LobbyTracker::new(LobbyConfig::default());
        let update = lobby.on_server_message("Available servers: lobby, creative", Instant::now());
        assert!(update.join.is_none());
        assert!(!lobby.state().attempted);
        assert!(lobby.retry("lobby poll", Instant::now()).is_none());
    }

    #[test]
    fn rejected_command_retries_after_spacing() {
        let now = Instant::now();
        let mut lobby = LobbyTracker::new(LobbyConfig::default());
        lobby.on_server_message("Available servers: survival-1", now);

        let early = lobby.on_server_message("Unknown or incomplete command", now + Duration::from_secs(1));
        assert!(early.join.is_none());

        let late = lobby.on_server_message("Unknown or incomplete command", now + Duration::from_secs(8));
        let attempt = late.join.unwrap();
        assert_eq!(attempt.attempt, 2);
        assert_eq!(attempt.reason, "command rejected");
    }

    #[test]
    fn confirmation_stops_retries() {
        let now = Instant::now();
        let mut lobby = LobbyTracker::new(LobbyConfig::default());
        lobby.on_server_message("Available servers: survival-1", now);
        let update = lobby.on_server_message("Connected to survival-1", now);
        assert!(update.joined);
        assert_eq!(lobby.server_name(), Some("survival-1"));
        assert!(lobby.retry("lobby poll", now + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn disabled_auto_join_never_picks_target() {
        let mut lobby = LobbyTracker::new(LobbyConfig {
            auto_join: false,
            ..LobbyConfig::default()
        });
        let update = lobby.on_server_message("Available servers: survival-1", Instant::now());
        assert!(update.join.is_none());
    }
}
