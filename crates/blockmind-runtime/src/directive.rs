//! [`DirectiveQueue`] – operator directives with a time-to-live.
//!
//! At most one directive is pending.  A newer directive replaces the older
//! one, a directive older than its TTL is discarded on the next
//! [`peek`](DirectiveQueue::peek), and a directive that a tick acted on is
//! [`consume`](DirectiveQueue::consume)d so it is applied exactly once.
//!
//! [`TrustPolicy`] decides which inbound chat lines become directives and
//! which are chat-control commands.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use blockmind_runtime::directive::{DirectiveConfig, DirectiveQueue, DirectiveStatus};
//!
//! let now = Instant::now();
//! let mut queue = DirectiveQueue::new(DirectiveConfig::default());
//! queue.enqueue("alice", "  go chop that tree  ", now);
//!
//! match queue.peek(now) {
//!     DirectiveStatus::Active(d) => assert_eq!(d.text, "go chop that tree"),
//!     other => panic!("unexpected {other:?}"),
//! }
//!
//! let later = now + Duration::from_secs(61);
//! assert!(matches!(queue.peek(later), DirectiveStatus::Expired(_)));
//! assert!(matches!(queue.peek(later), DirectiveStatus::Empty));
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectiveConfig {
    /// Whether chat lines are turned into directives at all.
    pub enabled: bool,
    pub ttl_ms: u64,
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 60_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directive
// ─────────────────────────────────────────────────────────────────────────────

/// A free-text instruction from an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Who issued it (a chat username, `console`, …).
    pub source: String,
    pub text: String,
    pub issued_at: Instant,
}

impl Directive {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }
}

/// Result of [`DirectiveQueue::peek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveStatus<'a> {
    Empty,
    Active(&'a Directive),
    /// The pending directive outlived its TTL and has been discarded.
    Expired(Directive),
}

#[derive(Debug, Clone)]
pub struct DirectiveQueue {
    config: DirectiveConfig,
    pending: Option<Directive>,
}

impl DirectiveQueue {
    pub fn new(config: DirectiveConfig) -> Self {
        Self {
            config,
            pending: None,
        }
    }

    pub fn config(&self) -> &DirectiveConfig {
        &self.config
    }

    /// Queue a directive, replacing any pending one.  Blank text is ignored
    /// and yields `None`.
    pub fn enqueue(&mut self, source: &str, text: &str, now: Instant) -> Option<&Directive> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        info!(source, text, "directive queued");
        self.pending = Some(Directive {
            source: source.to_string(),
            text: text.to_string(),
            issued_at: now,
        });
        self.pending.as_ref()
    }

    /// The pending directive, discarding it first if it has expired.
    pub fn peek(&mut self, now: Instant) -> DirectiveStatus<'_> {
        let ttl = Duration::from_millis(self.config.ttl_ms);
        match self.pending.take() {
            None => DirectiveStatus::Empty,
            Some(d) if d.age(now) > ttl => {
                info!(source = %d.source, text = %d.text, "directive expired");
                DirectiveStatus::Expired(d)
            }
            Some(d) => DirectiveStatus::Active(self.pending.insert(d)),
        }
    }

    /// The pending directive without any expiry check.
    pub fn pending(&self) -> Option<&Directive> {
        self.pending.as_ref()
    }

    /// Remove the pending directive after a tick applied it.
    pub fn consume(&mut self) -> Option<Directive> {
        self.pending.take()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trust policy
// ─────────────────────────────────────────────────────────────────────────────

/// How an inbound chat line should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundClass {
    /// A chat-control command; the text after the prefix.
    Command(String),
    Directive(String),
    Ignored,
}

/// Who may steer the agent over chat, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustPolicy {
    pub directives_enabled: bool,
    pub commands_enabled: bool,
    /// Trusted usernames.  Empty trusts everyone.
    pub admins: Vec<String>,
    pub command_prefix: String,
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            directives_enabled: true,
            commands_enabled: true,
            admins: Vec::new(),
            command_prefix: "!".to_string(),
        }
    }
}

impl TrustPolicy {
    pub fn is_trusted(&self, sender: &str) -> bool {
        self.admins.is_empty() || self.admins.iter().any(|a| a == sender)
    }

    /// Classify a chat line from `sender`.
    pub fn classify(&self, sender: &str, text: &str) -> InboundClass {
        let trimmed = text.trim();
        if trimmed.is_empty() || !self.is_trusted(sender) {
            return InboundClass::Ignored;
        }
        if !self.command_prefix.is_empty() && trimmed.starts_with(&self.command_prefix) {
            if !self.commands_enabled {
                return InboundClass::Ignored;
            }
            let command = trimmed[self.command_prefix.len()..].trim();
            if command.is_empty() {
                return InboundClass::Ignored;
            }
            return InboundClass::Command(command.to_string());
        }
        if self.directives_enabled {
            InboundClass::Directive(trimmed.to_string())
        } else {
            InboundClass::Ignored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_directive_replaces_pending() {
        let now = Instant::now();
        let mut queue = DirectiveQueue::new(DirectiveConfig::default());
        queue.enqueue("alice", "first", now);
        queue.enqueue("bob", "second", now);
        assert_eq!(queue.pending().map(|d| d.text.as_str()), Some("second"));
        assert_eq!(queue.pending().map(|d| d.source.as_str()), Some("bob"));
    }

    #[test]
    fn blank_directive_is_ignored() {
        let mut queue = DirectiveQueue::new(DirectiveConfig::default());
        assert!(queue.enqueue("alice", "   ", Instant::now()).is_none());
        assert!(queue.pending().is_none());
    }

    #[test]
    fn directive_alive_at_exact_ttl() {
        let now = Instant::now();
        let mut queue = DirectiveQueue::new(DirectiveConfig::default());
        queue.enqueue("alice", "wait here", now);
        assert!(matches!(
            queue.peek(now + Duration::from_millis(60_000)),
            DirectiveStatus::Active(_)
        ));
        assert!(matches!(
            queue.peek(now + Duration::from_millis(60_001)),
            DirectiveStatus::Expired(d) if d.text == "wait here"
        ));
    }

    #[test]
    fn consume_applies_once() {
        let now = Instant::now();
        let mut queue = DirectiveQueue::new(DirectiveConfig::default());
        queue.enqueue("alice", "dig", now);
        assert!(queue.consume().is_some());
        assert!(queue.consume().is_none());
        assert_eq!(queue.peek(now), DirectiveStatus::Empty);
    }

    #[test]
    fn prefixed_messages_are_commands_never_directives() {
        let policy = TrustPolicy::default();
        assert_eq!(
            policy.classify("alice", "!goal build a house"),
            InboundClass::Command("goal build a house".into())
        );
        assert_eq!(policy.classify("alice", "!"), InboundClass::Ignored);
        assert_eq!(
            policy.classify("alice", "  come here "),
            InboundClass::Directive("come here".into())
        );
    }

    #[test]
    fn admin_list_restricts_senders() {
        let policy = TrustPolicy {
            admins: vec!["alice".into()],
            ..TrustPolicy::default()
        };
        assert_eq!(policy.classify("mallory", "dig down"), InboundClass::Ignored);
        assert_eq!(policy.classify("mallory", "!status"), InboundClass::Ignored);
        assert!(matches!(policy.classify("alice", "dig"), InboundClass::Directive(_)));
    }

    #[test]
    fn disabled_ingestion_ignores_plain_text() {
        let policy = TrustPolicy {
            directives_enabled: false,
            ..TrustPolicy::default()
        };
        assert_eq!(policy.classify("alice", "follow me"), InboundClass::Ignored);
        assert!(matches!(policy.classify("alice", "!help"), InboundClass::Command(_)));
    }
}
