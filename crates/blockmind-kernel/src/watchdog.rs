//! [`ProgressWatchdog`] – stall and failure monitor for the tick loop.
//!
//! The agent loop reports every decision and every action outcome here.  The
//! watchdog answers three questions:
//!
//! - Has the agent made measurable progress recently?
//!   ([`ProgressWatchdog::should_force_recovery`])
//! - Is the same decision being issued over and over?
//!   ([`ProgressWatchdog::same_decision_exceeded`])
//! - Should an action be skipped for a while because it keeps failing?
//!   ([`ProgressWatchdog::is_blocked`])
//!
//! All methods take an explicit `now` so behaviour is deterministic under
//! test.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use blockmind_types::{ActionKind, ActionResult, Observation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::expiring::ExpiringMap;

/// Substring of the world error raised when a crafting window never opens.
const CRAFT_WINDOW_ERROR: &str = "windowOpen did not fire";

/// Number of error characters kept in a failure key.
const FAILURE_KEY_ERROR_CHARS: usize = 80;

/// Floor applied to every temporary action block.
const MIN_BLOCK: Duration = Duration::from_secs(3);

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Time without progress after which recovery is forced.
    pub stale_after_ms: u64,
    /// Consecutive ticks without progress after which recovery is forced.
    pub max_no_progress_ticks: u32,
    /// Identical consecutive decisions after which recovery is forced.
    pub same_decision_limit: u32,
    /// Failures with the same error before the action is blocked.
    pub failure_threshold: u32,
    pub failure_block_ms: u64,
    pub craft_window_block_ms: u64,
    /// Minimum displacement for a successful `move` to count as progress.
    pub min_move_progress: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 45_000,
            max_no_progress_ticks: 40,
            same_decision_limit: 12,
            failure_threshold: 3,
            failure_block_ms: 45_000,
            craft_window_block_ms: 60_000,
            min_move_progress: 0.2,
        }
    }
}

/// Point-in-time counters, for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub since_progress_ms: u64,
    pub no_progress_ticks: u32,
    pub same_decision_count: u32,
    /// Currently blocked actions with their remaining block time.
    pub blocked: Vec<(ActionKind, u64)>,
}

// ────────────────────────────────────────────────────────────────────────────
// ProgressWatchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks decision repetition, forward progress and per-action failures.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use blockmind_kernel::watchdog::{ProgressWatchdog, WatchdogConfig};
/// use blockmind_types::ActionKind;
///
/// let t0 = Instant::now();
/// let mut wd = ProgressWatchdog::new(WatchdogConfig::default(), t0);
///
/// for _ in 0..3 {
///     wd.record_failure(ActionKind::Dig, "no path to block", t0);
/// }
/// assert!(wd.is_blocked(ActionKind::Dig, t0 + Duration::from_secs(10)));
/// assert!(!wd.is_blocked(ActionKind::Dig, t0 + Duration::from_secs(46)));
/// ```
#[derive(Debug, Clone)]
pub struct ProgressWatchdog {
    config: WatchdogConfig,
    last_progress_at: Instant,
    last_decision_signature: Option<String>,
    same_decision_count: u32,
    no_progress_ticks: u32,
    blocked_actions: ExpiringMap<ActionKind>,
    failure_counts: HashMap<String, u32>,
}

impl ProgressWatchdog {
    pub fn new(config: WatchdogConfig, now: Instant) -> Self {
        Self {
            config,
            last_progress_at: now,
            last_decision_signature: None,
            same_decision_count: 0,
            no_progress_ticks: 0,
            blocked_actions: ExpiringMap::new(),
            failure_counts: HashMap::new(),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Record the signature of this tick's decision and return how many
    /// times in a row it has now been seen.
    pub fn record_decision(&mut self, signature: &str) -> u32 {
        if self.last_decision_signature.as_deref() == Some(signature) {
            self.same_decision_count += 1;
        } else {
            self.last_decision_signature = Some(signature.to_string());
            self.same_decision_count = 1;
        }
        self.same_decision_count
    }

    /// Classify an executed action as progress or not, updating the stall
    /// counters.  Returns `true` on progress.
    pub fn record_progress(
        &mut self,
        kind: ActionKind,
        before: &Observation,
        after: &Observation,
        result: &ActionResult,
        now: Instant,
    ) -> bool {
        let progressed = result.ok
            && (kind.is_stateful()
                || (kind == ActionKind::Move
                    && before.position.distance_to(&after.position)
                        >= self.config.min_move_progress));
        if progressed {
            self.last_progress_at = now;
            self.no_progress_ticks = 0;
        } else {
            self.no_progress_ticks += 1;
        }
        progressed
    }

    /// `true` once the agent has gone too long, or too many ticks, without
    /// progress.
    pub fn should_force_recovery(&self, now: Instant) -> bool {
        let stale = now.saturating_duration_since(self.last_progress_at);
        stale > Duration::from_millis(self.config.stale_after_ms)
            || self.no_progress_ticks >= self.config.max_no_progress_ticks
    }

    pub fn same_decision_exceeded(&self) -> bool {
        self.same_decision_count >= self.config.same_decision_limit
    }

    /// Reset the stall clock after a recovery has been issued.
    pub fn mark_recovered(&mut self, now: Instant) {
        self.last_progress_at = now;
        self.no_progress_ticks = 0;
        self.same_decision_count = 0;
        self.last_decision_signature = None;
    }

    /// Count a failure of `kind` with `error`.  Returns the block duration
    /// when this failure caused `kind` to be blocked.
    pub fn record_failure(&mut self, kind: ActionKind, error: &str, now: Instant) -> Option<Duration> {
        let snippet: String = error.chars().take(FAILURE_KEY_ERROR_CHARS).collect();
        let key = format!("{kind}:{snippet}");
        let count = self.failure_counts.entry(key.clone()).or_insert(0);
        *count += 1;

        let mut blocked = None;
        if *count >= self.config.failure_threshold {
            *count = 0;
            let ttl = Duration::from_millis(self.config.failure_block_ms);
            blocked = Some(self.block_action(kind, ttl, &key, now));
        }
        if error.contains(CRAFT_WINDOW_ERROR) {
            let ttl = Duration::from_millis(self.config.craft_window_block_ms);
            self.block_action(ActionKind::Craft, ttl, "craft window timeout", now);
            if kind == ActionKind::Craft {
                blocked = Some(ttl.max(MIN_BLOCK));
            }
        }
        blocked
    }

    /// Block `kind` for at least [`MIN_BLOCK`].
    pub fn block_action(&mut self, kind: ActionKind, ttl: Duration, reason: &str, now: Instant) -> Duration {
        let ttl = ttl.max(MIN_BLOCK);
        self.blocked_actions.insert_for(kind, ttl, now);
        warn!(action = %kind, block_ms = ttl.as_millis() as u64, reason, "action blocked temporarily");
        ttl
    }

    pub fn is_blocked(&mut self, kind: ActionKind, now: Instant) -> bool {
        self.blocked_actions.contains(&kind, now)
    }

    /// Forget all failure counts; called after any successful action.
    pub fn clear_failures(&mut self) {
        self.failure_counts.clear();
    }

    pub fn failure_count(&self, kind: ActionKind, error: &str) -> u32 {
        let snippet: String = error.chars().take(FAILURE_KEY_ERROR_CHARS).collect();
        self.failure_counts
            .get(&format!("{kind}:{snippet}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn no_progress_ticks(&self) -> u32 {
        self.no_progress_ticks
    }

    pub fn same_decision_count(&self) -> u32 {
        self.same_decision_count
    }

    pub fn last_progress_at(&self) -> Instant {
        self.last_progress_at
    }

    pub fn status(&self, now: Instant) -> WatchdogStatus {
        let mut blocked: Vec<(ActionKind, u64)> = self
            .blocked_actions
            .active(now)
            .into_iter()
            .map(|(kind, left)| (kind, left.as_millis() as u64))
            .collect();
        blocked.sort();
        WatchdogStatus {
            since_progress_ms: now.saturating_duration_since(self.last_progress_at).as_millis()
                as u64,
            no_progress_ticks: self.no_progress_ticks,
            same_decision_count: self.same_decision_count,
            blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmind_types::Position;
    use serde_json::json;

    fn watchdog(t0: Instant) -> ProgressWatchdog {
        ProgressWatchdog::new(WatchdogConfig::default(), t0)
    }

    #[test]
    fn repeated_signatures_are_counted() {
        let mut wd = watchdog(Instant::now());
        assert_eq!(wd.record_decision("a"), 1);
        assert_eq!(wd.record_decision("a"), 2);
        assert_eq!(wd.record_decision("b"), 1);
        for _ in 0..11 {
            wd.record_decision("b");
        }
        assert!(wd.same_decision_exceeded());
    }

    #[test]
    fn stateful_success_is_progress() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        let obs = Observation::default();
        let ok = ActionResult::success(json!({}));
        assert!(wd.record_progress(ActionKind::Craft, &obs, &obs, &ok, t0));
        assert!(!wd.record_progress(ActionKind::Observe, &obs, &obs, &ok, t0));
        assert_eq!(wd.no_progress_ticks(), 1);
    }

    #[test]
    fn failed_stateful_action_is_not_progress() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        let obs = Observation::default();
        let failed = ActionResult::failure("no path");
        assert!(!wd.record_progress(ActionKind::Dig, &obs, &obs, &failed, t0));
    }

    #[test]
    fn move_needs_minimum_displacement() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        let before = Observation::at(Position::new(0.0, 64.0, 0.0));
        let nudged = Observation::at(Position::new(0.1, 64.0, 0.0));
        let moved = Observation::at(Position::new(0.5, 64.0, 0.0));
        let ok = ActionResult::success(json!({}));
        assert!(!wd.record_progress(ActionKind::Move, &before, &nudged, &ok, t0));
        assert!(wd.record_progress(ActionKind::Move, &before, &moved, &ok, t0));
        assert_eq!(wd.no_progress_ticks(), 0);
    }

    #[test]
    fn recovery_after_stale_duration() {
        let t0 = Instant::now();
        let wd = watchdog(t0);
        assert!(!wd.should_force_recovery(t0 + Duration::from_secs(45)));
        assert!(wd.should_force_recovery(t0 + Duration::from_millis(45_001)));
    }

    #[test]
    fn recovery_after_no_progress_ticks() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        let obs = Observation::default();
        let ok = ActionResult::success(json!({}));
        for _ in 0..40 {
            wd.record_progress(ActionKind::Observe, &obs, &obs, &ok, t0);
        }
        assert!(wd.should_force_recovery(t0));
        wd.mark_recovered(t0);
        assert!(!wd.should_force_recovery(t0));
    }

    #[test]
    fn third_identical_failure_blocks_and_resets_counter() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        assert_eq!(wd.record_failure(ActionKind::Dig, "cannot dig", t0), None);
        assert_eq!(wd.record_failure(ActionKind::Dig, "cannot dig", t0), None);
        assert_eq!(
            wd.record_failure(ActionKind::Dig, "cannot dig", t0),
            Some(Duration::from_secs(45))
        );
        assert_eq!(wd.failure_count(ActionKind::Dig, "cannot dig"), 0);
        assert!(wd.is_blocked(ActionKind::Dig, t0 + Duration::from_secs(1)));
    }

    #[test]
    fn different_errors_count_separately() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        wd.record_failure(ActionKind::Dig, "a", t0);
        wd.record_failure(ActionKind::Dig, "b", t0);
        wd.record_failure(ActionKind::Dig, "a", t0);
        assert!(!wd.is_blocked(ActionKind::Dig, t0));
        wd.clear_failures();
        assert_eq!(wd.failure_count(ActionKind::Dig, "a"), 0);
    }

    #[test]
    fn craft_window_timeout_blocks_craft_immediately() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        let blocked = wd.record_failure(
            ActionKind::Craft,
            "Event windowOpen did not fire within timeout of 20000ms",
            t0,
        );
        assert_eq!(blocked, Some(Duration::from_secs(60)));
        assert!(wd.is_blocked(ActionKind::Craft, t0 + Duration::from_secs(59)));
    }

    #[test]
    fn block_floor_is_three_seconds() {
        let t0 = Instant::now();
        let mut wd = watchdog(t0);
        let ttl = wd.block_action(ActionKind::Chat, Duration::from_millis(10), "test", t0);
        assert_eq!(ttl, Duration::from_secs(3));
        let status = wd.status(t0 + Duration::from_secs(1));
        assert_eq!(status.blocked, vec![(ActionKind::Chat, 2000)]);
    }
}
