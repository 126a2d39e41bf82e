//! [`LoopGuard`] – repeated-decision detector.
//!
//! Detects when arbitration keeps producing the exact same action (same kind
//! and same payload) tick after tick, and signals that the anti-stall
//! override should step in.
//!
//! # Algorithm
//!
//! The guard keeps a rolling window of the last *N* decision signatures.
//! After each [`LoopGuard::record`] call it checks whether the most recent
//! `threshold` entries are all identical.  If they are, [`record`] returns
//! `true` and the caller should replace the decision and [`reset`] the guard.
//!
//! [`record`]: LoopGuard::record
//! [`reset`]: LoopGuard::reset
//!
//! # Example
//!
//! ```rust
//! use blockmind_runtime::loop_guard::LoopGuard;
//!
//! let mut guard = LoopGuard::new(3);
//!
//! assert!(!guard.record(r#"{"action":"observe"}"#));
//! assert!(!guard.record(r#"{"action":"observe"}"#));
//! assert!(guard.record(r#"{"action":"observe"}"#)); // third repeat → stuck!
//!
//! guard.reset();
//! assert!(!guard.record(r#"{"action":"observe"}"#));
//! ```

use std::collections::VecDeque;

/// Consecutive identical decisions that trigger the anti-stall override.
pub const DEFAULT_THRESHOLD: usize = 4;

// ─────────────────────────────────────────────────────────────────────────────
// LoopGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Detects when the agent is stuck repeating one decision.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    /// Number of consecutive identical records that triggers detection.
    threshold: usize,
    /// Rolling window of the most recent decision signatures.
    history: VecDeque<String>,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl LoopGuard {
    /// Create a new guard.  A `threshold` of 0 is treated as 1.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            threshold,
            history: VecDeque::with_capacity(threshold),
        }
    }

    /// Record the signature of the decision just made.
    ///
    /// Returns `true` when the same signature has been recorded `threshold`
    /// times in a row.
    pub fn record(&mut self, signature: &str) -> bool {
        self.history.push_back(signature.to_string());
        while self.history.len() > self.threshold {
            self.history.pop_front();
        }
        self.is_stuck()
    }

    /// `true` when the window is full and every entry is identical.
    pub fn is_stuck(&self) -> bool {
        if self.history.len() < self.threshold {
            return false;
        }
        let first = &self.history[0];
        self.history.iter().all(|s| s == first)
    }

    /// The signature currently repeating, if any.
    pub fn repeated(&self) -> Option<&str> {
        self.is_stuck().then(|| self.history[0].as_str())
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Clear all recorded history.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
