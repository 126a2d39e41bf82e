//! Bounded audit trail of agent activity.
//!
//! Every decision, action result and state transition is appended to an
//! [`EventLog`].  Once the log is full the oldest entry is evicted first.
//! The log is diagnostic context only; nothing reads it back as
//! authoritative state.
//!
//! # Example
//!
//! ```rust
//! use blockmind_memory::event_log::{EventKind, EventLog};
//! use serde_json::json;
//!
//! let mut log = EventLog::with_capacity(2);
//! log.push(EventKind::Decision, json!({"action": "observe"}));
//! log.push(EventKind::ActionResult, json!({"ok": true}));
//! log.push(EventKind::Decision, json!({"action": "move"}));
//!
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.recent(1)[0].data["action"], "move");
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of events retained.
pub const DEFAULT_CAPACITY: usize = 250;

/// Category of a [`MemoryEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Decision,
    ActionResult,
    ObjectiveActivated,
    ObjectiveCleared,
    DirectiveQueued,
    DirectiveExpired,
    DirectiveApplied,
    PlannerQueued,
    PlannerError,
    WatchdogRecovery,
    ActionBlocked,
    GoalUpdate,
    AutoJoin,
    ServerContext,
    SelfReport,
    TickError,
    StateRestored,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Decision => "decision",
            EventKind::ActionResult => "action_result",
            EventKind::ObjectiveActivated => "objective_activated",
            EventKind::ObjectiveCleared => "objective_cleared",
            EventKind::DirectiveQueued => "directive_queued",
            EventKind::DirectiveExpired => "directive_expired",
            EventKind::DirectiveApplied => "directive_applied",
            EventKind::PlannerQueued => "planner_queued",
            EventKind::PlannerError => "planner_error",
            EventKind::WatchdogRecovery => "watchdog_recovery",
            EventKind::ActionBlocked => "action_blocked",
            EventKind::GoalUpdate => "goal_update",
            EventKind::AutoJoin => "auto_join",
            EventKind::ServerContext => "server_context",
            EventKind::SelfReport => "self_report",
            EventKind::TickError => "tick_error",
            EventKind::StateRestored => "state_restored",
        }
    }
}

/// A single audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub data: Value,
}

impl MemoryEvent {
    /// Construct an event stamped with a fresh UUID and the current UTC time.
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            kind,
            data,
        }
    }
}

/// Append-only ring buffer of [`MemoryEvent`]s.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<MemoryEvent>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    /// A log holding at most `capacity` events (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a new event, evicting the oldest one when full.
    pub fn push(&mut self, kind: EventKind, data: Value) -> &MemoryEvent {
        self.append(MemoryEvent::new(kind, data))
    }

    /// Append an already constructed event (used when restoring a snapshot).
    pub fn append(&mut self, event: MemoryEvent) -> &MemoryEvent {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        // just pushed, so the back is present
        &self.events[self.events.len() - 1]
    }

    /// The newest `limit` events in chronological order.
    pub fn recent(&self, limit: usize) -> Vec<&MemoryEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).collect()
    }

    /// Owned copy of [`EventLog::recent`], for handing to another task.
    pub fn recent_owned(&self, limit: usize) -> Vec<MemoryEvent> {
        self.recent(limit).into_iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEvent> {
        self.events.iter()
    }

    /// Newest event of `kind`, if any.
    pub fn last_of(&self, kind: EventKind) -> Option<&MemoryEvent> {
        self.events.iter().rev().find(|e| e.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn never_exceeds_capacity_and_evicts_oldest_first() {
        let mut log = EventLog::with_capacity(3);
        for i in 0..10 {
            log.push(EventKind::Decision, json!({ "n": i }));
            assert!(log.len() <= 3);
        }
        let ns: Vec<i64> = log
            .iter()
            .map(|e| e.data["n"].as_i64().unwrap_or(-1))
            .collect();
        assert_eq!(ns, vec![7, 8, 9]);
    }

    #[test]
    fn recent_returns_newest_in_order() {
        let mut log = EventLog::default();
        for i in 0..5 {
            log.push(EventKind::ActionResult, json!({ "n": i }));
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].data["n"], 3);
        assert_eq!(recent[1].data["n"], 4);
        assert_eq!(log.recent(100).len(), 5);
    }

    #[test]
    fn last_of_finds_newest_matching_kind() {
        let mut log = EventLog::default();
        log.push(EventKind::GoalUpdate, json!({"goal": "a"}));
        log.push(EventKind::Decision, json!({}));
        log.push(EventKind::GoalUpdate, json!({"goal": "b"}));
        assert_eq!(log.last_of(EventKind::GoalUpdate).map(|e| &e.data["goal"]), Some(&json!("b")));
        assert!(log.last_of(EventKind::TickError).is_none());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = EventLog::with_capacity(0);
        log.push(EventKind::Decision, json!({}));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let value = serde_json::to_value(EventKind::DirectiveExpired).unwrap();
        assert_eq!(value, json!(EventKind::DirectiveExpired.as_str()));
    }
}
