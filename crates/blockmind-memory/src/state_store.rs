//! Agent state snapshots.
//!
//! Persists the runtime goal and the recent event log to a local SQLite
//! database so a restarted agent picks up where it left off.
//!
//! # Storage layout
//!
//! | table           | columns                          | description              |
//! |-----------------|----------------------------------|--------------------------|
//! | `agent_goal`    | `id`, `goal`, `updated_at`       | single-row goal slot     |
//! | `memory_events` | `id`, `at`, `kind`, `data`       | event log snapshot       |
//!
//! # Example
//!
//! ```rust
//! use blockmind_memory::event_log::{EventKind, MemoryEvent};
//! use blockmind_memory::state_store::StateStore;
//! use serde_json::json;
//!
//! let store = StateStore::open_in_memory().unwrap();
//! store.save_goal("build a shelter").unwrap();
//! assert_eq!(store.load_goal().unwrap().as_deref(), Some("build a shelter"));
//!
//! let events = vec![MemoryEvent::new(EventKind::Decision, json!({"action": "observe"}))];
//! store.save_events(&events).unwrap();
//! assert_eq!(store.load_events(10).unwrap(), events);
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::event_log::{EventKind, MemoryEvent};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// StateStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_goal (
                id         INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
                goal       TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS memory_events (
                id   TEXT NOT NULL PRIMARY KEY,
                at   TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn save_goal(&self, goal: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO agent_goal (id, goal, updated_at) VALUES (1, ?1, ?2)",
            params![goal, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_goal(&self) -> Result<Option<String>, StoreError> {
        let goal = self
            .conn
            .query_row("SELECT goal FROM agent_goal WHERE id = 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(goal)
    }

    /// Replace the stored event snapshot with `events`.
    pub fn save_events(&self, events: &[MemoryEvent]) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM memory_events", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO memory_events (id, at, kind, data)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.id.to_string(),
                    event.at.to_rfc3339(),
                    event.kind.as_str(),
                    serde_json::to_string(&event.data)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = events.len(), "event snapshot saved");
        Ok(())
    }

    /// The newest `limit` stored events, oldest first.
    pub fn load_events(&self, limit: usize) -> Result<Vec<MemoryEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, at, kind, data FROM (
                 SELECT rowid AS seq, id, at, kind, data FROM memory_events
                 ORDER BY seq DESC
                 LIMIT ?1
             ) ORDER BY seq ASC",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, at, kind, data) = row?;
            let id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let at = at
                .parse::<DateTime<Utc>>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let kind: EventKind = serde_json::from_value(Value::String(kind))?;
            let data: Value = serde_json::from_str(&data)?;
            events.push(MemoryEvent { id, at, kind, data });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_goal_is_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.load_goal().unwrap(), None);
    }

    #[test]
    fn goal_is_overwritten() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_goal("first").unwrap();
        store.save_goal("second").unwrap();
        assert_eq!(store.load_goal().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn events_round_trip_and_snapshot_replaces() {
        let store = StateStore::open_in_memory().unwrap();
        let first = vec![MemoryEvent::new(EventKind::TickError, json!({"error": "x"}))];
        store.save_events(&first).unwrap();

        let second = vec![
            MemoryEvent::new(EventKind::Decision, json!({"action": "move"})),
            MemoryEvent::new(EventKind::ActionResult, json!({"ok": true})),
        ];
        store.save_events(&second).unwrap();
        assert_eq!(store.load_events(10).unwrap(), second);
    }

    #[test]
    fn load_events_keeps_newest() {
        let store = StateStore::open_in_memory().unwrap();
        let events: Vec<MemoryEvent> = (0..5)
            .map(|i| {
                let mut e = MemoryEvent::new(EventKind::Decision, json!({ "n": i }));
                e.at = DateTime::<Utc>::from_timestamp(1_700_000_000 + i, 0).unwrap();
                e
            })
            .collect();
        store.save_events(&events).unwrap();
        let loaded = store.load_events(2).unwrap();
        assert_eq!(loaded, events[3..].to_vec());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = StateStore::open(&path).unwrap();
            store.save_goal("persisted").unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.load_goal().unwrap().as_deref(), Some("persisted"));
    }
}
