//! `blockmind-memory` – The Audit Trail.
//!
//! Records what the agent decided and what happened, and optionally keeps a
//! copy on disk so a restarted agent remembers its goal.
//!
//! # Modules
//!
//! - [`event_log`] – [`EventLog`][event_log::EventLog]: a bounded,
//!   append-only ring buffer of [`MemoryEvent`][event_log::MemoryEvent]s.
//!   The newest entries are handed to the planner as recent history.
//! - [`state_store`] – [`StateStore`][state_store::StateStore]: SQLite
//!   snapshot persistence for the runtime goal and the recent event log.

pub mod event_log;
pub mod state_store;

pub use event_log::{EventKind, EventLog, MemoryEvent};
pub use state_store::{StateStore, StoreError};
