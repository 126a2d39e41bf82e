//! `blockmind-kernel` – Safety & Enforcement
//!
//! The brainstem of BlockMind.  It does not think; it enforces rules and keeps
//! score of whether the agent is actually getting anywhere.
//!
//! # Modules
//!
//! - [`action_policy`] – [`ActionPolicy`][action_policy::ActionPolicy]:
//!   the statically configured allow-list every final decision must pass.
//! - [`safety_rules`] – [`SafetyVerifier`][safety_rules::SafetyVerifier]:
//!   a rule engine that vetoes unsafe decisions, such as digging anything
//!   other than a recognised harvest block.
//! - [`decision_gate`] – [`DecisionGate`][decision_gate::DecisionGate]:
//!   the single interception point combining the allow-list and the rules.
//! - [`watchdog`] – [`ProgressWatchdog`][watchdog::ProgressWatchdog]:
//!   detects stalls and repeated failures and temporarily blocks actions.
//! - [`expiring`] – [`ExpiringMap`][expiring::ExpiringMap]:
//!   key → expiry map with lazy eviction, used for every cooldown.

pub mod action_policy;
pub mod decision_gate;
pub mod expiring;
pub mod safety_rules;
pub mod watchdog;

pub use action_policy::ActionPolicy;
pub use decision_gate::DecisionGate;
pub use expiring::ExpiringMap;
pub use safety_rules::{DestructiveActionRule, Rule, SafetyVerifier};
pub use watchdog::{ProgressWatchdog, WatchdogConfig, WatchdogStatus};
