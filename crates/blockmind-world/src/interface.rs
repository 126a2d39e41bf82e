//! The world contract.
//!
//! A backend translates [`Action`]s into whatever protocol the outside world
//! speaks and reports the outcome as a structured [`ActionResult`].  Payload
//! shapes are already enforced by the [`Action`] enum, so a backend never
//! has to guess at field names.

use async_trait::async_trait;
use blockmind_types::{Action, ActionResult, AgentError, Observation};

/// Every world backend must implement this trait.
///
/// # Contract
///
/// * `observe` – produce a fresh, immutable snapshot.  Fails with
///   [`AgentError::World`] when the world is unreachable.
///
/// * `execute` – perform one primitive action.  Failures are reported in the
///   returned [`ActionResult`] (`ok: false`) rather than as an `Err`, so the
///   caller can record them uniformly.
#[async_trait]
pub trait WorldInterface: Send + Sync {
    async fn observe(&self) -> Result<Observation, AgentError>;

    async fn execute(&self, action: &Action) -> ActionResult;
}
