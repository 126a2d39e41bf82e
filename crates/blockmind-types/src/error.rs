use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionKind;

/// Global error type spanning validation rejections, safety vetoes, planner
/// failures, and world-interface faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentError {
    #[error("Action Not Allowed: {0}")]
    ActionNotAllowed(ActionKind),

    #[error("Unknown Action: {0}")]
    UnknownAction(String),

    #[error("Malformed {action} payload: {details}")]
    MalformedPayload { action: ActionKind, details: String },

    #[error("Vetoed by {rule}: {details}")]
    Vetoed { rule: String, details: String },

    #[error("Planner Error: {0}")]
    PlannerFailed(String),

    #[error("World Interface Error: {0}")]
    World(String),

    #[error("Action {action} timed out after {timeout_ms} ms")]
    Timeout { action: ActionKind, timeout_ms: u64 },

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl AgentError {
    /// `true` for errors that reject a decision before it reaches the world.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AgentError::ActionNotAllowed(_)
                | AgentError::UnknownAction(_)
                | AgentError::MalformedPayload { .. }
        )
    }
}
