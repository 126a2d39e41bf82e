//! [`DecisionGate`] – single interception point between arbitration and the
//! world.
//!
//! Two independent checks guard every tick:
//!
//! 1. **Destructive screen** ([`DecisionGate::screen`]): the decision is run
//!    through the [`SafetyVerifier`].  A vetoed decision is rewritten in place
//!    to `observe` so the cascade can continue with a harmless action.
//!
//! 2. **Allow-list** ([`DecisionGate::authorize`]): the final action must be
//!    in the [`ActionPolicy`].  This check fails fast with
//!    [`AgentError::ActionNotAllowed`]; the decision is never rewritten.
//!
//! # Example
//!
//! ```
//! use blockmind_kernel::{ActionPolicy, DecisionGate, DestructiveActionRule, SafetyVerifier};
//! use blockmind_types::{Action, ActionKind, Decision, DecisionSource, Observation, Position};
//!
//! let mut verifier = SafetyVerifier::new();
//! verifier.add_rule(Box::new(DestructiveActionRule::default()));
//! let gate = DecisionGate::new(ActionPolicy::from_kinds([ActionKind::Observe, ActionKind::Dig]), verifier);
//!
//! let mut decision = Decision::new(
//!     Action::dig_at(Position::new(0.0, 63.0, 0.0)),
//!     "dig down",
//!     DecisionSource::Planner,
//! );
//! assert!(gate.screen(&mut decision, &Observation::default()).is_some());
//! assert_eq!(decision.kind(), ActionKind::Observe);
//! assert!(gate.authorize(&decision.action).is_ok());
//! ```

use blockmind_types::{Action, AgentError, Decision, DecisionSource, Observation};
use tracing::warn;

use crate::action_policy::ActionPolicy;
use crate::safety_rules::SafetyVerifier;

pub struct DecisionGate {
    policy: ActionPolicy,
    verifier: SafetyVerifier,
}

impl DecisionGate {
    pub fn new(policy: ActionPolicy, verifier: SafetyVerifier) -> Self {
        Self { policy, verifier }
    }

    pub fn policy(&self) -> &ActionPolicy {
        &self.policy
    }

    /// Check `action` against the allow-list.
    ///
    /// # Errors
    ///
    /// [`AgentError::ActionNotAllowed`] when the action kind is not allowed.
    pub fn authorize(&self, action: &Action) -> Result<(), AgentError> {
        self.policy.check(action.kind())
    }

    /// Run the safety rules over `decision`.  On a veto the decision becomes
    /// an `observe` override and the veto error is returned for the audit
    /// trail.
    pub fn screen(&self, decision: &mut Decision, observation: &Observation) -> Option<AgentError> {
        let err = self.verifier.verify(decision, observation).err()?;
        let reason = match &err {
            AgentError::Vetoed { details, .. } => details.clone(),
            other => other.to_string(),
        };
        warn!(action = %decision.kind(), veto = %reason, "destructive action blocked");
        decision.overwrite(
            Action::Observe,
            format!("Destructive action blocked: {reason}"),
            DecisionSource::Override,
        );
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety_rules::DestructiveActionRule;
    use blockmind_types::{ActionKind, BlockSnapshot, Position};

    fn gate(policy: ActionPolicy) -> DecisionGate {
        let mut verifier = SafetyVerifier::new();
        verifier.add_rule(Box::new(DestructiveActionRule::default()));
        DecisionGate::new(policy, verifier)
    }

    #[test]
    fn disallowed_action_fails_authorization() {
        let gate = gate(ActionPolicy::from_kinds([ActionKind::Observe]));
        let err = gate.authorize(&Action::chat("hi")).unwrap_err();
        assert_eq!(err, AgentError::ActionNotAllowed(ActionKind::Chat));
    }

    #[test]
    fn safe_dig_passes_screen_untouched() {
        let gate = gate(ActionPolicy::allow_all());
        let log = Position::new(1.0, 64.0, 1.0);
        let mut obs = Observation::default();
        obs.blocks.push(BlockSnapshot::new("spruce_log", log, 1.5));
        let mut decision = Decision::new(Action::dig_at(log), "chop", DecisionSource::Objective);
        let before = decision.clone();
        assert!(gate.screen(&mut decision, &obs).is_none());
        assert_eq!(decision, before);
    }

    #[test]
    fn vetoed_decision_becomes_observe_override() {
        let gate = gate(ActionPolicy::allow_all());
        let mut decision = Decision::new(
            Action::dig_at(Position::new(0.0, 63.0, 0.0)),
            "dig",
            DecisionSource::Planner,
        );
        let err = gate.screen(&mut decision, &Observation::default());
        assert!(matches!(err, Some(AgentError::Vetoed { .. })));
        assert_eq!(decision.action, Action::Observe);
        assert_eq!(decision.source, DecisionSource::Override);
        assert!(decision.reason.starts_with("Destructive action blocked:"));
    }
}
