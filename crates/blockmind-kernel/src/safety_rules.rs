//! [`SafetyVerifier`] – decision veto rule engine.
//!
//! Before a [`Decision`] is executed, pass it through
//! [`SafetyVerifier::verify`] together with the observation it was made
//! against.  Every registered [`Rule`] is evaluated in order; the first
//! violation returns [`AgentError::Vetoed`].
//!
//! One built-in rule is provided:
//! - [`DestructiveActionRule`] – rejects `dig`/`break` unless the target is a
//!   recognised safe-harvest block, and rejects every `place`.

use blockmind_types::catalog;
use blockmind_types::{Action, AgentError, Decision, Observation};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single safety invariant a decision must satisfy.
///
/// Implement this trait to create custom rules and add them to a
/// [`SafetyVerifier`] via [`SafetyVerifier::add_rule`].
pub trait Rule: Send + Sync {
    /// Human-readable name used in veto messages.
    fn name(&self) -> &str;

    /// Return `Ok(())` when the decision satisfies the invariant, or
    /// [`AgentError::Vetoed`] when it is violated.
    fn check(&self, decision: &Decision, observation: &Observation) -> Result<(), AgentError>;
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that validates a [`Decision`] against all registered
/// [`Rule`]s.
///
/// # Example
///
/// ```
/// use blockmind_kernel::safety_rules::{DestructiveActionRule, SafetyVerifier};
/// use blockmind_types::{Action, BlockSnapshot, Decision, DecisionSource, Observation, Position};
///
/// let mut verifier = SafetyVerifier::new();
/// verifier.add_rule(Box::new(DestructiveActionRule::default()));
///
/// let log = Position::new(2.0, 64.0, 0.0);
/// let stone = Position::new(0.0, 63.0, 0.0);
/// let mut obs = Observation::default();
/// obs.blocks.push(BlockSnapshot::new("oak_log", log, 2.0));
/// obs.blocks.push(BlockSnapshot::new("stone", stone, 1.0));
///
/// let chop = Decision::new(Action::dig_at(log), "chop", DecisionSource::Planner);
/// assert!(verifier.verify(&chop, &obs).is_ok());
///
/// let mine = Decision::new(Action::dig_at(stone), "mine", DecisionSource::Planner);
/// assert!(verifier.verify(&mine, &obs).is_err());
/// ```
#[derive(Default)]
pub struct SafetyVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl SafetyVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    /// Returns the first [`AgentError::Vetoed`] encountered, or `Ok(())`
    /// when all rules pass.
    pub fn verify(&self, decision: &Decision, observation: &Observation) -> Result<(), AgentError> {
        for rule in &self.rules {
            rule.check(decision, observation)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Vetoes terrain-altering actions that are not known to be harmless.
///
/// - `dig`/`break` pass only when the observation shows a safe-harvest block
///   (logs, melon, pumpkin) at the target cell.
/// - `place` never passes.
///
/// Setting `allow_destructive` disables the rule entirely.
#[derive(Debug, Clone, Default)]
pub struct DestructiveActionRule {
    pub allow_destructive: bool,
}

impl DestructiveActionRule {
    fn veto(&self, details: String) -> AgentError {
        AgentError::Vetoed {
            rule: self.name().to_string(),
            details,
        }
    }
}

impl Rule for DestructiveActionRule {
    fn name(&self) -> &str {
        "destructive_action"
    }

    fn check(&self, decision: &Decision, observation: &Observation) -> Result<(), AgentError> {
        if self.allow_destructive {
            return Ok(());
        }
        match &decision.action {
            Action::Dig(target) | Action::Break(target) => {
                let position = target.position();
                match observation.block_at(&position) {
                    Some(block) if catalog::is_safe_harvest_block(&block.name) => Ok(()),
                    Some(block) => Err(self.veto(format!(
                        "{} at {} is not a safe harvest block",
                        block.name,
                        position.block_key()
                    ))),
                    None => Err(self.veto(format!(
                        "unknown block at {}",
                        position.block_key()
                    ))),
                }
            }
            Action::Place(target) => Err(self.veto(format!(
                "placement at {} is not allow-listed",
                target.reference.block_key()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockmind_types::{BlockSnapshot, DecisionSource, ItemStack, PlaceTarget, Position};

    fn verifier() -> SafetyVerifier {
        let mut v = SafetyVerifier::new();
        v.add_rule(Box::new(DestructiveActionRule::default()));
        v
    }

    fn place() -> Action {
        Action::Place(PlaceTarget {
            reference: Position::new(1.0, 63.0, 0.0),
            face: Position::new(0.0, 1.0, 0.0),
        })
    }

    #[test]
    fn empty_verifier_passes_everything() {
        let v = SafetyVerifier::new();
        let d = Decision::new(Action::dig_at(Position::default()), "x", DecisionSource::Planner);
        assert!(v.verify(&d, &Observation::default()).is_ok());
        assert!(v.is_empty());
    }

    #[test]
    fn planner_dig_on_unknown_block_is_vetoed() {
        let d = Decision::new(
            Action::dig_at(Position::new(5.0, 64.0, 5.0)),
            "dig",
            DecisionSource::Planner,
        );
        let err = verifier().verify(&d, &Observation::default()).unwrap_err();
        assert!(matches!(err, AgentError::Vetoed { ref rule, .. } if rule == "destructive_action"));
    }

    #[test]
    fn break_of_melon_is_allowed() {
        let pos = Position::new(1.0, 64.0, 0.0);
        let mut obs = Observation::default();
        obs.blocks.push(BlockSnapshot::new("melon", pos, 1.0));
        let d = Decision::new(
            Action::Break(pos.into()),
            "harvest",
            DecisionSource::Planner,
        );
        assert!(verifier().verify(&d, &obs).is_ok());
    }

    #[test]
    fn planner_place_is_vetoed_even_with_table_in_hand() {
        let mut obs = Observation::default();
        obs.held_item = Some(ItemStack::new("crafting_table", 1));
        let d = Decision::new(place(), "build", DecisionSource::Planner);
        assert!(verifier().verify(&d, &obs).is_err());
    }

    #[test]
    fn objective_table_placement_is_vetoed() {
        let mut obs = Observation::default();
        obs.held_item = Some(ItemStack::new("crafting_table", 1));
        let d = Decision::new(place(), "table", DecisionSource::Objective);
        let err = verifier().verify(&d, &obs).unwrap_err();
        assert!(matches!(err, AgentError::Vetoed { ref details, .. } if details.contains("1:63:0")));
    }

    #[test]
    fn allow_destructive_disables_rule() {
        let mut v = SafetyVerifier::new();
        v.add_rule(Box::new(DestructiveActionRule {
            allow_destructive: true,
        }));
        let d = Decision::new(place(), "build", DecisionSource::Planner);
        assert!(v.verify(&d, &Observation::default()).is_ok());
    }

    #[test]
    fn non_destructive_actions_pass() {
        let d = Decision::observe("look around", DecisionSource::Planner);
        assert!(verifier().verify(&d, &Observation::default()).is_ok());
    }
}
