//! [`ActionPolicy`] – the action allow-list.
//!
//! Before any decision is executed, call [`ActionPolicy::check`] to verify
//! its action is allowed.  A disallowed action yields
//! [`AgentError::ActionNotAllowed`] and must not reach the world.

use std::collections::BTreeSet;

use blockmind_types::{ActionKind, AgentError};

/// The set of [`ActionKind`]s the agent may execute.
///
/// # Example
///
/// ```
/// use blockmind_kernel::action_policy::ActionPolicy;
/// use blockmind_types::ActionKind;
///
/// let mut policy = ActionPolicy::empty();
/// policy.allow(ActionKind::Move);
///
/// assert!(policy.check(ActionKind::Move).is_ok());
/// assert!(policy.check(ActionKind::Attack).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPolicy {
    allowed: BTreeSet<ActionKind>,
}

impl ActionPolicy {
    /// A policy that denies everything.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A policy that allows every action the world understands.
    pub fn allow_all() -> Self {
        Self::from_kinds(ActionKind::ALL)
    }

    pub fn from_kinds(kinds: impl IntoIterator<Item = ActionKind>) -> Self {
        Self {
            allowed: kinds.into_iter().collect(),
        }
    }

    /// Parse a comma-separated list such as `"move,dig,craft"`.
    ///
    /// # Errors
    ///
    /// [`AgentError::UnknownAction`] for the first unrecognised name.
    pub fn parse_list(list: &str) -> Result<Self, AgentError> {
        let kinds = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<BTreeSet<ActionKind>, _>>()?;
        Ok(Self { allowed: kinds })
    }

    /// Allow `kind`.  Duplicate grants are ignored.
    pub fn allow(&mut self, kind: ActionKind) {
        self.allowed.insert(kind);
    }

    /// Deny `kind`.  No-op when it was not allowed.
    pub fn deny(&mut self, kind: ActionKind) {
        self.allowed.remove(&kind);
    }

    pub fn is_allowed(&self, kind: ActionKind) -> bool {
        self.allowed.contains(&kind)
    }

    /// Return `Ok(())` when `kind` is allowed, or
    /// [`AgentError::ActionNotAllowed`] otherwise.
    pub fn check(&self, kind: ActionKind) -> Result<(), AgentError> {
        if self.is_allowed(kind) {
            Ok(())
        } else {
            Err(AgentError::ActionNotAllowed(kind))
        }
    }

    /// Allowed action names in a stable order, for prompts and status output.
    pub fn names(&self) -> Vec<&'static str> {
        self.allowed.iter().map(ActionKind::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_covers_every_action() {
        let policy = ActionPolicy::allow_all();
        for kind in ActionKind::ALL {
            assert!(policy.check(kind).is_ok());
        }
    }

    #[test]
    fn empty_policy_denies() {
        let policy = ActionPolicy::empty();
        assert!(matches!(
            policy.check(ActionKind::Observe),
            Err(AgentError::ActionNotAllowed(ActionKind::Observe))
        ));
    }

    #[test]
    fn deny_removes_action() {
        let mut policy = ActionPolicy::allow_all();
        policy.deny(ActionKind::Chat);
        assert!(policy.check(ActionKind::Chat).is_err());
        // Denying twice is harmless.
        policy.deny(ActionKind::Chat);
    }

    #[test]
    fn parse_list_accepts_whitespace_and_rejects_unknown() {
        let policy = ActionPolicy::parse_list("move, dig ,useItem,").unwrap();
        assert_eq!(policy.names(), vec!["move", "dig", "useItem"]);

        let err = ActionPolicy::parse_list("move,fly").unwrap_err();
        assert_eq!(err, AgentError::UnknownAction("fly".into()));
    }
}
