//! [`Action`] – the strict definition of what the agent may ask the world to do.
//!
//! Each variant carries its own strongly typed payload.  On the wire an action
//! is adjacently tagged, matching what planners produce:
//!
//! ```json
//! {"action": "move", "payload": {"x": 10, "y": 64, "z": -3, "range": 2}}
//! ```
//!
//! Untrusted `(name, payload)` pairs are turned into an [`Action`] with
//! [`Action::from_parts`], which rejects unknown names and malformed payloads
//! with an [`AgentError`] instead of panicking.
//!
//! # Example
//!
//! ```
//! use blockmind_types::{Action, ActionKind};
//! use serde_json::json;
//!
//! let action = Action::from_parts("dig", json!({"x": 3, "y": 64, "z": 1})).unwrap();
//! assert_eq!(action.kind(), ActionKind::Dig);
//!
//! assert!(Action::from_parts("teleport", json!({})).is_err());
//! assert!(Action::from_parts("move", json!({"x": "north"})).is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::observation::Position;

// ─────────────────────────────────────────────────────────────────────────────
// ActionKind
// ─────────────────────────────────────────────────────────────────────────────

/// The discriminant of an [`Action`], without its payload.
///
/// Used for allow-lists, per-action cooldowns, and failure bookkeeping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Chat,
    Observe,
    Inventory,
    Move,
    Stop,
    Look,
    Dig,
    Break,
    Place,
    Equip,
    Interact,
    Attack,
    UseItem,
    Craft,
}

impl ActionKind {
    /// Every action the world interface understands.
    pub const ALL: [ActionKind; 14] = [
        ActionKind::Chat,
        ActionKind::Observe,
        ActionKind::Inventory,
        ActionKind::Move,
        ActionKind::Stop,
        ActionKind::Look,
        ActionKind::Dig,
        ActionKind::Break,
        ActionKind::Place,
        ActionKind::Equip,
        ActionKind::Interact,
        ActionKind::Attack,
        ActionKind::UseItem,
        ActionKind::Craft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Chat => "chat",
            ActionKind::Observe => "observe",
            ActionKind::Inventory => "inventory",
            ActionKind::Move => "move",
            ActionKind::Stop => "stop",
            ActionKind::Look => "look",
            ActionKind::Dig => "dig",
            ActionKind::Break => "break",
            ActionKind::Place => "place",
            ActionKind::Equip => "equip",
            ActionKind::Interact => "interact",
            ActionKind::Attack => "attack",
            ActionKind::UseItem => "useItem",
            ActionKind::Craft => "craft",
        }
    }

    /// Actions that alter the world's terrain.
    pub fn is_destructive(&self) -> bool {
        matches!(self, ActionKind::Dig | ActionKind::Break | ActionKind::Place)
    }

    /// Actions whose success alone counts as forward progress.
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ActionKind::Dig
                | ActionKind::Break
                | ActionKind::Craft
                | ActionKind::Place
                | ActionKind::Attack
                | ActionKind::UseItem
                | ActionKind::Equip
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| AgentError::UnknownAction(trimmed.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

fn default_move_range() -> f64 {
    1.0
}

fn default_face() -> Position {
    Position::new(0.0, 1.0, 0.0)
}

fn default_use_duration_ms() -> u64 {
    250
}

fn default_craft_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatPayload {
    #[serde(alias = "text")]
    pub message: String,
}

/// Path to within `range` of a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MoveTarget {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default = "default_move_range")]
    pub range: f64,
    /// Wait for arrival before reporting a result.
    #[serde(default)]
    pub blocking: bool,
}

impl MoveTarget {
    pub fn new(position: Position, range: f64) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            range,
            blocking: false,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// A block cell to dig or break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BlockTarget {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BlockTarget {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

impl From<Position> for BlockTarget {
    fn from(p: Position) -> Self {
        Self {
            x: p.x,
            y: p.y,
            z: p.z,
        }
    }
}

/// Either a point to look at, or an explicit yaw/pitch pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LookTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
}

/// Place the held block against `face` of the `reference` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlaceTarget {
    pub reference: Position,
    #[serde(default = "default_face")]
    pub face: Position,
}

impl PlaceTarget {
    /// The cell the new block will occupy.
    pub fn target_cell(&self) -> Position {
        self.reference
            .offset(self.face.x, self.face.y, self.face.z)
    }
}

/// Equipment slot for [`EquipRequest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum EquipSlot {
    #[default]
    Hand,
    OffHand,
    Head,
    Torso,
    Legs,
    Feet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EquipRequest {
    pub item_name: String,
    #[serde(default)]
    pub destination: EquipSlot,
}

/// Interact with a block (`position`) or an entity (`entityId`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InteractTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttackTarget {
    pub entity_id: u32,
}

/// Hold the use button for `duration_ms` (eating, drinking, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UseItemRequest {
    #[serde(default = "default_use_duration_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub offhand: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CraftRequest {
    pub item_name: String,
    #[serde(default = "default_craft_count")]
    pub count: u32,
    /// Crafting table to use for 3×3 recipes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Position>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────────────────

/// A primitive action for the world interface, with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum Action {
    Chat(ChatPayload),
    Observe,
    Inventory,
    Move(MoveTarget),
    Stop,
    Look(LookTarget),
    Dig(BlockTarget),
    Break(BlockTarget),
    Place(PlaceTarget),
    Equip(EquipRequest),
    Interact(InteractTarget),
    Attack(AttackTarget),
    UseItem(UseItemRequest),
    Craft(CraftRequest),
}

fn payload<T: DeserializeOwned>(kind: ActionKind, value: Value) -> Result<T, AgentError> {
    serde_json::from_value(value).map_err(|e| AgentError::MalformedPayload {
        action: kind,
        details: e.to_string(),
    })
}

fn malformed(kind: ActionKind, details: &str) -> AgentError {
    AgentError::MalformedPayload {
        action: kind,
        details: details.to_string(),
    }
}

impl Action {
    /// Build and validate an action from an untyped name and JSON payload.
    ///
    /// A missing (`null`) payload is treated as `{}`.
    ///
    /// # Errors
    ///
    /// [`AgentError::UnknownAction`] for names outside [`ActionKind::ALL`];
    /// [`AgentError::MalformedPayload`] when the payload does not match the
    /// action's schema or fails validation (empty item names, non-finite
    /// coordinates, …).
    pub fn from_parts(name: &str, payload_value: Value) -> Result<Self, AgentError> {
        let kind: ActionKind = name.parse()?;
        let value = if payload_value.is_null() {
            Value::Object(Default::default())
        } else {
            payload_value
        };
        let action = match kind {
            ActionKind::Chat => Action::Chat(payload(kind, value)?),
            ActionKind::Observe => Action::Observe,
            ActionKind::Inventory => Action::Inventory,
            ActionKind::Move => Action::Move(payload(kind, value)?),
            ActionKind::Stop => Action::Stop,
            ActionKind::Look => Action::Look(payload(kind, value)?),
            ActionKind::Dig => Action::Dig(payload(kind, value)?),
            ActionKind::Break => Action::Break(payload(kind, value)?),
            ActionKind::Place => Action::Place(payload(kind, value)?),
            ActionKind::Equip => Action::Equip(payload(kind, value)?),
            ActionKind::Interact => Action::Interact(payload(kind, value)?),
            ActionKind::Attack => Action::Attack(payload(kind, value)?),
            ActionKind::UseItem => Action::UseItem(payload(kind, value)?),
            ActionKind::Craft => Action::Craft(payload(kind, value)?),
        };
        action.validate()?;
        Ok(action)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), AgentError> {
        let kind = self.kind();
        match self {
            Action::Chat(p) if p.message.trim().is_empty() => {
                Err(malformed(kind, "message is required"))
            }
            Action::Move(t) if !t.position().is_finite() || !t.range.is_finite() => {
                Err(malformed(kind, "x,y,z are required numbers"))
            }
            Action::Dig(t) | Action::Break(t) if !t.position().is_finite() => {
                Err(malformed(kind, "x,y,z are required numbers"))
            }
            Action::Look(l) if l.target.is_none() && (l.yaw.is_none() || l.pitch.is_none()) => {
                Err(malformed(kind, "use target{x,y,z} or yaw+pitch"))
            }
            Action::Place(p) if !p.reference.is_finite() => {
                Err(malformed(kind, "reference{x,y,z} is required"))
            }
            Action::Equip(e) if e.item_name.trim().is_empty() => {
                Err(malformed(kind, "itemName is required"))
            }
            Action::Interact(i) if i.position.is_none() && i.entity_id.is_none() => {
                Err(malformed(kind, "use position{x,y,z} or entityId"))
            }
            Action::Craft(c) if c.item_name.trim().is_empty() => {
                Err(malformed(kind, "itemName is required"))
            }
            Action::Craft(c) if c.count == 0 => Err(malformed(kind, "count must be positive")),
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Chat(_) => ActionKind::Chat,
            Action::Observe => ActionKind::Observe,
            Action::Inventory => ActionKind::Inventory,
            Action::Move(_) => ActionKind::Move,
            Action::Stop => ActionKind::Stop,
            Action::Look(_) => ActionKind::Look,
            Action::Dig(_) => ActionKind::Dig,
            Action::Break(_) => ActionKind::Break,
            Action::Place(_) => ActionKind::Place,
            Action::Equip(_) => ActionKind::Equip,
            Action::Interact(_) => ActionKind::Interact,
            Action::Attack(_) => ActionKind::Attack,
            Action::UseItem(_) => ActionKind::UseItem,
            Action::Craft(_) => ActionKind::Craft,
        }
    }

    /// Serialised `action+payload`, used to detect repeated decisions.
    pub fn signature(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.kind().to_string())
    }

    /// Shorthand for a non-blocking move.
    pub fn move_to(position: Position, range: f64) -> Self {
        Action::Move(MoveTarget::new(position, range))
    }

    pub fn dig_at(position: Position) -> Self {
        Action::Dig(position.into())
    }

    pub fn chat(message: impl Into<String>) -> Self {
        Action::Chat(ChatPayload {
            message: message.into(),
        })
    }

    /// The block cell a dig/break targets.
    pub fn dig_target(&self) -> Option<Position> {
        match self {
            Action::Dig(t) | Action::Break(t) => Some(t.position()),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision
// ─────────────────────────────────────────────────────────────────────────────

/// Which stage of the arbitration cascade produced a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Objective,
    Planner,
    /// A planner proposal made while an operator directive was active.
    Directive,
    Fallback,
    /// A safety override (loot, harvest, hostile retreat, veto, throttle).
    Override,
    /// Anti-stall or watchdog recovery.
    Recovery,
    Lobby,
}

/// The single action chosen for a tick, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    #[serde(flatten)]
    pub action: Action,
    pub reason: String,
    pub source: DecisionSource,
}

impl Decision {
    pub fn new(action: Action, reason: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            action,
            reason: reason.into(),
            source,
        }
    }

    pub fn observe(reason: impl Into<String>, source: DecisionSource) -> Self {
        Self::new(Action::Observe, reason, source)
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    pub fn signature(&self) -> String {
        self.action.signature()
    }

    /// Replace the action and reason in place, as an override stage does.
    pub fn overwrite(&mut self, action: Action, reason: impl Into<String>, source: DecisionSource) {
        self.action = action;
        self.reason = reason.into();
        self.source = source;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionResult
// ─────────────────────────────────────────────────────────────────────────────

/// Structured outcome of executing an [`Action`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ActionResult {
    pub fn success(details: Value) -> Self {
        Self {
            ok: true,
            error: None,
            details,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            details: Value::Null,
        }
    }

    /// The failure recorded when execution exceeds its time budget.
    pub fn timed_out(timeout_ms: u64) -> Self {
        Self::failure(format!("timeout after {timeout_ms}ms"))
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_kind_parses_case_insensitively() {
        assert_eq!("useItem".parse::<ActionKind>().unwrap(), ActionKind::UseItem);
        assert_eq!(" DIG ".parse::<ActionKind>().unwrap(), ActionKind::Dig);
        assert!(matches!(
            "fly".parse::<ActionKind>(),
            Err(AgentError::UnknownAction(_))
        ));
    }

    #[test]
    fn move_payload_defaults_are_applied() {
        let action = Action::from_parts("move", json!({"x": 1, "y": 64, "z": -2})).unwrap();
        match action {
            Action::Move(t) => {
                assert_eq!(t.range, 1.0);
                assert!(!t.blocking);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn craft_payload_uses_camel_case() {
        let action = Action::from_parts(
            "craft",
            json!({"itemName": "wooden_pickaxe", "table": {"x": 1, "y": 64, "z": 1}}),
        )
        .unwrap();
        match action {
            Action::Craft(c) => {
                assert_eq!(c.item_name, "wooden_pickaxe");
                assert_eq!(c.count, 1);
                assert!(c.table.is_some());
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn malformed_payloads_are_rejected_not_panicking() {
        let err = Action::from_parts("move", json!({"x": "north"})).unwrap_err();
        assert!(matches!(
            err,
            AgentError::MalformedPayload {
                action: ActionKind::Move,
                ..
            }
        ));
        assert!(Action::from_parts("chat", json!({"message": "   "})).is_err());
        assert!(Action::from_parts("equip", json!({})).is_err());
        assert!(Action::from_parts("look", json!({"yaw": 1.0})).is_err());
        assert!(Action::from_parts("interact", json!({})).is_err());
    }

    #[test]
    fn unit_actions_ignore_payload() {
        assert_eq!(
            Action::from_parts("observe", Value::Null).unwrap(),
            Action::Observe
        );
        assert_eq!(
            Action::from_parts("stop", json!({"anything": true})).unwrap(),
            Action::Stop
        );
    }

    #[test]
    fn wire_format_is_adjacently_tagged() {
        let json = serde_json::to_value(Action::move_to(Position::new(1.0, 2.0, 3.0), 2.0)).unwrap();
        assert_eq!(json["action"], "move");
        assert_eq!(json["payload"]["range"], 2.0);

        let json = serde_json::to_value(Action::UseItem(UseItemRequest {
            duration_ms: 1900,
            offhand: false,
        }))
        .unwrap();
        assert_eq!(json["action"], "useItem");
        assert_eq!(json["payload"]["durationMs"], 1900);
    }

    #[test]
    fn signatures_distinguish_payloads() {
        let a = Action::dig_at(Position::new(1.0, 64.0, 1.0));
        let b = Action::dig_at(Position::new(2.0, 64.0, 1.0));
        assert_ne!(a.signature(), b.signature());
        assert_eq!(a.signature(), a.clone().signature());
    }

    #[test]
    fn decision_serializes_flat() {
        let decision = Decision::observe("hold", DecisionSource::Fallback);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "observe");
        assert_eq!(json["reason"], "hold");
        assert_eq!(json["source"], "fallback");
    }

    #[test]
    fn place_target_cell_is_above_reference_by_default() {
        let action = Action::from_parts("place", json!({"reference": {"x": 0, "y": 63, "z": 0}}))
            .unwrap();
        match action {
            Action::Place(p) => assert_eq!(p.target_cell(), Position::new(0.0, 64.0, 0.0)),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn timed_out_result_is_a_failure() {
        let result = ActionResult::timed_out(20_000);
        assert!(!result.ok);
        assert_eq!(result.error_text(), "timeout after 20000ms");
    }
}
