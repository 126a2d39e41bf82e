//! [`ObjectiveTracker`] – deterministic long-horizon objectives.
//!
//! The tracker picks one survival objective from the observation
//! (`eat_food`, `setup_crafting`, `hunt_food`, `gather_wood`), keeps it
//! locked until it completes, expires or exhausts its retries, and derives one
//! primitive action per tick towards it.
//!
//! Selection and step derivation are pure functions ([`choose_objective`] and
//! [`derive_step`]); the tracker only adds the bookkeeping around them.
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use blockmind_runtime::objective::{ObjectiveConfig, ObjectiveKind, ObjectiveTracker};
//! use blockmind_types::{ActionKind, Observation, Position};
//!
//! let now = Instant::now();
//! let mut tracker = ObjectiveTracker::new(ObjectiveConfig::default(), now);
//!
//! // Empty inventory, well fed: go get wood.
//! let obs = Observation::default();
//! assert_eq!(tracker.select_or_maintain(&obs, now).kind, ObjectiveKind::GatherWood);
//!
//! // No trees in sight, so the forced decision scouts.
//! let scout = Position::new(10.0, 64.0, 0.0);
//! let decision = tracker.forced_decision(&obs, scout, &[], now).unwrap();
//! assert_eq!(decision.kind(), ActionKind::Move);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use blockmind_types::catalog::{self, CRAFTING_TABLE, HUNTABLE_ANIMALS};
use blockmind_types::observation::INTERACTION_REACH;
use blockmind_types::{
    Action, ActionKind, ActionResult, AttackTarget, BlockKey, CraftRequest, Decision,
    DecisionSource, EquipRequest, EquipSlot, Observation, PlaceTarget, Position, UseItemRequest,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Lower bound on the objective lock duration.
const MIN_LOCK: Duration = Duration::from_millis(5_000);

/// Lower bound on the retry limit.
const MIN_RETRY_LIMIT: u32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveConfig {
    /// Maximum age of an objective before it is dropped.
    pub lock_ms: u64,
    pub retry_limit: u32,
    /// Eat when hunger is at or below this and food is carried.
    pub eat_threshold: u32,
    /// Hunt when hunger is at or below this.
    pub hunt_threshold: u32,
    /// Gather wood while holding fewer wood units than this.
    pub min_wood: u32,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            lock_ms: 120_000,
            retry_limit: 10,
            eat_threshold: 17,
            hunt_threshold: 8,
            min_wood: 4,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Objective
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    #[default]
    None,
    GatherWood,
    HuntFood,
    EatFood,
    SetupCrafting,
}

impl ObjectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveKind::None => "none",
            ObjectiveKind::GatherWood => "gather_wood",
            ObjectiveKind::HuntFood => "hunt_food",
            ObjectiveKind::EatFood => "eat_food",
            ObjectiveKind::SetupCrafting => "setup_crafting",
        }
    }

    pub fn is_active(&self) -> bool {
        *self != ObjectiveKind::None
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub kind: ObjectiveKind,
    pub created_at: Instant,
    pub last_updated_at: Instant,
    pub retries: u32,
    /// Last position the objective steered towards.
    pub target: Option<Position>,
    /// Wood units carried when the objective was activated.
    pub baseline: u32,
    pub notes: String,
}

impl Objective {
    fn idle(now: Instant) -> Self {
        Self {
            kind: ObjectiveKind::None,
            created_at: now,
            last_updated_at: now,
            retries: 0,
            target: None,
            baseline: 0,
            notes: String::new(),
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Result of [`choose_objective`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveChoice {
    pub kind: ObjectiveKind,
    pub notes: String,
}

impl ObjectiveChoice {
    fn new(kind: ObjectiveKind, notes: impl Into<String>) -> Self {
        Self {
            kind,
            notes: notes.into(),
        }
    }
}

/// A change of objective, drained by the arbitrator for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveTransition {
    Activated {
        kind: ObjectiveKind,
        notes: String,
    },
    Cleared {
        kind: ObjectiveKind,
        reason: String,
        retries: u32,
    },
}

/// What the objective wants to do this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectiveStep {
    /// Take `decision`, steering towards `target` if known.
    Act {
        decision: Decision,
        target: Option<Position>,
    },
    /// The objective is finished (or can no longer be pursued).
    Complete(String),
    /// Nothing to force; let the planner decide.
    Idle,
}

// ─────────────────────────────────────────────────────────────────────────────
// Selection
// ─────────────────────────────────────────────────────────────────────────────

/// Pick an objective from scratch.  `None` while in a lobby or when nothing
/// needs doing.
pub fn choose_objective(obs: &Observation, config: &ObjectiveConfig) -> Option<ObjectiveChoice> {
    if obs.is_lobby() {
        return None;
    }
    if obs.food <= config.eat_threshold {
        if let Some(edible) = obs.best_edible() {
            return Some(ObjectiveChoice::new(
                ObjectiveKind::EatFood,
                format!("eat {}", edible.name),
            ));
        }
    }

    let has_table = obs.has_table_in_inventory();
    let has_nearby_table = obs.crafting.nearby_table.is_some();
    let holding_table = obs.held_name() == Some(CRAFTING_TABLE);
    if !has_nearby_table && (holding_table || has_table) {
        return Some(ObjectiveChoice::new(
            ObjectiveKind::SetupCrafting,
            "place crafting table nearby",
        ));
    }
    let missing = obs.missing_wooden_tools();
    if !missing.is_empty()
        && (has_table || has_nearby_table)
        && obs.planks() >= 3
        && obs.sticks() >= 2
    {
        return Some(ObjectiveChoice::new(
            ObjectiveKind::SetupCrafting,
            format!("craft missing wooden tools: {}", missing.join(", ")),
        ));
    }
    if obs.food <= config.hunt_threshold {
        return Some(ObjectiveChoice::new(ObjectiveKind::HuntFood, "low hunger"));
    }
    if obs.wood_units() < config.min_wood {
        return Some(ObjectiveChoice::new(
            ObjectiveKind::GatherWood,
            "low wood inventory",
        ));
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Step derivation
// ─────────────────────────────────────────────────────────────────────────────

fn act(action: Action, reason: impl Into<String>, target: Option<Position>) -> ObjectiveStep {
    ObjectiveStep::Act {
        decision: Decision::new(action, reason, DecisionSource::Objective),
        target,
    }
}

fn equip(item_name: &str) -> Action {
    Action::Equip(EquipRequest {
        item_name: item_name.to_string(),
        destination: EquipSlot::Hand,
    })
}

fn craft(item_name: &str, count: u32, table: Option<Position>) -> Action {
    Action::Craft(CraftRequest {
        item_name: item_name.to_string(),
        count,
        table,
    })
}

/// The next primitive step for `objective`.
///
/// `scout` is a pre-rolled exploration target used whenever the objective
/// has nothing concrete to move towards.  `blocked_placements` lists cells
/// where table placement recently failed.
pub fn derive_step(
    objective: &Objective,
    obs: &Observation,
    scout: Position,
    blocked_placements: &[BlockKey],
) -> ObjectiveStep {
    match objective.kind {
        ObjectiveKind::None => ObjectiveStep::Idle,
        ObjectiveKind::GatherWood => gather_wood_step(objective, obs, scout),
        ObjectiveKind::HuntFood => hunt_food_step(obs, scout),
        ObjectiveKind::EatFood => eat_food_step(obs),
        ObjectiveKind::SetupCrafting => setup_crafting_step(obs, scout, blocked_placements),
    }
}

fn gather_wood_step(objective: &Objective, obs: &Observation, scout: Position) -> ObjectiveStep {
    let wood = obs.wood_units();
    if wood >= objective.baseline + 2 || wood >= 6 {
        return ObjectiveStep::Complete("wood target reached".to_string());
    }
    if let Some(log) = obs
        .nearest_block(catalog::is_wood_block, 7.0)
        .filter(|b| b.diggable && b.is_reachable())
    {
        return act(
            Action::dig_at(log.position),
            format!("Objective gather_wood: chopping {}", log.name),
            Some(log.position),
        );
    }
    if let Some(log) = obs.nearest_block(catalog::is_wood_block, 30.0) {
        return act(
            Action::move_to(log.position, 2.0),
            "Objective gather_wood: moving to nearest tree",
            Some(log.position),
        );
    }
    act(
        Action::move_to(scout, 2.0),
        "Objective gather_wood: scouting for trees",
        None,
    )
}

fn hunt_food_step(obs: &Observation, scout: Position) -> ObjectiveStep {
    let Some(animal) = obs.nearest_entity_named(&HUNTABLE_ANIMALS, 30.0) else {
        return act(
            Action::move_to(scout, 2.0),
            "Objective hunt_food: scouting for animals",
            None,
        );
    };
    if animal.distance <= 3.2 {
        return act(
            Action::Attack(AttackTarget {
                entity_id: animal.id,
            }),
            format!("Objective hunt_food: attacking nearby {}", animal.name),
            Some(animal.position),
        );
    }
    act(
        Action::move_to(animal.position, 1.0),
        format!("Objective hunt_food: chasing {}", animal.name),
        Some(animal.position),
    )
}

fn eat_food_step(obs: &Observation) -> ObjectiveStep {
    if obs.food >= 18 {
        return ObjectiveStep::Complete("hunger restored".to_string());
    }
    let Some(edible) = obs.best_edible() else {
        return ObjectiveStep::Complete("no edible item".to_string());
    };
    if obs.held_name() == Some(edible.name.as_str()) {
        return act(
            Action::UseItem(UseItemRequest {
                duration_ms: 1_900,
                offhand: false,
            }),
            format!("Objective eat_food: eating {}", edible.name),
            None,
        );
    }
    act(
        equip(&edible.name),
        format!("Objective eat_food: equip {}", edible.name),
        None,
    )
}

fn setup_crafting_step(
    obs: &Observation,
    scout: Position,
    blocked_placements: &[BlockKey],
) -> ObjectiveStep {
    let nearby_table = obs
        .crafting
        .nearby_table
        .filter(|t| obs.position.distance_to(t) <= 5.0);

    if let Some(table) = nearby_table {
        let missing = obs.missing_wooden_tools();
        let Some(next_tool) = missing.first() else {
            return ObjectiveStep::Complete("basic wooden tools crafted".to_string());
        };
        let reachable = obs
            .block_at(&table)
            .map(|b| b.is_reachable())
            .unwrap_or_else(|| obs.position.distance_to(&table) <= INTERACTION_REACH);
        if !reachable {
            return act(
                Action::move_to(table, 1.6),
                "Objective setup_crafting: moving to reachable crafting table",
                Some(table),
            );
        }
        if obs.planks() < 3 {
            return act(
                craft("planks", 4, None),
                "Objective setup_crafting: craft planks before tools",
                Some(table),
            );
        }
        if obs.sticks() < 2 {
            return act(
                craft("stick", 4, None),
                "Objective setup_crafting: craft sticks before tools",
                Some(table),
            );
        }
        return act(
            craft(next_tool, 1, Some(table)),
            format!("Objective setup_crafting: craft {next_tool}"),
            Some(table),
        );
    }

    if !obs.has_table_in_inventory() {
        return ObjectiveStep::Complete("missing crafting table".to_string());
    }
    if obs.held_name() != Some(CRAFTING_TABLE) {
        return act(
            equip(CRAFTING_TABLE),
            "Objective setup_crafting: equip crafting_table",
            None,
        );
    }

    let spot = obs
        .placement_ground
        .iter()
        .filter(|g| g.is_reachable())
        .map(|g| (g.position, g.position.offset(0.0, 1.0, 0.0)))
        .filter(|(_, cell)| !blocked_placements.contains(&cell.block_key()))
        .filter(|(_, cell)| obs.position.distance_to(cell) >= 1.1)
        .min_by(|a, b| {
            obs.position
                .distance_to(&a.1)
                .total_cmp(&obs.position.distance_to(&b.1))
        });
    if let Some((reference, cell)) = spot {
        return act(
            Action::Place(PlaceTarget {
                reference,
                face: Position::new(0.0, 1.0, 0.0),
            }),
            "Objective setup_crafting: place crafting_table on reachable ground",
            Some(cell),
        );
    }
    act(
        Action::move_to(scout, 2.0),
        "Objective setup_crafting: reposition for valid table placement",
        None,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// ObjectiveTracker
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the current [`Objective`] and its lifecycle.
#[derive(Debug, Clone)]
pub struct ObjectiveTracker {
    config: ObjectiveConfig,
    current: Objective,
    transitions: Vec<ObjectiveTransition>,
}

impl ObjectiveTracker {
    pub fn new(config: ObjectiveConfig, now: Instant) -> Self {
        Self {
            config,
            current: Objective::idle(now),
            transitions: Vec::new(),
        }
    }

    pub fn config(&self) -> &ObjectiveConfig {
        &self.config
    }

    pub fn current(&self) -> &Objective {
        &self.current
    }

    pub fn kind(&self) -> ObjectiveKind {
        self.current.kind
    }

    /// Keep the current objective if it is still valid, otherwise choose a
    /// new one from `obs`.
    pub fn select_or_maintain(&mut self, obs: &Observation, now: Instant) -> &Objective {
        if !self.should_keep(now) {
            if let Some(choice) = choose_objective(obs, &self.config) {
                self.activate(choice.kind, &choice.notes, obs, now);
            }
        }
        &self.current
    }

    /// Make `kind` the active objective.  Re-activating the same kind only
    /// refreshes its timestamp and notes.
    pub fn activate(&mut self, kind: ObjectiveKind, notes: &str, obs: &Observation, now: Instant) {
        if !kind.is_active() {
            self.clear("deactivated");
            return;
        }
        if self.current.kind != kind {
            self.current.kind = kind;
            self.current.created_at = now;
            self.current.retries = 0;
            self.current.baseline = obs.wood_units();
            self.current.target = None;
            info!(objective = %kind, notes, "objective active");
            self.transitions.push(ObjectiveTransition::Activated {
                kind,
                notes: notes.to_string(),
            });
        }
        self.current.last_updated_at = now;
        if !notes.is_empty() {
            self.current.notes = notes.to_string();
        }
    }

    /// Drop the current objective, recording `reason`.  No-op when idle.
    pub fn clear(&mut self, reason: &str) {
        let kind = self.current.kind;
        if !kind.is_active() {
            return;
        }
        info!(objective = %kind, retries = self.current.retries, reason, "objective cleared");
        self.transitions.push(ObjectiveTransition::Cleared {
            kind,
            reason: reason.to_string(),
            retries: self.current.retries,
        });
        self.current.kind = ObjectiveKind::None;
        self.current.retries = 0;
        self.current.target = None;
        self.current.baseline = 0;
        self.current.notes.clear();
    }

    /// `false` (after clearing) once the objective has expired or run out of
    /// retries; also `false` when idle.
    pub fn should_keep(&mut self, now: Instant) -> bool {
        if !self.current.kind.is_active() {
            return false;
        }
        let lock = Duration::from_millis(self.config.lock_ms).max(MIN_LOCK);
        if self.current.age(now) > lock {
            self.clear("expired");
            return false;
        }
        if self.current.retries >= self.config.retry_limit.max(MIN_RETRY_LIMIT) {
            self.clear("retry limit reached");
            return false;
        }
        true
    }

    /// The action the active objective insists on this tick, if any.
    /// Completing objectives are cleared and yield `None`.
    pub fn forced_decision(
        &mut self,
        obs: &Observation,
        scout: Position,
        blocked_placements: &[BlockKey],
        now: Instant,
    ) -> Option<Decision> {
        match derive_step(&self.current, obs, scout, blocked_placements) {
            ObjectiveStep::Act { decision, target } => {
                self.current.last_updated_at = now;
                if target.is_some() {
                    self.current.target = target;
                }
                Some(decision)
            }
            ObjectiveStep::Complete(reason) => {
                self.clear(&reason);
                None
            }
            ObjectiveStep::Idle => None,
        }
    }

    /// Post-action bookkeeping: retry accounting and completion checks.
    pub fn note_result(
        &mut self,
        executed: ActionKind,
        result: &ActionResult,
        before: &Observation,
        after: &Observation,
    ) {
        if !self.current.kind.is_active() {
            return;
        }
        if result.ok {
            self.current.retries = self.current.retries.saturating_sub(1);
        } else {
            self.current.retries += 1;
        }

        match self.current.kind {
            ObjectiveKind::GatherWood if after.wood_units() > self.current.baseline => {
                self.clear("wood gained");
            }
            ObjectiveKind::HuntFood if result.ok && before.food >= 12 => {
                self.clear("hunger recovered");
            }
            ObjectiveKind::EatFood if executed == ActionKind::UseItem && result.ok => {
                if after.food > before.food || after.edible_count() < before.edible_count() {
                    self.clear("eat action completed");
                } else {
                    self.current.retries += 1;
                }
            }
            ObjectiveKind::SetupCrafting if after.missing_wooden_tools().is_empty() => {
                self.clear("basic wooden tools crafted");
            }
            _ => {}
        }
    }

    /// Objective changes since the last call.
    pub fn drain_transitions(&mut self) -> Vec<ObjectiveTransition> {
        std::mem::take(&mut self.transitions)
    }
}
