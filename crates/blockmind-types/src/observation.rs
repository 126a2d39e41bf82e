//! [`Observation`] – the immutable per-tick world snapshot.
//!
//! The world interface produces a fresh snapshot at the start of every tick
//! and again after the action has executed.  Nothing in the decision engine
//! ever mutates one; all the "what is around me" questions are answered by
//! the query helpers below.
//!
//! # Example
//!
//! ```
//! use blockmind_types::{BlockSnapshot, ItemStack, Observation, Position};
//!
//! let mut obs = Observation::at(Position::new(0.0, 64.0, 0.0));
//! obs.inventory.push(ItemStack::new("oak_log", 3));
//! obs.inventory.push(ItemStack::new("oak_planks", 2));
//! obs.blocks.push(BlockSnapshot::new("birch_log", Position::new(2.0, 64.0, 0.0), 2.0));
//!
//! assert_eq!(obs.wood_units(), 5);
//! assert!(obs.nearest_block(blockmind_types::catalog::is_wood_block, 7.0).is_some());
//! ```

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::catalog;

/// Maximum number of nearby entities kept in a snapshot.
pub const MAX_NEARBY_ENTITIES: usize = 20;

/// Reach within which a block or entity can be interacted with, provided it
/// is also in line of sight.
pub const INTERACTION_REACH: f64 = 4.6;

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

/// A point in world coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Position {
        Position::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The block cell containing this point.
    pub fn block_key(&self) -> BlockKey {
        BlockKey {
            x: self.x.floor() as i64,
            y: self.y.floor() as i64,
            z: self.z.floor() as i64,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Integer block coordinates, used to key per-block cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockKey {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.x, self.y, self.z)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot parts
// ─────────────────────────────────────────────────────────────────────────────

/// Broad classification of a nearby entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Hostile,
    Animal,
    Player,
    /// A dropped item lying on the ground.
    Item,
    #[default]
    Other,
}

/// A nearby entity as seen from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: u32,
    pub kind: EntityKind,
    /// Mob or item name (`"zombie"`, `"oak_log"`).  May be empty for items
    /// the world could not resolve.
    pub name: String,
    pub distance: f64,
    pub position: Position,
}

impl EntitySnapshot {
    pub fn new(
        id: u32,
        kind: EntityKind,
        name: impl Into<String>,
        position: Position,
        distance: f64,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            distance,
            position,
        }
    }

    pub fn is_hostile(&self) -> bool {
        self.kind == EntityKind::Hostile || catalog::is_hostile_name(&self.name)
    }
}

/// An inventory stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub name: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// A nearby block of interest (logs, crafting tables, placement ground).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub name: String,
    pub position: Position,
    pub distance: f64,
    /// The world allows this block to be dug with the current equipment.
    #[serde(default)]
    pub diggable: bool,
    /// The block face is visible from the agent's eyes.
    #[serde(default)]
    pub line_of_sight: bool,
}

impl BlockSnapshot {
    /// A diggable block in plain view at `distance`.
    pub fn new(name: impl Into<String>, position: Position, distance: f64) -> Self {
        Self {
            name: name.into(),
            position,
            distance,
            diggable: true,
            line_of_sight: true,
        }
    }

    /// Within [`INTERACTION_REACH`] and in line of sight.
    pub fn is_reachable(&self) -> bool {
        self.distance <= INTERACTION_REACH && self.line_of_sight
    }
}

/// What the agent knows about crafting infrastructure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CraftingContext {
    pub table_in_inventory: bool,
    /// Position of a placed crafting table close enough to use.
    pub nearby_table: Option<Position>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable per-tick world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub position: Position,
    pub health: f32,
    /// Hunger bar, 0 (starving) to 20 (full).
    pub food: u32,
    pub held_item: Option<ItemStack>,
    pub inventory: Vec<ItemStack>,
    /// Nearby entities sorted by distance, at most [`MAX_NEARBY_ENTITIES`].
    pub entities: Vec<EntitySnapshot>,
    pub blocks: Vec<BlockSnapshot>,
    /// Solid ground blocks with free space above, candidates for placing a
    /// block on their top face.
    #[serde(default)]
    pub placement_ground: Vec<BlockSnapshot>,
    pub crafting: CraftingContext,
    /// Name of the server/world the agent is currently connected to.
    pub server_name: Option<String>,
    /// Path-following is currently in progress.
    pub is_moving: bool,
}

impl Default for Observation {
    fn default() -> Self {
        Self::at(Position::default())
    }
}

impl Observation {
    /// A healthy, well-fed agent with an empty inventory at `position`.
    pub fn at(position: Position) -> Self {
        Self {
            position,
            health: 20.0,
            food: 20,
            held_item: None,
            inventory: Vec::new(),
            entities: Vec::new(),
            blocks: Vec::new(),
            placement_ground: Vec::new(),
            crafting: CraftingContext::default(),
            server_name: None,
            is_moving: false,
        }
    }

    /// Replace the entity list, sorting by distance and keeping only the
    /// closest [`MAX_NEARBY_ENTITIES`].
    pub fn with_entities(mut self, mut entities: Vec<EntitySnapshot>) -> Self {
        entities.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        entities.truncate(MAX_NEARBY_ENTITIES);
        self.entities = entities;
        self
    }

    // ── Inventory ─────────────────────────────────────────────────────────────

    pub fn count_matching(&self, pred: impl Fn(&str) -> bool) -> u32 {
        self.inventory
            .iter()
            .filter(|it| pred(&it.name))
            .map(|it| it.count)
            .sum()
    }

    pub fn count_named(&self, name: &str) -> u32 {
        self.count_matching(|n| n == name)
    }

    /// Logs plus planks.
    pub fn wood_units(&self) -> u32 {
        self.count_matching(|n| catalog::is_wood_block(n) || catalog::is_planks(n))
    }

    pub fn planks(&self) -> u32 {
        self.count_matching(catalog::is_planks)
    }

    pub fn sticks(&self) -> u32 {
        self.count_named("stick")
    }

    pub fn edible_count(&self) -> u32 {
        self.count_matching(catalog::is_edible)
    }

    /// The edible stack to eat next, preferring cooked food.
    pub fn best_edible(&self) -> Option<&ItemStack> {
        let edible: Vec<&ItemStack> = self
            .inventory
            .iter()
            .filter(|it| it.count > 0 && catalog::is_edible(&it.name))
            .collect();
        edible
            .iter()
            .find(|it| it.name.starts_with("cooked_"))
            .or(edible.first())
            .copied()
    }

    pub fn held_name(&self) -> Option<&str> {
        self.held_item.as_ref().map(|it| it.name.as_str())
    }

    /// Wooden tools from [`catalog::WOODEN_TOOLS`] not yet in the inventory,
    /// in crafting order.
    pub fn missing_wooden_tools(&self) -> Vec<&'static str> {
        catalog::WOODEN_TOOLS
            .into_iter()
            .filter(|tool| self.count_named(tool) == 0)
            .collect()
    }

    pub fn has_table_in_inventory(&self) -> bool {
        self.crafting.table_in_inventory || self.count_named(catalog::CRAFTING_TABLE) > 0
    }

    // ── Surroundings ──────────────────────────────────────────────────────────

    /// Closest block within `max_distance` whose name satisfies `pred`.
    pub fn nearest_block(
        &self,
        pred: impl Fn(&str) -> bool,
        max_distance: f64,
    ) -> Option<&BlockSnapshot> {
        self.blocks
            .iter()
            .filter(|b| b.distance <= max_distance && pred(&b.name))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Block at the cell containing `position`, if the world reported it.
    pub fn block_at(&self, position: &Position) -> Option<&BlockSnapshot> {
        let key = position.block_key();
        self.blocks.iter().find(|b| b.position.block_key() == key)
    }

    /// Closest entity whose name is one of `names`, within `max_distance`.
    pub fn nearest_entity_named(&self, names: &[&str], max_distance: f64) -> Option<&EntitySnapshot> {
        self.entities
            .iter()
            .filter(|e| e.distance <= max_distance)
            .filter(|e| names.iter().any(|n| e.name.eq_ignore_ascii_case(n)))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    pub fn nearest_hostile(&self) -> Option<&EntitySnapshot> {
        self.entities
            .iter()
            .filter(|e| e.is_hostile())
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Closest dropped item worth collecting within `max_distance`.
    pub fn nearest_useful_drop(&self, max_distance: f64) -> Option<&EntitySnapshot> {
        self.entities
            .iter()
            .filter(|e| e.kind == EntityKind::Item && e.distance <= max_distance)
            .filter(|e| catalog::is_useful_drop(&e.name))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    pub fn entity(&self, id: u32) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// `true` while connected to a lobby (`lobby` or `lobby-*`) rather than a
    /// playable world.
    pub fn is_lobby(&self) -> bool {
        self.server_name.as_deref().is_some_and(is_lobby_server)
    }
}

/// `true` for lobby server names (`lobby` or `lobby-*`, any case).
pub fn is_lobby_server(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "lobby" || lower.starts_with("lobby-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: u32, kind: EntityKind, name: &str, distance: f64) -> EntitySnapshot {
        EntitySnapshot::new(id, kind, name, Position::new(distance, 64.0, 0.0), distance)
    }

    #[test]
    fn entities_are_sorted_and_capped() {
        let entities = (0..30)
            .rev()
            .map(|i| entity(i, EntityKind::Animal, "pig", i as f64))
            .collect();
        let obs = Observation::default().with_entities(entities);
        assert_eq!(obs.entities.len(), MAX_NEARBY_ENTITIES);
        assert_eq!(obs.entities[0].id, 0);
        assert!(obs.entities.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn best_edible_prefers_cooked_food() {
        let mut obs = Observation::default();
        obs.inventory.push(ItemStack::new("porkchop", 2));
        obs.inventory.push(ItemStack::new("cooked_beef", 1));
        assert_eq!(obs.best_edible().map(|it| it.name.as_str()), Some("cooked_beef"));
        assert_eq!(obs.edible_count(), 3);
    }

    #[test]
    fn missing_tools_keep_crafting_order() {
        let mut obs = Observation::default();
        obs.inventory.push(ItemStack::new("wooden_axe", 1));
        assert_eq!(
            obs.missing_wooden_tools(),
            vec!["wooden_pickaxe", "wooden_shovel", "wooden_sword"]
        );
    }

    #[test]
    fn hostiles_are_detected_by_kind_or_name() {
        let obs = Observation::default().with_entities(vec![
            entity(1, EntityKind::Other, "creeper", 8.0),
            entity(2, EntityKind::Hostile, "witch", 5.0),
            entity(3, EntityKind::Animal, "cow", 1.0),
        ]);
        assert_eq!(obs.nearest_hostile().map(|e| e.id), Some(2));
    }

    #[test]
    fn useful_drops_skip_dirt() {
        let obs = Observation::default().with_entities(vec![
            entity(1, EntityKind::Item, "dirt", 2.0),
            entity(2, EntityKind::Item, "oak_log", 6.0),
        ]);
        assert_eq!(obs.nearest_useful_drop(10.0).map(|e| e.id), Some(2));
        assert!(obs.nearest_useful_drop(5.0).is_none());
    }

    #[test]
    fn reachability_needs_distance_and_sight() {
        let mut block = BlockSnapshot::new("oak_log", Position::new(4.0, 64.0, 0.0), 4.0);
        assert!(block.is_reachable());
        block.line_of_sight = false;
        assert!(!block.is_reachable());
        block.line_of_sight = true;
        block.distance = 5.0;
        assert!(!block.is_reachable());
    }

    #[test]
    fn lobby_detection() {
        let mut obs = Observation::default();
        assert!(!obs.is_lobby());
        obs.server_name = Some("Lobby-2".into());
        assert!(obs.is_lobby());
        obs.server_name = Some("survival-1".into());
        assert!(!obs.is_lobby());
    }

    #[test]
    fn block_key_floors_coordinates() {
        let key = Position::new(-0.5, 64.9, 3.2).block_key();
        assert_eq!(key.to_string(), "-1:64:3");
    }
}
