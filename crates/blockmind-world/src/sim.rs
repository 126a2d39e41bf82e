//! In-process simulated world for headless runs and tests.
//!
//! [`SimWorld`] keeps a tiny block world in memory and applies simple,
//! deterministic effects for every [`Action`]: moving teleports to the
//! target, digging removes the block and adds its drop, crafting follows a
//! handful of wooden-tier recipes, and so on.  Failures and delays can be
//! scripted per action so the full agent loop can be exercised without a
//! game server.
//!
//! # Example
//!
//! ```rust
//! use blockmind_types::{Action, Position};
//! use blockmind_world::{SimWorld, WorldInterface};
//!
//! let world = SimWorld::builder()
//!     .at(Position::new(0.0, 64.0, 0.0))
//!     .block("oak_log", Position::new(1.0, 64.0, 0.0))
//!     .build();
//!
//! let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! rt.block_on(async {
//!     let result = world.execute(&Action::dig_at(Position::new(1.0, 64.0, 0.0))).await;
//!     assert!(result.ok);
//!     let obs = world.observe().await.unwrap();
//!     assert_eq!(obs.count_named("oak_log"), 1);
//! });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use blockmind_types::catalog;
use blockmind_types::observation::INTERACTION_REACH;
use blockmind_types::{
    Action, ActionKind, ActionResult, AgentError, BlockSnapshot, CraftRequest, CraftingContext,
    EntityKind, EntitySnapshot, ItemStack, Observation, Position,
};
use serde_json::json;
use tracing::debug;

use crate::interface::WorldInterface;

/// Radius within which a placed crafting table counts as nearby.
const TABLE_SEARCH_RADIUS: f64 = 6.0;

/// Distance at which dropped items are picked up after a move.
const PICKUP_RADIUS: f64 = 1.5;

/// Hunger restored by one bite.
const FOOD_PER_ITEM: u32 = 6;

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SimBlock {
    name: String,
    position: Position,
    diggable: bool,
    line_of_sight: bool,
}

#[derive(Debug, Clone)]
struct SimEntity {
    id: u32,
    kind: EntityKind,
    name: String,
    position: Position,
}

enum Ingredient {
    Named(String),
    AnyPlanks,
}

struct Recipe {
    output: String,
    yield_count: u32,
    inputs: Vec<(Ingredient, u32)>,
    needs_table: bool,
}

#[derive(Debug, Default)]
struct SimState {
    position: Position,
    health: f32,
    food: u32,
    held: Option<String>,
    inventory: Vec<ItemStack>,
    blocks: Vec<SimBlock>,
    ground: Vec<Position>,
    entities: Vec<SimEntity>,
    server_name: Option<String>,
    moving: bool,
    next_entity_id: u32,
    failures: HashMap<ActionKind, VecDeque<String>>,
    delays: HashMap<ActionKind, Duration>,
    observe_failures: u32,
    executed: Vec<Action>,
    chat: Vec<String>,
}

impl SimState {
    fn new() -> Self {
        Self {
            health: 20.0,
            food: 20,
            next_entity_id: 1,
            ..Self::default()
        }
    }

    // ── Inventory ─────────────────────────────────────────────────────────────

    fn count(&self, name: &str) -> u32 {
        self.inventory
            .iter()
            .filter(|it| it.name == name)
            .map(|it| it.count)
            .sum()
    }

    fn add_item(&mut self, name: &str, count: u32) {
        match self.inventory.iter_mut().find(|it| it.name == name) {
            Some(stack) => stack.count += count,
            None => self.inventory.push(ItemStack::new(name, count)),
        }
    }

    /// Remove `count` items matching `pred`, across stacks.  Nothing is
    /// removed when fewer are available.
    fn take_matching(&mut self, pred: impl Fn(&str) -> bool, count: u32) -> bool {
        let available: u32 = self
            .inventory
            .iter()
            .filter(|it| pred(&it.name))
            .map(|it| it.count)
            .sum();
        if available < count {
            return false;
        }
        let mut left = count;
        for stack in self.inventory.iter_mut().filter(|it| pred(&it.name)) {
            let used = stack.count.min(left);
            stack.count -= used;
            left -= used;
            if left == 0 {
                break;
            }
        }
        self.inventory.retain(|it| it.count > 0);
        if self.held.as_deref().is_some_and(|h| self.count(h) == 0) {
            self.held = None;
        }
        true
    }

    fn take(&mut self, name: &str, count: u32) -> bool {
        self.take_matching(|n| n == name, count)
    }

    // ── Geometry ──────────────────────────────────────────────────────────────

    fn block_index_at(&self, position: &Position) -> Option<usize> {
        let key = position.block_key();
        self.blocks
            .iter()
            .position(|b| b.position.block_key() == key)
    }

    fn nearest_table(&self, radius: f64) -> Option<Position> {
        self.blocks
            .iter()
            .filter(|b| b.name == catalog::CRAFTING_TABLE)
            .map(|b| (b.position, self.position.distance_to(&b.position)))
            .filter(|(_, d)| *d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(p, _)| p)
    }

    fn collect_nearby_drops(&mut self) {
        let here = self.position;
        let (picked, rest): (Vec<SimEntity>, Vec<SimEntity>) = self
            .entities
            .drain(..)
            .partition(|e| e.kind == EntityKind::Item && e.position.distance_to(&here) <= PICKUP_RADIUS);
        self.entities = rest;
        for drop in picked {
            if !drop.name.is_empty() {
                self.add_item(&drop.name, 1);
            }
        }
    }

    // ── Snapshot ──────────────────────────────────────────────────────────────

    fn snapshot(&self) -> Observation {
        let here = self.position;
        let mut obs = Observation::at(here);
        obs.health = self.health;
        obs.food = self.food;
        obs.held_item = self
            .held
            .as_ref()
            .map(|name| ItemStack::new(name.clone(), self.count(name)))
            .filter(|it| it.count > 0);
        obs.inventory = self.inventory.clone();
        obs.blocks = self
            .blocks
            .iter()
            .map(|b| BlockSnapshot {
                name: b.name.clone(),
                position: b.position,
                distance: here.distance_to(&b.position),
                diggable: b.diggable,
                line_of_sight: b.line_of_sight,
            })
            .collect();
        obs.placement_ground = self
            .ground
            .iter()
            .filter(|g| self.block_index_at(&g.offset(0.0, 1.0, 0.0)).is_none())
            .map(|g| BlockSnapshot::new("grass_block", *g, here.distance_to(g)))
            .collect();
        obs.crafting = CraftingContext {
            table_in_inventory: self.count(catalog::CRAFTING_TABLE) > 0,
            nearby_table: self.nearest_table(TABLE_SEARCH_RADIUS),
        };
        obs.server_name = self.server_name.clone();
        obs.is_moving = self.moving;
        let entities = self
            .entities
            .iter()
            .map(|e| EntitySnapshot::new(e.id, e.kind, e.name.clone(), e.position, here.distance_to(&e.position)))
            .collect();
        obs.with_entities(entities)
    }

    // ── Effects ───────────────────────────────────────────────────────────────

    fn apply(&mut self, action: &Action) -> ActionResult {
        match action {
            Action::Chat(p) => {
                self.chat.push(p.message.clone());
                ActionResult::success(json!({ "sent": p.message }))
            }
            Action::Observe => ActionResult::success(json!({ "health": self.health, "food": self.food })),
            Action::Inventory => ActionResult::success(json!({ "items": self.inventory })),
            Action::Move(t) => {
                self.position = t.position();
                self.moving = false;
                self.collect_nearby_drops();
                ActionResult::success(json!({ "arrived": true }))
            }
            Action::Stop => {
                self.moving = false;
                ActionResult::success(json!({}))
            }
            Action::Look(_) | Action::Interact(_) => ActionResult::success(json!({})),
            Action::Dig(t) | Action::Break(t) => self.dig(t.position()),
            Action::Place(p) => self.place(p.target_cell()),
            Action::Equip(e) => {
                if self.count(&e.item_name) == 0 {
                    return ActionResult::failure(format!("no {} in inventory", e.item_name));
                }
                self.held = Some(e.item_name.clone());
                ActionResult::success(json!({ "held": e.item_name }))
            }
            Action::Attack(a) => self.attack(a.entity_id),
            Action::UseItem(_) => self.eat(),
            Action::Craft(c) => self.craft(c),
        }
    }

    fn dig(&mut self, target: Position) -> ActionResult {
        let Some(idx) = self.block_index_at(&target) else {
            return ActionResult::failure(format!("no block at {}", target.block_key()));
        };
        let block = &self.blocks[idx];
        if !block.diggable {
            return ActionResult::failure(format!("cannot dig {}", block.name));
        }
        if self.position.distance_to(&block.position) > INTERACTION_REACH || !block.line_of_sight {
            return ActionResult::failure(format!("{} is out of reach", block.name));
        }
        let block = self.blocks.remove(idx);
        let drop = if block.name == "melon" {
            "melon_slice".to_string()
        } else {
            block.name.clone()
        };
        self.add_item(&drop, 1);
        ActionResult::success(json!({ "block": block.name, "drop": drop }))
    }

    fn place(&mut self, cell: Position) -> ActionResult {
        let Some(held) = self.held.clone() else {
            return ActionResult::failure("nothing held to place");
        };
        if self.block_index_at(&cell).is_some() {
            return ActionResult::failure(format!(
                "Event blockUpdate:{} did not fire within timeout",
                cell.block_key()
            ));
        }
        if !self.take(&held, 1) {
            return ActionResult::failure(format!("no {held} in inventory"));
        }
        let key = cell.block_key();
        let position = Position::new(key.x as f64, key.y as f64, key.z as f64);
        self.blocks.push(SimBlock {
            name: held.clone(),
            position,
            diggable: true,
            line_of_sight: true,
        });
        ActionResult::success(json!({ "placed": held, "at": key.to_string() }))
    }

    fn attack(&mut self, entity_id: u32) -> ActionResult {
        let Some(idx) = self.entities.iter().position(|e| e.id == entity_id) else {
            return ActionResult::failure(format!("entity {entity_id} not found"));
        };
        let target = self.entities.remove(idx);
        let meat = match target.name.as_str() {
            "pig" => Some("porkchop"),
            "cow" => Some("beef"),
            "chicken" => Some("chicken"),
            "sheep" => Some("mutton"),
            _ => None,
        };
        if let Some(meat) = meat {
            self.add_item(meat, 1);
        }
        ActionResult::success(json!({ "killed": target.name }))
    }

    fn eat(&mut self) -> ActionResult {
        let Some(held) = self.held.clone().filter(|h| catalog::is_edible(h)) else {
            return ActionResult::failure("nothing edible held");
        };
        if !self.take(&held, 1) {
            return ActionResult::failure(format!("no {held} in inventory"));
        }
        self.food = (self.food + FOOD_PER_ITEM).min(20);
        ActionResult::success(json!({ "ate": held, "food": self.food }))
    }

    fn resolve_craft_name(&self, raw: &str) -> String {
        let name = raw.trim().to_ascii_lowercase();
        if name != "planks" {
            return name;
        }
        self.inventory
            .iter()
            .find(|it| catalog::is_wood_block(&it.name))
            .and_then(|log| log.name.strip_suffix("_log"))
            .map(|wood| format!("{wood}_planks"))
            .unwrap_or(name)
    }

    fn recipe(name: &str) -> Option<Recipe> {
        let recipe = |inputs: Vec<(Ingredient, u32)>, yield_count, needs_table| Recipe {
            output: name.to_string(),
            yield_count,
            inputs,
            needs_table,
        };
        if let Some(wood) = name.strip_suffix("_planks") {
            return Some(recipe(vec![(Ingredient::Named(format!("{wood}_log")), 1)], 4, false));
        }
        let stick = || Ingredient::Named("stick".to_string());
        match name {
            "stick" => Some(recipe(vec![(Ingredient::AnyPlanks, 2)], 4, false)),
            "crafting_table" => Some(recipe(vec![(Ingredient::AnyPlanks, 4)], 1, false)),
            "wooden_pickaxe" | "wooden_axe" => Some(recipe(
                vec![(Ingredient::AnyPlanks, 3), (stick(), 2)],
                1,
                true,
            )),
            "wooden_shovel" => Some(recipe(vec![(Ingredient::AnyPlanks, 1), (stick(), 2)], 1, true)),
            "wooden_sword" => Some(recipe(vec![(Ingredient::AnyPlanks, 2), (stick(), 1)], 1, true)),
            _ => None,
        }
    }

    fn has_ingredients(&self, recipe: &Recipe) -> bool {
        recipe.inputs.iter().all(|(ingredient, n)| match ingredient {
            Ingredient::Named(name) => self.count(name) >= *n,
            Ingredient::AnyPlanks => {
                self.inventory
                    .iter()
                    .filter(|it| catalog::is_planks(&it.name))
                    .map(|it| it.count)
                    .sum::<u32>()
                    >= *n
            }
        })
    }

    fn consume(&mut self, recipe: &Recipe) {
        for (ingredient, n) in &recipe.inputs {
            match ingredient {
                Ingredient::Named(name) => {
                    self.take(name, *n);
                }
                Ingredient::AnyPlanks => {
                    self.take_matching(catalog::is_planks, *n);
                }
            }
        }
    }

    fn craft(&mut self, request: &CraftRequest) -> ActionResult {
        let name = self.resolve_craft_name(&request.item_name);
        let Some(recipe) = Self::recipe(&name) else {
            return ActionResult::failure(format!("no recipe for {name}"));
        };
        if recipe.needs_table {
            let table_ok = match request.table {
                Some(pos) => self
                    .block_index_at(&pos)
                    .is_some_and(|i| self.blocks[i].name == catalog::CRAFTING_TABLE)
                    && self.position.distance_to(&pos) <= INTERACTION_REACH,
                None => self.nearest_table(INTERACTION_REACH).is_some(),
            };
            if !table_ok {
                return ActionResult::failure(format!("crafting table required for {name}"));
            }
        }
        let mut crafted = 0;
        for _ in 0..request.count {
            if !self.has_ingredients(&recipe) {
                break;
            }
            self.consume(&recipe);
            self.add_item(&recipe.output, recipe.yield_count);
            crafted += recipe.yield_count;
        }
        if crafted == 0 {
            return ActionResult::failure(format!("missing ingredients for {name}"));
        }
        ActionResult::success(json!({ "crafted": recipe.output, "count": crafted }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimWorld
// ────────────────────────────────────────────────────────────────────────────

/// A deterministic, in-memory [`WorldInterface`].
pub struct SimWorld {
    state: Mutex<SimState>,
}

impl SimWorld {
    pub fn builder() -> SimWorldBuilder {
        SimWorldBuilder {
            state: SimState::new(),
        }
    }

    /// A small starter area: a grove of oak trees, open ground, a few animals
    /// and one zombie lurking at the edge.
    pub fn demo() -> Self {
        let origin = Position::new(0.0, 64.0, 0.0);
        let mut builder = Self::builder().at(origin).food(14).server("survival-1");
        for (x, z) in [(3.0, 2.0), (6.0, -4.0), (-5.0, 5.0), (12.0, 9.0), (-14.0, -3.0)] {
            for y in 64..68 {
                builder = builder.block("oak_log", Position::new(x, y as f64, z));
            }
        }
        for x in -3..=3 {
            for z in -3..=3 {
                builder = builder.ground(Position::new(x as f64, 63.0, z as f64));
            }
        }
        builder
            .entity(EntityKind::Animal, "pig", Position::new(9.0, 64.0, -8.0))
            .entity(EntityKind::Animal, "cow", Position::new(-11.0, 64.0, 7.0))
            .entity(EntityKind::Animal, "chicken", Position::new(15.0, 64.0, 2.0))
            .entity(EntityKind::Hostile, "zombie", Position::new(28.0, 64.0, 25.0))
            .build()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Scripting ─────────────────────────────────────────────────────────────

    /// Make the next execution of `kind` fail with `error`.  Calls queue up.
    pub fn fail_next(&self, kind: ActionKind, error: impl Into<String>) {
        self.lock()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error.into());
    }

    /// Delay every execution of `kind` by `delay` before it takes effect.
    pub fn set_delay(&self, kind: ActionKind, delay: Duration) {
        self.lock().delays.insert(kind, delay);
    }

    /// Make the next `n` observations fail.
    pub fn fail_observations(&self, n: u32) {
        self.lock().observe_failures += n;
    }

    pub fn set_food(&self, food: u32) {
        self.lock().food = food.min(20);
    }

    pub fn set_server(&self, name: Option<&str>) {
        self.lock().server_name = name.map(str::to_string);
    }

    pub fn set_moving(&self, moving: bool) {
        self.lock().moving = moving;
    }

    /// Add an entity at runtime, returning its id.
    pub fn spawn(&self, kind: EntityKind, name: &str, position: Position) -> u32 {
        let mut state = self.lock();
        let id = state.next_entity_id;
        state.next_entity_id += 1;
        state.entities.push(SimEntity {
            id,
            kind,
            name: name.to_string(),
            position,
        });
        id
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    /// Every action received so far, in order.
    pub fn executed(&self) -> Vec<Action> {
        self.lock().executed.clone()
    }

    /// Chat lines sent by the agent.
    pub fn chat_log(&self) -> Vec<String> {
        self.lock().chat.clone()
    }

    pub fn position(&self) -> Position {
        self.lock().position
    }
}

#[async_trait]
impl WorldInterface for SimWorld {
    async fn observe(&self) -> Result<Observation, AgentError> {
        let mut state = self.lock();
        if state.observe_failures > 0 {
            state.observe_failures -= 1;
            return Err(AgentError::World("simulated observation failure".to_string()));
        }
        Ok(state.snapshot())
    }

    async fn execute(&self, action: &Action) -> ActionResult {
        let kind = action.kind();
        let delay = self.lock().delays.get(&kind).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        state.executed.push(action.clone());
        if let Some(error) = state.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            debug!(action = %kind, %error, "scripted failure");
            return ActionResult::failure(error);
        }
        state.apply(action)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a [`SimWorld`].
pub struct SimWorldBuilder {
    state: SimState,
}

impl SimWorldBuilder {
    pub fn at(mut self, position: Position) -> Self {
        self.state.position = position;
        self
    }

    pub fn health(mut self, health: f32) -> Self {
        self.state.health = health;
        self
    }

    pub fn food(mut self, food: u32) -> Self {
        self.state.food = food.min(20);
        self
    }

    pub fn item(mut self, name: &str, count: u32) -> Self {
        self.state.add_item(name, count);
        self
    }

    /// Hold `name`; it must also be added with [`SimWorldBuilder::item`].
    pub fn holding(mut self, name: &str) -> Self {
        self.state.held = Some(name.to_string());
        self
    }

    /// A diggable block in plain view.
    pub fn block(self, name: &str, position: Position) -> Self {
        self.block_with(name, position, true, true)
    }

    pub fn block_with(mut self, name: &str, position: Position, diggable: bool, line_of_sight: bool) -> Self {
        self.state.blocks.push(SimBlock {
            name: name.to_string(),
            position,
            diggable,
            line_of_sight,
        });
        self
    }

    /// A solid ground block a table can be placed on.
    pub fn ground(mut self, position: Position) -> Self {
        self.state.ground.push(position);
        self
    }

    pub fn entity(mut self, kind: EntityKind, name: &str, position: Position) -> Self {
        let id = self.state.next_entity_id;
        self.state.next_entity_id += 1;
        self.state.entities.push(SimEntity {
            id,
            kind,
            name: name.to_string(),
            position,
        });
        self
    }

    pub fn server(mut self, name: &str) -> Self {
        self.state.server_name = Some(name.to_string());
        self
    }

    pub fn build(self) -> SimWorld {
        SimWorld {
            state: Mutex::new(self.state),
        }
    }
}
