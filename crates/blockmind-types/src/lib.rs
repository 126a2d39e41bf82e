//! `blockmind-types` – the shared data model.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`observation`] – [`Observation`]: the immutable per-tick world snapshot
//!   and the query helpers the objective tracker and arbitrator rely on.
//! - [`action`] – [`Action`]: the strictly typed primitive actions the agent
//!   may request, serialised as `{"action": "...", "payload": {...}}`, plus
//!   [`Decision`] and [`ActionResult`].
//! - [`catalog`] – name predicates for items, blocks and entities (wood,
//!   edible food, hostile mobs, useful drops).
//! - [`error`] – [`AgentError`]: the global error type.

pub mod action;
pub mod catalog;
pub mod error;
pub mod observation;

pub use action::{
    Action, ActionKind, ActionResult, AttackTarget, BlockTarget, ChatPayload, CraftRequest,
    Decision, DecisionSource, EquipRequest, EquipSlot, InteractTarget, LookTarget, MoveTarget,
    PlaceTarget, UseItemRequest,
};
pub use error::AgentError;
pub use observation::{
    BlockKey, BlockSnapshot, CraftingContext, EntityKind, EntitySnapshot, ItemStack, Observation,
    Position,
};
