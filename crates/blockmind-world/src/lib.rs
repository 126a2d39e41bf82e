//! `blockmind-world` – The World Boundary.
//!
//! The decision engine never talks to a game server directly.  It asks a
//! [`WorldInterface`] for an [`Observation`][blockmind_types::Observation]
//! and hands it back a typed [`Action`][blockmind_types::Action] to execute.
//!
//! # Modules
//!
//! - [`interface`] – [`WorldInterface`][interface::WorldInterface]: the async
//!   observe/execute contract every world backend implements.
//! - [`sim`] – [`SimWorld`][sim::SimWorld]: a deterministic in-memory world
//!   for headless runs, demos and tests, with scripted failures and delays.

pub mod interface;
pub mod sim;

pub use interface::WorldInterface;
pub use sim::{SimWorld, SimWorldBuilder};
