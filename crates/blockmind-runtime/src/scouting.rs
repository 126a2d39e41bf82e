//! Random movement targets for scouting, retreating and unsticking.
//!
//! Every caller passes its own RNG so runs are reproducible from a seed.
//!
//! # Example
//!
//! ```rust
//! use blockmind_runtime::scouting::{explore_target, ScoutConfig};
//! use blockmind_types::Position;
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let mut rng = StdRng::seed_from_u64(7);
//! let here = Position::new(0.0, 64.0, 0.0);
//! let target = explore_target(here, &ScoutConfig::default(), &mut rng);
//! let d = ((target.x - here.x).powi(2) + (target.z - here.z).powi(2)).sqrt();
//! assert!(d >= 5.0 && d <= 19.0);
//! ```

use std::f64::consts::TAU;

use blockmind_types::Position;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Arrival range used for scouting moves.
pub const SCOUT_RANGE: f64 = 2.0;

/// Arrival range used for short local moves.
pub const LOCAL_RANGE: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    pub radius_min: f64,
    pub radius_max: f64,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            radius_min: 6.0,
            radius_max: 18.0,
        }
    }
}

fn around<R: Rng + ?Sized>(base: Position, distance: f64, rng: &mut R) -> Position {
    let angle = rng.random::<f64>() * TAU;
    Position::new(
        (base.x + angle.cos() * distance).round(),
        base.y.round(),
        (base.z + angle.sin() * distance).round(),
    )
}

/// A block-aligned point between `radius_min` and `radius_max` away from
/// `base`, in a random direction.
pub fn explore_target<R: Rng + ?Sized>(base: Position, config: &ScoutConfig, rng: &mut R) -> Position {
    let min = config.radius_min.max(2.0);
    let max = config.radius_max.max(min + 1.0);
    let distance = min + rng.random::<f64>() * (max - min);
    around(base, distance, rng)
}

/// A short hop of at most `radius` (never under 1.5) around `base`.
pub fn local_target<R: Rng + ?Sized>(base: Position, radius: f64, rng: &mut R) -> Position {
    let distance = (rng.random::<f64>() * radius.max(2.0)).max(1.5);
    around(base, distance, rng)
}
