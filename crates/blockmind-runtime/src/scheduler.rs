//! Tick scheduling.
//!
//! [`TimerSet`] keeps one cancellable deadline per [`TimerPurpose`].  Arming
//! a purpose replaces its previous deadline, so a timer can never be
//! scheduled twice.  [`next_tick_delay`] adapts the tick interval to what
//! the agent is doing.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use blockmind_runtime::scheduler::{TimerPurpose, TimerSet};
//!
//! let now = Instant::now();
//! let mut timers = TimerSet::new();
//! timers.arm_in(TimerPurpose::Tick, Duration::from_millis(500), now);
//! timers.arm_in(TimerPurpose::Tick, Duration::from_millis(100), now);
//! timers.arm_in(TimerPurpose::WatchdogCheck, Duration::from_secs(5), now);
//!
//! assert_eq!(timers.next_due(), Some((TimerPurpose::Tick, now + Duration::from_millis(100))));
//! assert_eq!(timers.take_due(now + Duration::from_millis(100)), vec![TimerPurpose::Tick]);
//! assert!(!timers.is_armed(TimerPurpose::Tick));
//! ```

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::objective::ObjectiveKind;

// ─────────────────────────────────────────────────────────────────────────────
// Timers
// ─────────────────────────────────────────────────────────────────────────────

/// What a deadline is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPurpose {
    /// Run the next tick.
    Tick,
    /// Check on an in-flight planner request.
    PlannerRetry,
    /// Periodic housekeeping: stall checks and cache eviction.
    WatchdogCheck,
}

#[derive(Debug, Clone, Default)]
pub struct TimerSet {
    deadlines: BTreeMap<TimerPurpose, Instant>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `purpose` for `at`, returning the deadline it replaced.
    pub fn arm(&mut self, purpose: TimerPurpose, at: Instant) -> Option<Instant> {
        self.deadlines.insert(purpose, at)
    }

    pub fn arm_in(&mut self, purpose: TimerPurpose, delay: Duration, now: Instant) -> Option<Instant> {
        self.arm(purpose, now + delay)
    }

    pub fn cancel(&mut self, purpose: TimerPurpose) -> bool {
        self.deadlines.remove(&purpose).is_some()
    }

    pub fn is_armed(&self, purpose: TimerPurpose) -> bool {
        self.deadlines.contains_key(&purpose)
    }

    pub fn deadline(&self, purpose: TimerPurpose) -> Option<Instant> {
        self.deadlines.get(&purpose).copied()
    }

    /// The earliest deadline.  Ties go to the purpose declared first.
    pub fn next_due(&self) -> Option<(TimerPurpose, Instant)> {
        self.deadlines
            .iter()
            .min_by_key(|(purpose, at)| (**at, **purpose))
            .map(|(purpose, at)| (*purpose, *at))
    }

    /// Disarm and return every purpose due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerPurpose> {
        let mut due: Vec<(Instant, TimerPurpose)> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(purpose, at)| (*at, *purpose))
            .collect();
        due.sort();
        for (_, purpose) in &due {
            self.deadlines.remove(purpose);
        }
        due.into_iter().map(|(_, purpose)| purpose).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Adaptive interval
// ─────────────────────────────────────────────────────────────────────────────

const MIN_WORK_TICK_MS: u64 = 250;
const MIN_IDLE_TICK_MS: u64 = 350;
const MAX_IDLE_TICK_MS: u64 = 1_200;
const PLANNER_WAIT_MS: u64 = 650;
const MOVING_TICK_MS: u64 = 350;
const MIN_ERROR_BACKOFF_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base tick interval; also the error backoff when above one second.
    pub tick_ms: u64,
    pub loot_tick_ms: u64,
    pub combat_tick_ms: u64,
    pub gather_tick_ms: u64,
    /// How often an in-flight planner request is checked between ticks.
    pub planner_retry_ms: u64,
    pub watchdog_check_ms: u64,
    /// A loot target counts as recent for this long.
    pub loot_recent_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 4_000,
            loot_tick_ms: 400,
            combat_tick_ms: 350,
            gather_tick_ms: 500,
            planner_retry_ms: 500,
            watchdog_check_ms: 5_000,
            loot_recent_ms: 4_000,
        }
    }
}

/// The facts [`next_tick_delay`] looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub planner_in_flight: bool,
    pub moving: bool,
    pub loot_recent: bool,
    pub objective: ObjectiveKind,
    /// The tick that just ran failed.
    pub errored: bool,
}

/// Delay until the next tick.
pub fn next_tick_delay(ctx: &TickContext, config: &SchedulerConfig) -> Duration {
    let ms = if ctx.errored {
        config.tick_ms.max(MIN_ERROR_BACKOFF_MS)
    } else if ctx.planner_in_flight {
        PLANNER_WAIT_MS
    } else if ctx.moving {
        MOVING_TICK_MS
    } else if ctx.loot_recent {
        config.loot_tick_ms.max(MIN_WORK_TICK_MS)
    } else {
        match ctx.objective {
            ObjectiveKind::HuntFood => config.combat_tick_ms.max(MIN_WORK_TICK_MS),
            ObjectiveKind::GatherWood => config.gather_tick_ms.max(MIN_WORK_TICK_MS),
            ObjectiveKind::EatFood => config.loot_tick_ms.max(MIN_WORK_TICK_MS),
            _ => config.tick_ms.clamp(MIN_IDLE_TICK_MS, MAX_IDLE_TICK_MS),
        }
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> TickContext {
        TickContext {
            planner_in_flight: false,
            moving: false,
            loot_recent: false,
            objective: ObjectiveKind::None,
            errored: false,
        }
    }

    fn ms(ctx: TickContext) -> u64 {
        next_tick_delay(&ctx, &SchedulerConfig::default()).as_millis() as u64
    }

    #[test]
    fn rearming_replaces_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        assert_eq!(timers.arm_in(TimerPurpose::Tick, Duration::from_secs(1), now), None);
        let replaced = timers.arm_in(TimerPurpose::Tick, Duration::from_secs(2), now);
        assert_eq!(replaced, Some(now + Duration::from_secs(1)));
        assert_eq!(timers.deadline(TimerPurpose::Tick), Some(now + Duration::from_secs(2)));
        assert_eq!(timers.take_due(now + Duration::from_secs(1)), Vec::new());
    }

    #[test]
    fn take_due_orders_by_deadline() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerPurpose::Tick, now + Duration::from_millis(30));
        timers.arm(TimerPurpose::WatchdogCheck, now + Duration::from_millis(10));
        timers.arm(TimerPurpose::PlannerRetry, now + Duration::from_millis(90));
        assert_eq!(
            timers.take_due(now + Duration::from_millis(50)),
            vec![TimerPurpose::WatchdogCheck, TimerPurpose::Tick]
        );
        assert!(timers.is_armed(TimerPurpose::PlannerRetry));
    }

    #[test]
    fn cancel_disarms() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        timers.arm(TimerPurpose::PlannerRetry, now);
        assert!(timers.cancel(TimerPurpose::PlannerRetry));
        assert!(!timers.cancel(TimerPurpose::PlannerRetry));
        assert!(timers.is_empty());
        assert_eq!(timers.next_due(), None);
    }

    #[test]
    fn delay_table() {
        assert_eq!(ms(TickContext { planner_in_flight: true, moving: true, ..idle() }), 650);
        assert_eq!(ms(TickContext { moving: true, ..idle() }), 350);
        assert_eq!(ms(TickContext { loot_recent: true, objective: ObjectiveKind::HuntFood, ..idle() }), 400);
        assert_eq!(ms(TickContext { objective: ObjectiveKind::HuntFood, ..idle() }), 350);
        assert_eq!(ms(TickContext { objective: ObjectiveKind::GatherWood, ..idle() }), 500);
        assert_eq!(ms(TickContext { objective: ObjectiveKind::EatFood, ..idle() }), 400);
        assert_eq!(ms(idle()), 1_200);
        assert_eq!(ms(TickContext { errored: true, planner_in_flight: true, ..idle() }), 4_000);
    }

    #[test]
    fn idle_delay_is_clamped_and_floors_apply() {
        let config = SchedulerConfig {
            tick_ms: 100,
            gather_tick_ms: 10,
            ..SchedulerConfig::default()
        };
        assert_eq!(next_tick_delay(&idle(), &config), Duration::from_millis(350));
        let gather = TickContext { objective: ObjectiveKind::GatherWood, ..idle() };
        assert_eq!(next_tick_delay(&gather, &config), Duration::from_millis(250));
        let failed = TickContext { errored: true, ..idle() };
        assert_eq!(next_tick_delay(&failed, &config), Duration::from_millis(1_000));
    }
}
