//! [`Arbitrator`] – picks exactly one decision per tick.
//!
//! All per-tick mutable state lives in a single [`AgentState`] that the
//! caller owns and passes in.  [`Arbitrator::arbitrate`] runs a fixed
//! cascade where every later stage may overwrite the decision of an earlier
//! one:
//!
//! 1. **Lobby** – while connected to a lobby, only `observe` and retry the
//!    server transfer.
//! 2. **Directive vs objective** – an active operator directive clears the
//!    objective; otherwise the objective tracker selects or maintains one.
//! 3. **Base decision** – the objective's forced step, else a fresh planner
//!    proposal, else the local fallback.  Watchdog-blocked actions become a
//!    scouting move.
//! 4. **Safety overrides** – loot, harvest, hostile retreat (final),
//!    destructive veto, chat throttle.
//! 5. **Anti-stall** – repeated identical decisions become a move to a
//!    fresh scouting target unless a harvest target is in reach.
//! 6. **Watchdog recovery** – a stalled agent is repositioned.
//! 7. **Allow-list** – the final action must be allowed or the tick fails.
//!
//! # Example
//!
//! ```rust
//! use std::time::Instant;
//! use blockmind_kernel::ActionPolicy;
//! use blockmind_runtime::agent_loop::AgentLoopConfig;
//! use blockmind_runtime::arbitrator::{AgentState, ArbiterConfig, Arbitrator};
//! use blockmind_types::{ActionKind, EntityKind, EntitySnapshot, Observation, Position};
//!
//! let now = Instant::now();
//! let config = AgentLoopConfig { seed: Some(1), ..AgentLoopConfig::default() };
//! let mut state = AgentState::new(&config, now);
//! let arbitrator = Arbitrator::new(ArbiterConfig::default(), ActionPolicy::allow_all());
//!
//! let obs = Observation::at(Position::new(0.0, 64.0, 0.0)).with_entities(vec![EntitySnapshot::new(
//!     1,
//!     EntityKind::Hostile,
//!     "zombie",
//!     Position::new(4.0, 64.0, 0.0),
//!     4.0,
//! )]);
//! let outcome = arbitrator.arbitrate(&mut state, &obs, None, now).unwrap();
//! assert_eq!(outcome.decision.kind(), ActionKind::Move);
//! assert!(outcome.decision.reason.starts_with("Emergency retreat"));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use blockmind_kernel::{
    ActionPolicy, DecisionGate, DestructiveActionRule, ExpiringMap, ProgressWatchdog,
    SafetyVerifier,
};
use blockmind_memory::{EventKind, EventLog};
use blockmind_types::{
    Action, ActionKind, ActionResult, AgentError, BlockKey, Decision, DecisionSource, MoveTarget,
    Observation, catalog,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::agent_loop::AgentLoopConfig;
use crate::directive::{Directive, DirectiveQueue, DirectiveStatus};
use crate::lobby::LobbyTracker;
use crate::loop_guard::LoopGuard;
use crate::objective::{ObjectiveKind, ObjectiveTracker, ObjectiveTransition};
use crate::planner_queue::{
    self, FallbackContext, FallbackState, OperatorDirective, Planner, PlannerQueue,
    PlannerRequest,
};
use crate::scouting::{self, SCOUT_RANGE, ScoutConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// A hostile closer than this forces a retreat.
    pub hostile_radius: f64,
    pub loot_radius: f64,
    /// Drops closer than this are picked up without a move.
    pub loot_min_distance: f64,
    /// Looting is unsafe with a hostile closer than this.
    pub loot_hostile_radius: f64,
    /// Looting is unsafe at or below this health.
    pub loot_min_health: f32,
    /// While hunting, only drops closer than this are collected.
    pub hunt_loot_radius: f64,
    pub harvest_radius: f64,
    /// Direct harvesting needs hunger above this.
    pub harvest_min_food: u32,
    pub chat_cooldown_ms: u64,
    pub lobby_tick_ms: u64,
    /// Events handed to the planner as recent history.
    pub recent_events: usize,
    pub recovery_local_radius: f64,
    /// Disable the destructive-action veto.
    pub allow_destructive: bool,
    pub scout: ScoutConfig,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            hostile_radius: 10.0,
            loot_radius: 10.0,
            loot_min_distance: 1.1,
            loot_hostile_radius: 14.0,
            loot_min_health: 10.0,
            hunt_loot_radius: 5.0,
            harvest_radius: 6.0,
            harvest_min_food: 8,
            chat_cooldown_ms: 20_000,
            lobby_tick_ms: 1_500,
            recent_events: 40,
            recovery_local_radius: 3.0,
            allow_destructive: false,
            scout: ScoutConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentState
// ─────────────────────────────────────────────────────────────────────────────

/// The drop the agent is currently walking to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LootState {
    pub target_id: Option<u32>,
    pub updated_at: Option<Instant>,
}

impl LootState {
    pub fn is_recent(&self, window: Duration, now: Instant) -> bool {
        self.target_id.is_some()
            && self
                .updated_at
                .is_some_and(|at| now.saturating_duration_since(at) < window)
    }

    pub fn touch(&mut self, now: Instant) {
        self.updated_at = Some(now);
    }
}

/// Everything a tick reads and writes.
pub struct AgentState {
    pub tracker: ObjectiveTracker,
    pub directives: DirectiveQueue,
    pub planner: PlannerQueue,
    pub watchdog: ProgressWatchdog,
    pub loop_guard: LoopGuard,
    pub fallback: FallbackState,
    pub loot: LootState,
    /// Cells where a dig recently failed.
    pub harvest_blocked: ExpiringMap<BlockKey>,
    /// Cells where a table placement recently failed.
    pub placement_blocked: ExpiringMap<BlockKey>,
    pub last_chat_at: Option<Instant>,
    pub lobby: LobbyTracker,
    pub goal: String,
    pub events: EventLog,
    pub last_decision: Option<Decision>,
    pub last_result: Option<ActionResult>,
    pub rng: StdRng,
}

impl AgentState {
    pub fn new(config: &AgentLoopConfig, now: Instant) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        Self {
            tracker: ObjectiveTracker::new(config.objective.clone(), now),
            directives: DirectiveQueue::new(config.directive.clone()),
            planner: PlannerQueue::new(config.planner.clone()),
            watchdog: ProgressWatchdog::new(config.watchdog.clone(), now),
            loop_guard: LoopGuard::default(),
            fallback: FallbackState::default(),
            loot: LootState::default(),
            harvest_blocked: ExpiringMap::new(),
            placement_blocked: ExpiringMap::new(),
            last_chat_at: None,
            lobby: LobbyTracker::new(config.lobby.clone()),
            goal: config.goal.clone(),
            events: EventLog::with_capacity(config.event_capacity),
            last_decision: None,
            last_result: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Move objective transitions into the event log.
    pub fn record_objective_transitions(&mut self) {
        for transition in self.tracker.drain_transitions() {
            match transition {
                ObjectiveTransition::Activated { kind, notes } => {
                    self.events.push(
                        EventKind::ObjectiveActivated,
                        json!({ "objective": kind, "notes": notes }),
                    );
                }
                ObjectiveTransition::Cleared {
                    kind,
                    reason,
                    retries,
                } => {
                    self.events.push(
                        EventKind::ObjectiveCleared,
                        json!({ "objective": kind, "reason": reason, "retries": retries }),
                    );
                }
            }
        }
    }

    fn record_decision(&mut self, decision: &Decision) {
        let data = serde_json::to_value(decision)
            .unwrap_or_else(|_| json!({ "action": decision.kind(), "reason": decision.reason }));
        self.events.push(EventKind::Decision, data);
        self.last_decision = Some(decision.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arbitrator
// ─────────────────────────────────────────────────────────────────────────────

/// Output of one arbitration.
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    pub decision: Decision,
    /// A server-transfer chat command to send before acting.
    pub join_command: Option<String>,
    /// Overrides the adaptive tick delay.
    pub next_delay: Option<Duration>,
    /// The directive this decision applied, already consumed.  A directive
    /// stays pending while the planner is still working on it.
    pub directive: Option<Directive>,
}

/// Which overrides fired, for the later stages.
#[derive(Debug, Clone, Copy, Default)]
struct OverrideFlags {
    harvest_target: bool,
    hostile: bool,
}

pub struct Arbitrator {
    config: ArbiterConfig,
    gate: DecisionGate,
}

impl Arbitrator {
    /// An arbitrator enforcing `policy` with the destructive-action rule.
    pub fn new(config: ArbiterConfig, policy: ActionPolicy) -> Self {
        let mut verifier = SafetyVerifier::new();
        verifier.add_rule(Box::new(DestructiveActionRule {
            allow_destructive: config.allow_destructive,
        }));
        Self::with_gate(config, DecisionGate::new(policy, verifier))
    }

    pub fn with_gate(config: ArbiterConfig, gate: DecisionGate) -> Self {
        Self { config, gate }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn policy(&self) -> &ActionPolicy {
        self.gate.policy()
    }

    /// Run the cascade for one tick.
    ///
    /// # Errors
    ///
    /// [`AgentError::ActionNotAllowed`] when the final decision is outside the
    /// allow-list.  No state beyond the cascade's own bookkeeping is changed
    /// in that case and the pending directive is kept.
    pub fn arbitrate(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        planner: Option<&Arc<dyn Planner>>,
        now: Instant,
    ) -> Result<Arbitration, AgentError> {
        if obs.is_lobby() {
            return Ok(self.lobby_tick(state, obs, now));
        }

        let directive = self.resolve_directive(state, obs, now);
        let mut decision = self.base_decision(state, obs, planner, directive.as_ref(), now);
        // Without a planner nothing can act on the directive; drop it now.
        let applied = directive.is_some()
            && (planner.is_none() || decision.source == DecisionSource::Directive);
        let flags = self.safety_overrides(state, obs, &mut decision, now);
        if !flags.hostile {
            self.anti_stall(state, obs, &mut decision, flags);
            self.watchdog_recovery(state, obs, &mut decision, now);
        }
        state.record_objective_transitions();

        if let Err(e) = self.gate.authorize(&decision.action) {
            warn!(action = %decision.kind(), reason = %decision.reason, "final decision not allowed");
            return Err(e);
        }

        let directive = if applied {
            state.directives.consume()
        } else {
            None
        };
        if let Some(d) = &directive {
            info!(source = %d.source, text = %d.text, action = %decision.kind(), "directive applied");
            state.events.push(
                EventKind::DirectiveApplied,
                json!({ "source": d.source, "text": d.text, "action": decision.kind() }),
            );
        }
        debug!(action = %decision.kind(), reason = %decision.reason, source = ?decision.source, "decision accepted");
        state.record_decision(&decision);

        Ok(Arbitration {
            decision,
            join_command: None,
            next_delay: None,
            directive,
        })
    }

    // ── Stage 1: lobby ───────────────────────────────────────────────────────

    fn lobby_tick(&self, state: &mut AgentState, obs: &Observation, now: Instant) -> Arbitration {
        state.tracker.clear("in lobby awaiting survival transfer");
        state.record_objective_transitions();

        let join = state.lobby.retry("lobby poll", now);
        if let Some(attempt) = &join {
            state.events.push(EventKind::AutoJoin, json!(attempt));
        }
        debug!(server = ?obs.server_name, target = ?state.lobby.state().target, "lobby mode");

        let decision = Decision::observe(
            "In lobby; pausing survival actions until server transfer succeeds",
            DecisionSource::Lobby,
        );
        state.record_decision(&decision);
        Arbitration {
            decision,
            join_command: join.map(|j| j.command),
            next_delay: Some(Duration::from_millis(self.config.lobby_tick_ms)),
            directive: None,
        }
    }

    // ── Stage 2: directive vs objective ──────────────────────────────────────

    fn resolve_directive(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        now: Instant,
    ) -> Option<Directive> {
        let directive = match state.directives.peek(now) {
            DirectiveStatus::Active(d) => Some(d.clone()),
            DirectiveStatus::Expired(d) => {
                state.events.push(
                    EventKind::DirectiveExpired,
                    json!({ "source": d.source, "text": d.text }),
                );
                None
            }
            DirectiveStatus::Empty => None,
        };
        match &directive {
            Some(d) => {
                debug!(source = %d.source, text = %d.text, "active directive");
                state.tracker.clear("operator directive active");
            }
            None => {
                state.tracker.select_or_maintain(obs, now);
            }
        }
        directive
    }

    // ── Stage 3: base decision ───────────────────────────────────────────────

    fn base_decision(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        planner: Option<&Arc<dyn Planner>>,
        directive: Option<&Directive>,
        now: Instant,
    ) -> Decision {
        let scout = scouting::explore_target(obs.position, &self.config.scout, &mut state.rng);
        let blocked_placements: Vec<BlockKey> = state
            .placement_blocked
            .active(now)
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let forced = if state.tracker.should_keep(now) {
            state
                .tracker
                .forced_decision(obs, scout, &blocked_placements, now)
        } else {
            None
        };

        let mut decision = if let Some(decision) = forced {
            state.fallback.clear();
            debug!(objective = %state.tracker.kind(), action = %decision.kind(), reason = %decision.reason, "objective decision");
            decision
        } else if let Some(decision) = self.planner_decision(state, obs, planner, directive, now) {
            state.fallback.clear();
            decision
        } else {
            let ctx = FallbackContext {
                objective_active: state.tracker.kind().is_active(),
                last_progress_at: state.watchdog.last_progress_at(),
                scout: &self.config.scout,
            };
            let decision = planner_queue::fallback(obs, ctx, &mut state.fallback, &mut state.rng, now);
            debug!(
                in_flight = state.planner.is_in_flight(),
                last_error = ?state.planner.last_error(),
                action = %decision.kind(),
                reason = %decision.reason,
                "planner pending fallback"
            );
            decision
        };

        state.watchdog.record_decision(&decision.signature());
        if state.watchdog.is_blocked(decision.kind(), now) {
            let target = scouting::explore_target(obs.position, &self.config.scout, &mut state.rng);
            warn!(action = %decision.kind(), "blocked action replaced by reposition");
            state.events.push(
                EventKind::ActionBlocked,
                json!({ "action": decision.kind(), "reason": decision.reason, "stage": "watchdog" }),
            );
            decision.overwrite(
                Action::move_to(target, SCOUT_RANGE),
                "Recovery override: action temporarily blocked",
                DecisionSource::Recovery,
            );
        }
        decision
    }

    fn planner_decision(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        planner: Option<&Arc<dyn Planner>>,
        directive: Option<&Directive>,
        now: Instant,
    ) -> Option<Decision> {
        let planner = planner?;
        for error in state.planner.poll(self.gate.policy()) {
            state
                .events
                .push(EventKind::PlannerError, json!({ "error": error }));
        }

        if state.planner.can_request(now) {
            let mut request = PlannerRequest::new(state.goal.clone(), obs.clone());
            request.allowed_actions = self
                .gate
                .policy()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect();
            request.operator_directive = directive.map(|d| OperatorDirective {
                source: d.source.clone(),
                text: d.text.clone(),
            });
            request.recent_events = state.events.recent_owned(self.config.recent_events);
            if state.planner.request(planner, request, now) {
                state.events.push(
                    EventKind::PlannerQueued,
                    json!({
                        "request": state.planner.requests_sent(),
                        "directive": directive.map(|d| d.text.clone()),
                    }),
                );
            }
        }

        let proposal = state.planner.take(now)?;
        let mut decision = proposal.decision;
        // Only a reply to a request that carried this directive acts on it.
        let answers_directive =
            directive.is_some_and(|d| proposal.directive.as_deref() == Some(d.text.as_str()));
        decision.source = match decision.source {
            DecisionSource::Planner if answers_directive => DecisionSource::Directive,
            DecisionSource::Directive if !answers_directive => DecisionSource::Planner,
            source => source,
        };
        debug!(action = %decision.kind(), reason = %decision.reason, "planner decision consumed");
        Some(decision)
    }

    // ── Stage 4: safety overrides ────────────────────────────────────────────

    fn safety_overrides(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        decision: &mut Decision,
        now: Instant,
    ) -> OverrideFlags {
        let mut flags = OverrideFlags::default();
        self.loot_override(state, obs, decision, now);
        flags.harvest_target = self.harvest_override(state, obs, decision, now);
        flags.hostile = self.hostile_override(state, obs, decision);
        if !flags.hostile {
            if let Some(err) = self.gate.screen(decision, obs) {
                state.events.push(
                    EventKind::ActionBlocked,
                    json!({ "stage": "safety", "error": err.to_string() }),
                );
            }
            self.throttle_chat(state, decision, now);
        }
        flags
    }

    fn loot_override(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        decision: &mut Decision,
        now: Instant,
    ) {
        let cfg = &self.config;
        let Some(item) = obs.nearest_useful_drop(cfg.loot_radius) else {
            return;
        };
        let hostile_near = obs
            .nearest_hostile()
            .is_some_and(|h| h.distance < cfg.loot_hostile_radius);
        let unsafe_for_loot = hostile_near || obs.health <= cfg.loot_min_health;
        let hunting = state.tracker.kind() == ObjectiveKind::HuntFood;
        if item.distance <= cfg.loot_min_distance
            || unsafe_for_loot
            || !is_soft(decision)
            || (hunting && item.distance >= cfg.hunt_loot_radius)
        {
            return;
        }

        state.loot.target_id = Some(item.id);
        state.loot.touch(now);
        let reason = if item.name.is_empty() {
            "Loot override: collecting drop".to_string()
        } else {
            format!("Loot override: collecting drop ({})", item.name)
        };
        info!(item = %item.name, distance = item.distance, "loot override");
        decision.overwrite(
            Action::Move(MoveTarget::new(item.position, 1.0)),
            reason,
            DecisionSource::Override,
        );
    }

    /// Returns `true` when a direct harvest target exists, whether or not
    /// the override fired.
    fn harvest_override(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        decision: &mut Decision,
        now: Instant,
    ) -> bool {
        let cfg = &self.config;
        let Some(block) = obs
            .nearest_block(catalog::is_safe_harvest_block, cfg.harvest_radius)
            .filter(|b| b.diggable && b.is_reachable())
            .filter(|b| !state.harvest_blocked.contains(&b.position.block_key(), now))
        else {
            return false;
        };

        let objective = state.tracker.kind();
        let conflicting = matches!(
            objective,
            ObjectiveKind::HuntFood | ObjectiveKind::SetupCrafting
        );
        if !conflicting
            && obs.food > cfg.harvest_min_food
            && is_soft(decision)
            && !state.watchdog.is_blocked(ActionKind::Dig, now)
        {
            info!(block = %block.name, position = %block.position.block_key(), "harvest override");
            decision.overwrite(
                Action::dig_at(block.position),
                format!("Direct harvest override: {} is nearby", block.name),
                DecisionSource::Override,
            );
        }
        true
    }

    fn hostile_override(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        decision: &mut Decision,
    ) -> bool {
        let Some(hostile) = obs
            .nearest_hostile()
            .filter(|h| h.distance < self.config.hostile_radius)
        else {
            return false;
        };
        let target = scouting::explore_target(obs.position, &self.config.scout, &mut state.rng);
        warn!(hostile = %hostile.name, distance = hostile.distance, "emergency retreat");
        decision.overwrite(
            Action::move_to(target, SCOUT_RANGE),
            format!("Emergency retreat from nearby hostile ({})", hostile.name),
            DecisionSource::Override,
        );
        true
    }

    fn throttle_chat(&self, state: &mut AgentState, decision: &mut Decision, now: Instant) {
        if decision.kind() != ActionKind::Chat {
            return;
        }
        let cooldown = Duration::from_millis(self.config.chat_cooldown_ms);
        if state
            .last_chat_at
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown)
        {
            debug!(cooldown_ms = self.config.chat_cooldown_ms, "chat action throttled");
            decision.overwrite(
                Action::Observe,
                format!(
                    "Chat throttled due to cooldown ({}ms)",
                    self.config.chat_cooldown_ms
                ),
                DecisionSource::Override,
            );
        } else {
            state.last_chat_at = Some(now);
        }
    }

    // ── Stage 5: anti-stall ──────────────────────────────────────────────────

    fn anti_stall(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        decision: &mut Decision,
        flags: OverrideFlags,
    ) {
        let signature = decision.signature();
        if !state.loop_guard.record(&signature) || flags.harvest_target {
            return;
        }

        let mut action = Action::move_to(
            scouting::explore_target(obs.position, &self.config.scout, &mut state.rng),
            SCOUT_RANGE,
        );
        for _ in 0..8 {
            if action.signature() != signature {
                break;
            }
            action = Action::move_to(
                scouting::explore_target(obs.position, &self.config.scout, &mut state.rng),
                SCOUT_RANGE,
            );
        }
        let repeats = state.loop_guard.threshold();
        info!(repeats, repeated = %signature, "anti-stall override");
        decision.overwrite(
            action,
            format!("Anti-stall override after repeated {repeats}x decisions"),
            DecisionSource::Override,
        );
        state.loop_guard.reset();
    }

    // ── Stage 6: watchdog recovery ───────────────────────────────────────────

    fn watchdog_recovery(
        &self,
        state: &mut AgentState,
        obs: &Observation,
        decision: &mut Decision,
        now: Instant,
    ) {
        let objective = state.tracker.kind();
        if !state.watchdog.should_force_recovery(now) && !state.watchdog.same_decision_exceeded() {
            return;
        }

        let sticky = objective == ObjectiveKind::SetupCrafting;
        let (target, reason) = if sticky {
            (
                scouting::local_target(obs.position, self.config.recovery_local_radius, &mut state.rng),
                "Watchdog recovery: local reposition for crafting setup",
            )
        } else {
            state.tracker.clear("watchdog recovery");
            (
                scouting::explore_target(obs.position, &self.config.scout, &mut state.rng),
                "Watchdog recovery: forced reposition to break stuck loop",
            )
        };

        let watchdog = &state.watchdog;
        warn!(
            no_progress_ticks = watchdog.no_progress_ticks(),
            same_decision_count = watchdog.same_decision_count(),
            objective = %objective,
            sticky,
            "watchdog forced recovery"
        );
        state.events.push(
            EventKind::WatchdogRecovery,
            json!({
                "noProgressTicks": watchdog.no_progress_ticks(),
                "sameDecisionCount": watchdog.same_decision_count(),
                "objective": objective,
                "sticky": sticky,
            }),
        );
        decision.overwrite(
            Action::move_to(target, SCOUT_RANGE),
            reason,
            DecisionSource::Recovery,
        );
        state.watchdog.mark_recovered(now);
    }
}

/// Decisions the overrides are allowed to replace.
fn is_soft(decision: &Decision) -> bool {
    matches!(decision.kind(), ActionKind::Observe | ActionKind::Move)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blockmind_types::{BlockSnapshot, EntityKind, EntitySnapshot, ItemStack, Position};

    fn state(now: Instant) -> AgentState {
        let config = AgentLoopConfig {
            seed: Some(42),
            ..AgentLoopConfig::default()
        };
        AgentState::new(&config, now)
    }

    fn arbiter() -> Arbitrator {
        Arbitrator::new(ArbiterConfig::default(), ActionPolicy::allow_all())
    }

    fn origin() -> Observation {
        Observation::at(Position::new(0.0, 64.0, 0.0))
    }

    /// Enough wood that no objective is chosen.
    fn settled() -> Observation {
        let mut obs = origin();
        obs.inventory.push(ItemStack::new("oak_log", 8));
        obs
    }

    fn hostile(distance: f64) -> EntitySnapshot {
        EntitySnapshot::new(
            9,
            EntityKind::Hostile,
            "zombie",
            Position::new(distance, 64.0, 0.0),
            distance,
        )
    }

    struct Fixed(Decision);

    #[async_trait]
    impl Planner for Fixed {
        async fn propose(&self, _request: PlannerRequest) -> Result<Decision, AgentError> {
            Ok(self.0.clone())
        }
    }

    /// Let the spawned planner task finish, then arbitrate again.
    async fn with_proposal(
        arbiter: &Arbitrator,
        state: &mut AgentState,
        obs: &Observation,
        planner: &Arc<dyn Planner>,
        now: Instant,
    ) -> Arbitration {
        arbiter.arbitrate(state, obs, Some(planner), now).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        arbiter
            .arbitrate(state, obs, Some(planner), now + Duration::from_millis(600))
            .unwrap()
    }

    #[test]
    fn lobby_pauses_and_retries_join() {
        let now = Instant::now();
        let mut state = state(now);
        state
            .lobby
            .on_server_message("Available servers: survival-1", now);
        let mut obs = settled();
        obs.server_name = Some("lobby-2".into());

        let early = arbiter().arbitrate(&mut state, &obs, None, now).unwrap();
        assert_eq!(early.decision.kind(), ActionKind::Observe);
        assert_eq!(early.decision.source, DecisionSource::Lobby);
        assert_eq!(early.next_delay, Some(Duration::from_millis(1_500)));
        assert!(early.join_command.is_none());

        let later = arbiter()
            .arbitrate(&mut state, &obs, None, now + Duration::from_secs(7))
            .unwrap();
        assert_eq!(later.join_command.as_deref(), Some("/server survival-1"));
        assert!(state.events.last_of(EventKind::AutoJoin).is_some());
    }

    #[test]
    fn hostile_retreat_beats_objective() {
        let now = Instant::now();
        let mut state = state(now);
        let log = Position::new(2.0, 64.0, 0.0);
        let mut obs = origin().with_entities(vec![hostile(5.0)]);
        obs.blocks.push(BlockSnapshot::new("oak_log", log, 2.0));

        let out = arbiter().arbitrate(&mut state, &obs, None, now).unwrap();
        assert_eq!(out.decision.kind(), ActionKind::Move);
        assert_eq!(out.decision.reason, "Emergency retreat from nearby hostile (zombie)");
    }

    #[test]
    fn hungry_agent_equips_then_eats() {
        let now = Instant::now();
        let mut state = state(now);
        let mut obs = settled();
        obs.food = 6;
        obs.inventory.push(ItemStack::new("cooked_beef", 3));

        let first = arbiter().arbitrate(&mut state, &obs, None, now).unwrap();
        assert_eq!(state.tracker.kind(), ObjectiveKind::EatFood);
        assert_eq!(first.decision.kind(), ActionKind::Equip);

        obs.held_item = Some(ItemStack::new("cooked_beef", 3));
        let second = arbiter()
            .arbitrate(&mut state, &obs, None, now + Duration::from_secs(1))
            .unwrap();
        assert_eq!(second.decision.kind(), ActionKind::UseItem);
        assert!(state.events.last_of(EventKind::ObjectiveActivated).is_some());
    }

    #[test]
    fn no_wood_digs_reachable_log() {
        let now = Instant::now();
        let mut state = state(now);
        let log = Position::new(3.0, 64.0, 0.0);
        let mut obs = origin();
        obs.blocks.push(BlockSnapshot::new("oak_log", log, 3.0));

        let out = arbiter().arbitrate(&mut state, &obs, None, now).unwrap();
        assert_eq!(state.tracker.kind(), ObjectiveKind::GatherWood);
        assert_eq!(out.decision.action, Action::dig_at(log));
    }

    #[test]
    fn blocked_dig_becomes_reposition() {
        let now = Instant::now();
        let mut state = state(now);
        for _ in 0..3 {
            state.watchdog.record_failure(ActionKind::Dig, "no path", now);
        }
        let mut obs = origin();
        obs.blocks
            .push(BlockSnapshot::new("oak_log", Position::new(3.0, 64.0, 0.0), 3.0));

        let out = arbiter()
            .arbitrate(&mut state, &obs, None, now + Duration::from_secs(1))
            .unwrap();
        assert_eq!(out.decision.kind(), ActionKind::Move);
        assert_eq!(out.decision.reason, "Recovery override: action temporarily blocked");
        assert_eq!(out.decision.source, DecisionSource::Recovery);
    }

    #[test]
    fn repeated_observe_triggers_anti_stall() {
        let now = Instant::now();
        let mut state = state(now);
        let obs = settled();
        let arbiter = arbiter();

        for i in 0..3 {
            let out = arbiter
                .arbitrate(&mut state, &obs, None, now + Duration::from_millis(i * 100))
                .unwrap();
            assert_eq!(out.decision.kind(), ActionKind::Observe);
        }
        let out = arbiter
            .arbitrate(&mut state, &obs, None, now + Duration::from_millis(300))
            .unwrap();
        assert_eq!(out.decision.kind(), ActionKind::Move);
        assert!(out.decision.reason.starts_with("Anti-stall override after repeated 4x"));
    }

    #[test]
    fn stall_clears_objective_and_repositions() {
        let now = Instant::now();
        let mut state = state(now);
        let obs = origin();

        let out = arbiter()
            .arbitrate(&mut state, &obs, None, now + Duration::from_secs(46))
            .unwrap();
        assert_eq!(out.decision.kind(), ActionKind::Move);
        assert_eq!(
            out.decision.reason,
            "Watchdog recovery: forced reposition to break stuck loop"
        );
        assert_eq!(state.tracker.kind(), ObjectiveKind::None);
        assert!(state.events.last_of(EventKind::WatchdogRecovery).is_some());
    }

    #[test]
    fn stall_without_objective_still_repositions() {
        let now = Instant::now();
        let mut state = state(now);

        let out = arbiter()
            .arbitrate(&mut state, &settled(), None, now + Duration::from_secs(46))
            .unwrap();
        assert_eq!(state.tracker.kind(), ObjectiveKind::None);
        assert_eq!(out.decision.kind(), ActionKind::Move);
        assert_eq!(out.decision.source, DecisionSource::Recovery);
        assert!(state.events.last_of(EventKind::WatchdogRecovery).is_some());
    }

    #[test]
    fn repeated_equip_triggers_anti_stall() {
        let now = Instant::now();
        let mut state = state(now);
        let mut obs = settled();
        obs.food = 10;
        obs.inventory.push(ItemStack::new("cooked_beef", 2));
        let arbiter = arbiter();

        // the equip is never executed, so the same step comes back
        for i in 0..3 {
            let out = arbiter
                .arbitrate(&mut state, &obs, None, now + Duration::from_millis(i * 100))
                .unwrap();
            assert_eq!(out.decision.kind(), ActionKind::Equip);
        }
        let out = arbiter
            .arbitrate(&mut state, &obs, None, now + Duration::from_millis(300))
            .unwrap();
        assert_eq!(out.decision.kind(), ActionKind::Move);
        assert_eq!(out.decision.source, DecisionSource::Override);
        assert_eq!(out.decision.reason, "Anti-stall override after repeated 4x decisions");
    }

    #[test]
    fn stall_keeps_sticky_crafting_setup() {
        let now = Instant::now();
        let mut state = state(now);
        let mut obs = settled();
        obs.inventory.push(ItemStack::new("crafting_table", 1));

        let out = arbiter()
            .arbitrate(&mut state, &obs, None, now + Duration::from_secs(46))
            .unwrap();
        assert_eq!(
            out.decision.reason,
            "Watchdog recovery: local reposition for crafting setup"
        );
        assert_eq!(state.tracker.kind(), ObjectiveKind::SetupCrafting);
    }

    #[test]
    fn harvest_wins_over_loot() {
        let now = Instant::now();
        let mut state = state(now);
        let log = Position::new(2.0, 64.0, 0.0);
        let mut obs = settled().with_entities(vec![EntitySnapshot::new(
            3,
            EntityKind::Item,
            "apple",
            Position::new(0.0, 64.0, 3.0),
            3.0,
        )]);
        obs.blocks.push(BlockSnapshot::new("birch_log", log, 2.0));

        let out = arbiter().arbitrate(&mut state, &obs, None, now).unwrap();
        assert_eq!(out.decision.action, Action::dig_at(log));
        assert_eq!(state.loot.target_id, Some(3));
    }

    #[test]
    fn loot_override_moves_to_drop() {
        let now = Instant::now();
        let mut state = state(now);
        let drop = Position::new(0.0, 64.0, 4.0);
        let obs = settled().with_entities(vec![EntitySnapshot::new(
            3,
            EntityKind::Item,
            "porkchop",
            drop,
            4.0,
        )]);

        let out = arbiter().arbitrate(&mut state, &obs, None, now).unwrap();
        assert_eq!(out.decision.action, Action::Move(MoveTarget::new(drop, 1.0)));
        assert_eq!(out.decision.reason, "Loot override: collecting drop (porkchop)");
        assert!(state.loot.is_recent(Duration::from_secs(4), now));
    }

    #[test]
    fn disallowed_final_action_fails() {
        let now = Instant::now();
        let mut state = state(now);
        let arbiter = Arbitrator::new(
            ArbiterConfig::default(),
            ActionPolicy::from_kinds([ActionKind::Move]),
        );
        let err = arbiter.arbitrate(&mut state, &settled(), None, now).unwrap_err();
        assert_eq!(err, AgentError::ActionNotAllowed(ActionKind::Observe));
        assert!(state.last_decision.is_none());
    }

    #[test]
    fn chat_is_throttled_within_cooldown() {
        let now = Instant::now();
        let mut state = state(now);
        let arbiter = arbiter();
        let mut first = Decision::new(Action::chat("hi"), "greet", DecisionSource::Planner);
        arbiter.throttle_chat(&mut state, &mut first, now);
        assert_eq!(first.kind(), ActionKind::Chat);

        let mut second = Decision::new(Action::chat("hi again"), "greet", DecisionSource::Planner);
        arbiter.throttle_chat(&mut state, &mut second, now + Duration::from_secs(5));
        assert_eq!(second.kind(), ActionKind::Observe);
        assert_eq!(second.reason, "Chat throttled due to cooldown (20000ms)");
    }

    #[test]
    fn expired_directive_is_recorded_not_applied() {
        let now = Instant::now();
        let mut state = state(now);
        state.directives.enqueue("alice", "go north", now);
        let out = arbiter()
            .arbitrate(&mut state, &settled(), None, now + Duration::from_secs(61))
            .unwrap();
        assert!(out.directive.is_none());
        assert!(state.events.last_of(EventKind::DirectiveExpired).is_some());
        assert!(state.events.last_of(EventKind::DirectiveApplied).is_none());
    }

    #[tokio::test]
    async fn planner_dig_on_stone_is_vetoed() {
        let now = Instant::now();
        let mut state = state(now);
        let stone = Position::new(1.0, 63.0, 0.0);
        let mut obs = settled();
        obs.blocks.push(BlockSnapshot::new("stone", stone, 1.5));
        let planner: Arc<dyn Planner> = Arc::new(Fixed(Decision::new(
            Action::dig_at(stone),
            "mine",
            DecisionSource::Planner,
        )));

        let out = with_proposal(&arbiter(), &mut state, &obs, &planner, now).await;
        assert_eq!(out.decision.kind(), ActionKind::Observe);
        assert!(out.decision.reason.starts_with("Destructive action blocked"));
    }

    #[tokio::test]
    async fn directive_clears_objective_and_is_consumed_once() {
        let now = Instant::now();
        let mut state = state(now);
        let target = Position::new(5.0, 64.0, 5.0);
        let planner: Arc<dyn Planner> = Arc::new(Fixed(Decision::new(
            Action::move_to(target, 1.0),
            "heading over",
            DecisionSource::Planner,
        )));
        // no wood: an objective would normally be chosen
        let obs = origin();
        state.directives.enqueue("alice", "come to me", now);

        let out = with_proposal(&arbiter(), &mut state, &obs, &planner, now).await;
        assert_eq!(state.tracker.kind(), ObjectiveKind::None);
        assert_eq!(out.decision.source, DecisionSource::Directive);
        assert_eq!(out.directive.map(|d| d.text), Some("come to me".to_string()));
        assert!(state.directives.pending().is_none());
        assert!(state.events.last_of(EventKind::DirectiveApplied).is_some());
    }

    #[tokio::test]
    async fn proposal_requested_before_directive_does_not_consume_it() {
        let now = Instant::now();
        let mut state = state(now);
        let arbiter = arbiter();
        let obs = settled();
        let planner: Arc<dyn Planner> = Arc::new(Fixed(Decision::new(
            Action::move_to(Position::new(5.0, 64.0, 5.0), 1.0),
            "wandering",
            DecisionSource::Planner,
        )));

        // request goes out with no directive attached
        arbiter.arbitrate(&mut state, &obs, Some(&planner), now).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        state
            .directives
            .enqueue("alice", "come here", now + Duration::from_millis(500));

        let out = arbiter
            .arbitrate(&mut state, &obs, Some(&planner), now + Duration::from_millis(600))
            .unwrap();
        assert_eq!(out.decision.source, DecisionSource::Planner);
        assert!(out.directive.is_none());
        assert!(state.directives.pending().is_some());
        assert!(state.events.last_of(EventKind::DirectiveApplied).is_none());

        // the follow-up request carried it
        tokio::time::sleep(Duration::from_millis(20)).await;
        let out = arbiter
            .arbitrate(&mut state, &obs, Some(&planner), now + Duration::from_millis(1_200))
            .unwrap();
        assert_eq!(out.decision.source, DecisionSource::Directive);
        assert_eq!(out.directive.map(|d| d.text), Some("come here".to_string()));
        assert!(state.directives.pending().is_none());
    }
}
