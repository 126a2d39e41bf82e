//! [`PlannerQueue`] – non-blocking bridge to the slow external planner.
//!
//! The tick loop never awaits the planner.  Instead, each tick:
//!
//! 1. [`poll`](PlannerQueue::poll) drains replies that finished since the
//!    last tick.  Each reply is stamped with the time the planner answered,
//!    not the time it was polled.  Failures and disallowed proposals only set
//!    [`last_error`](PlannerQueue::last_error).
//! 2. [`request`](PlannerQueue::request) spawns a detached task calling
//!    [`Planner::propose`], unless one is already in flight or the previous
//!    request was made less than the minimum spacing ago.
//! 3. [`take`](PlannerQueue::take) hands out the buffered proposal if it is
//!    still fresh, together with the operator directive its request carried.
//!    Stale proposals are discarded, never applied.
//!
//! When nothing fresh is available the arbitrator uses [`fallback`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Instant;
//! use async_trait::async_trait;
//! use blockmind_kernel::ActionPolicy;
//! use blockmind_runtime::planner_queue::{Planner, PlannerQueue, PlannerQueueConfig, PlannerRequest};
//! use blockmind_types::{AgentError, Decision, DecisionSource, Observation};
//!
//! struct AlwaysObserve;
//!
//! #[async_trait]
//! impl Planner for AlwaysObserve {
//!     async fn propose(&self, _request: PlannerRequest) -> Result<Decision, AgentError> {
//!         Ok(Decision::observe("nothing to do", DecisionSource::Planner))
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let planner: Arc<dyn Planner> = Arc::new(AlwaysObserve);
//! let mut queue = PlannerQueue::new(PlannerQueueConfig::default());
//! let now = Instant::now();
//! assert!(queue.request(&planner, PlannerRequest::new("survive", Observation::default()), now));
//! // A second request while the first is in flight is a no-op.
//! assert!(!queue.request(&planner, PlannerRequest::new("survive", Observation::default()), now));
//!
//! while queue.is_in_flight() {
//!     tokio::task::yield_now().await;
//!     queue.poll(&ActionPolicy::allow_all());
//! }
//! let proposal = queue.take(Instant::now()).unwrap();
//! assert!(proposal.directive.is_none());
//! # });
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use blockmind_kernel::ActionPolicy;
use blockmind_memory::MemoryEvent;
use blockmind_types::{Action, AgentError, Decision, DecisionSource, Observation, Position};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scouting::{self, LOCAL_RANGE, SCOUT_RANGE, ScoutConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Planner seam
// ─────────────────────────────────────────────────────────────────────────────

/// A distance to a named entity, for [`PriorityState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedDistance {
    pub name: String,
    pub distance: f64,
}

/// Survival summary handed to the planner next to the raw observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityState {
    pub health: f32,
    pub food: u32,
    pub nearest_hostile: Option<NamedDistance>,
    pub nearest_food_animal: Option<NamedDistance>,
    pub hints: Vec<String>,
}

impl PriorityState {
    pub fn from_observation(obs: &Observation) -> Self {
        let nearest_hostile = obs.nearest_hostile().map(|e| NamedDistance {
            name: e.name.clone(),
            distance: e.distance,
        });
        let nearest_food_animal = obs
            .nearest_entity_named(&blockmind_types::catalog::HUNTABLE_ANIMALS, f64::INFINITY)
            .map(|e| NamedDistance {
                name: e.name.clone(),
                distance: e.distance,
            });

        let mut hints = Vec::new();
        if obs.health <= 10.0 {
            hints.push("Health is low; prioritize safety and avoiding fights.".to_string());
        }
        if obs.food <= 8 {
            hints.push("Hunger is low; prioritize obtaining food.".to_string());
        }
        if nearest_hostile.as_ref().is_some_and(|h| h.distance < 16.0) {
            hints.push("Hostile mob is close; create distance and avoid combat.".to_string());
        }

        Self {
            health: obs.health,
            food: obs.food,
            nearest_hostile,
            nearest_food_animal,
            hints,
        }
    }
}

/// An operator directive as shown to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDirective {
    pub source: String,
    pub text: String,
}

/// Everything a planner gets to see for one proposal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerRequest {
    pub goal: String,
    pub allowed_actions: Vec<String>,
    pub observation: Observation,
    pub priority_state: PriorityState,
    pub operator_directive: Option<OperatorDirective>,
    pub recent_events: Vec<MemoryEvent>,
}

impl PlannerRequest {
    /// A request with the priority state derived from `observation` and no
    /// directive or history.
    pub fn new(goal: impl Into<String>, observation: Observation) -> Self {
        let priority_state = PriorityState::from_observation(&observation);
        Self {
            goal: goal.into(),
            allowed_actions: Vec::new(),
            observation,
            priority_state,
            operator_directive: None,
            recent_events: Vec::new(),
        }
    }
}

/// The external planning service.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose the next decision.  May take seconds.
    async fn propose(&self, request: PlannerRequest) -> Result<Decision, AgentError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerQueueConfig {
    /// Minimum time between two requests.
    pub min_spacing_ms: u64,
    /// Proposals older than this are discarded.
    pub max_age_ms: u64,
}

impl Default for PlannerQueueConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 500,
            max_age_ms: 12_000,
        }
    }
}

/// A fresh planner proposal handed out by [`PlannerQueue::take`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerProposal {
    pub decision: Decision,
    /// Text of the operator directive the request carried, if any.
    pub directive: Option<String>,
}

/// What the detached task sends back.
#[derive(Debug)]
struct Reply {
    outcome: Result<Decision, AgentError>,
    directive: Option<String>,
    completed_at: Instant,
}

#[derive(Debug, Clone)]
struct QueuedProposal {
    proposal: PlannerProposal,
    completed_at: Instant,
}

pub struct PlannerQueue {
    config: PlannerQueueConfig,
    tx: mpsc::UnboundedSender<Reply>,
    rx: mpsc::UnboundedReceiver<Reply>,
    task: Option<JoinHandle<()>>,
    in_flight: bool,
    last_requested_at: Option<Instant>,
    next: Option<QueuedProposal>,
    last_error: Option<String>,
    requests_sent: u64,
}

impl PlannerQueue {
    pub fn new(config: PlannerQueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            tx,
            rx,
            task: None,
            in_flight: false,
            last_requested_at: None,
            next: None,
            last_error: None,
            requests_sent: 0,
        }
    }

    pub fn config(&self) -> &PlannerQueueConfig {
        &self.config
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn has_proposal(&self) -> bool {
        self.next.is_some()
    }

    /// `true` when [`request`](Self::request) would start a new request.
    pub fn can_request(&self, now: Instant) -> bool {
        let spacing = Duration::from_millis(self.config.min_spacing_ms);
        !self.in_flight
            && !self
                .last_requested_at
                .is_some_and(|at| now.saturating_duration_since(at) < spacing)
    }

    /// Start a planner request in the background.  Returns `false` (and does
    /// nothing) while a request is in flight or within the minimum spacing.
    ///
    /// The reply is stamped on the Tokio clock when the planner answers, and
    /// never earlier than `now`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request(&mut self, planner: &Arc<dyn Planner>, request: PlannerRequest, now: Instant) -> bool {
        if !self.can_request(now) {
            return false;
        }

        self.in_flight = true;
        self.last_requested_at = Some(now);
        self.requests_sent += 1;
        debug!(request = self.requests_sent, "planner request sent");

        let planner = Arc::clone(planner);
        let tx = self.tx.clone();
        let directive = request.operator_directive.as_ref().map(|d| d.text.clone());
        self.task = Some(tokio::spawn(async move {
            let outcome = planner.propose(request).await;
            let completed_at = tokio::time::Instant::now().into_std().max(now);
            // The receiver lives as long as the queue; a send error only
            // means the agent is shutting down.
            let _ = tx.send(Reply {
                outcome,
                directive,
                completed_at,
            });
        }));
        true
    }

    /// Drain finished replies without blocking.  Returns the errors recorded
    /// by this call.
    pub fn poll(&mut self, policy: &ActionPolicy) -> Vec<String> {
        let mut errors = Vec::new();
        while let Ok(reply) = self.rx.try_recv() {
            self.in_flight = false;
            self.task = None;
            match reply.outcome {
                Ok(decision) => match policy.check(decision.kind()) {
                    Ok(()) => {
                        info!(action = %decision.kind(), reason = %decision.reason, "planner queued decision");
                        self.next = Some(QueuedProposal {
                            proposal: PlannerProposal {
                                decision,
                                directive: reply.directive,
                            },
                            completed_at: reply.completed_at,
                        });
                        self.last_error = None;
                    }
                    Err(_) => {
                        let error = format!("action not allowed: {}", decision.kind());
                        warn!(%error, "planner proposal rejected");
                        errors.push(error.clone());
                        self.last_error = Some(error);
                    }
                },
                Err(e) => {
                    warn!(error = %e, "planner error");
                    errors.push(e.to_string());
                    self.last_error = Some(e.to_string());
                }
            }
        }

        // A task that ended without replying (panic, cancellation) must not
        // wedge the queue.
        if self.task.as_ref().is_some_and(JoinHandle::is_finished) {
            self.task = None;
            if self.in_flight && self.rx.is_empty() {
                self.in_flight = false;
                let error = "planner task ended without a reply".to_string();
                errors.push(error.clone());
                self.last_error = Some(error);
            }
        }
        errors
    }

    /// Hand out the buffered proposal if the planner answered less than the
    /// max age ago.
    pub fn take(&mut self, now: Instant) -> Option<PlannerProposal> {
        let queued = self.next.take()?;
        let age = now.saturating_duration_since(queued.completed_at);
        if age > Duration::from_millis(self.config.max_age_ms) {
            debug!(age_ms = age.as_millis() as u64, "stale planner proposal discarded");
            return None;
        }
        Some(queued.proposal)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fallback
// ─────────────────────────────────────────────────────────────────────────────

/// Hostile distance under which the fallback keeps retreating.
const FALLBACK_HOSTILE_RADIUS: f64 = 10.0;
/// Without an objective, hold still this long after the last progress.
const FALLBACK_HOLD: Duration = Duration::from_millis(8_000);
/// A fallback move target is reused for this long.
const FALLBACK_TARGET_TTL: Duration = Duration::from_millis(2_200);
/// Radius of fresh fallback hops.
const FALLBACK_HOP_RADIUS: f64 = 2.0;

/// The short move the fallback is currently making.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackState {
    pub target: Option<Position>,
    pub created_at: Option<Instant>,
}

impl FallbackState {
    pub fn clear(&mut self) {
        self.target = None;
        self.created_at = None;
    }
}

/// Inputs to [`fallback`] that live outside the observation.
#[derive(Debug, Clone, Copy)]
pub struct FallbackContext<'a> {
    pub objective_active: bool,
    pub last_progress_at: Instant,
    pub scout: &'a ScoutConfig,
}

/// A safe decision for when no objective or fresh proposal is available.
pub fn fallback<R: Rng + ?Sized>(
    obs: &Observation,
    ctx: FallbackContext<'_>,
    state: &mut FallbackState,
    rng: &mut R,
    now: Instant,
) -> Decision {
    let source = DecisionSource::Fallback;

    if obs
        .nearest_hostile()
        .is_some_and(|h| h.distance < FALLBACK_HOSTILE_RADIUS)
    {
        let target = scouting::explore_target(obs.position, ctx.scout, rng);
        return Decision::new(
            Action::move_to(target, SCOUT_RANGE),
            "Fallback: keep retreating from nearby hostile while planner thinks",
            source,
        );
    }
    if obs.is_moving {
        return Decision::observe(
            "Fallback: continuing current movement while planner thinks",
            source,
        );
    }
    if !ctx.objective_active && now.saturating_duration_since(ctx.last_progress_at) < FALLBACK_HOLD {
        return Decision::observe("Fallback: hold briefly while planner thinks", source);
    }
    if let (Some(target), Some(created_at)) = (state.target, state.created_at) {
        if now.saturating_duration_since(created_at) < FALLBACK_TARGET_TTL {
            return Decision::new(
                Action::move_to(target, LOCAL_RANGE),
                "Fallback: continue short move while planner thinks",
                source,
            );
        }
    }

    let target = scouting::local_target(obs.position, FALLBACK_HOP_RADIUS, rng);
    state.target = Some(target);
    state.created_at = Some(now);
    Decision::new(
        Action::move_to(target, LOCAL_RANGE),
        "Fallback: keep moving while planner thinks",
        source,
    )
}
