//! [`AgentLoop`] – the tick orchestrator.
//!
//! Each tick runs the same pipeline:
//!
//! 1. **Drain** – operator input queued on the [`ControlHandle`] since the
//!    last tick (directives, goal updates, chat lines, server messages).
//! 2. **Observe** – take a fresh [`Observation`] from the world.
//! 3. **Arbitrate** – [`Arbitrator::arbitrate`] picks exactly one decision.
//! 4. **Act** – the decision is executed under a hard timeout.
//! 5. **Re-observe** – falling back to the pre-action snapshot on error.
//! 6. **Bookkeep** – objective retries, watchdog failures and progress,
//!    harvest/placement blocks, loot tracking, audit events.
//! 7. **Publish** – a [`StatusSnapshot`] on the status channel.
//!
//! No failure escapes [`AgentLoop::tick`]: every error becomes a
//! [`TickReport::error`], a `tick_error` event and a `warn!` line, and the
//! next tick is backed off.
//!
//! # Operator control
//!
//! [`ControlHandle`] is a cheap clone that can be handed to a console,
//! a chat bridge or a test.  Everything it sends is queued and applied at the
//! start of the next tick, never mid-tick.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use blockmind_runtime::agent_loop::{AgentLoop, AgentLoopConfig};
//! use blockmind_world::SimWorld;
//!
//! # async fn demo() {
//! let mut agent = AgentLoop::new(AgentLoopConfig::default(), Arc::new(SimWorld::demo()));
//! let control = agent.handle();
//! control.set_goal("collect oak logs").unwrap();
//!
//! let report = agent.tick(Instant::now()).await;
//! println!("{:?} -> {:?}", report.decision, report.result);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockmind_kernel::{ActionPolicy, WatchdogConfig, WatchdogStatus};
use blockmind_memory::{EventKind, MemoryEvent, StateStore, StoreError};
use blockmind_types::{Action, ActionResult, AgentError, Decision, Observation};
use blockmind_world::WorldInterface;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::arbitrator::{AgentState, ArbiterConfig, Arbitrator};
use crate::directive::{DirectiveConfig, InboundClass, TrustPolicy};
use crate::lobby::LobbyConfig;
use crate::objective::{ObjectiveConfig, ObjectiveKind};
use crate::planner_queue::{Planner, PlannerQueueConfig};
use crate::scheduler::{SchedulerConfig, TickContext, TimerPurpose, TimerSet, next_tick_delay};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default long-term goal handed to the planner.
pub const DEFAULT_GOAL: &str = "Play block-world survival: stay alive, manage hunger/health, gather wood and stone, craft basic tools, secure a safe shelter before night, and make steady progression.";

/// Longest chat line the world accepts.
pub const CHAT_CHUNK_LEN: usize = 220;

/// A failed dig blocks its target cell for this long.
const HARVEST_BLOCK: Duration = Duration::from_millis(45_000);
/// A failed table placement blocks its cell for this long.
const PLACEMENT_BLOCK: Duration = Duration::from_millis(90_000);
/// Placement failure text that marks an unusable cell.
const BLOCK_UPDATE_ERROR: &str = "blockUpdate";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`AgentLoop`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    pub goal: String,
    /// Hard limit on a single action execution.
    pub action_timeout_ms: u64,
    /// Interval of the status line sent to chat.  `0` disables it.
    pub self_report_ms: u64,
    /// Maximum number of events kept in memory.
    pub event_capacity: usize,
    /// Save the event log every this many ticks when a store is attached.
    pub persist_every_ticks: u64,
    /// Seed for scouting randomness.  `None` seeds from the OS.
    pub seed: Option<u64>,
    pub objective: ObjectiveConfig,
    pub directive: DirectiveConfig,
    pub planner: PlannerQueueConfig,
    pub watchdog: WatchdogConfig,
    pub scheduler: SchedulerConfig,
    pub arbiter: ArbiterConfig,
    pub lobby: LobbyConfig,
    pub trust: TrustPolicy,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            goal: DEFAULT_GOAL.to_string(),
            action_timeout_ms: 20_000,
            self_report_ms: 45_000,
            event_capacity: 250,
            persist_every_ticks: 10,
            seed: None,
            objective: ObjectiveConfig::default(),
            directive: DirectiveConfig::default(),
            planner: PlannerQueueConfig::default(),
            watchdog: WatchdogConfig::default(),
            scheduler: SchedulerConfig::default(),
            arbiter: ArbiterConfig::default(),
            lobby: LobbyConfig::default(),
            trust: TrustPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control surface
// ─────────────────────────────────────────────────────────────────────────────

/// Operator input, applied at the start of the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxMessage {
    /// A trusted directive; bypasses the chat trust rules.
    Directive { source: String, text: String },
    SetGoal { source: String, goal: String },
    /// A raw chat line, classified by the [`TrustPolicy`].
    Chat { sender: String, text: String },
    /// A system message from the server (server lists, transfers).
    ServerMessage(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("agent loop has stopped")]
    Closed,
    #[error("goal cannot be empty")]
    EmptyGoal,
}

/// Point-in-time view of the agent, published after every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub ticks: u64,
    pub goal: String,
    pub objective: ObjectiveKind,
    pub server_name: Option<String>,
    pub last_decision: Option<Decision>,
    pub last_result: Option<ActionResult>,
    pub pending_directive: Option<String>,
    pub planner_in_flight: bool,
    pub planner_error: Option<String>,
    pub watchdog: Option<WatchdogStatus>,
    pub allowed_actions: Vec<String>,
    pub recent_events: Vec<MemoryEvent>,
}

/// Cloneable getter/setter surface for a running [`AgentLoop`].
#[derive(Debug, Clone)]
pub struct ControlHandle {
    inbox: mpsc::UnboundedSender<InboxMessage>,
    status: watch::Receiver<StatusSnapshot>,
}

impl ControlHandle {
    fn send(&self, message: InboxMessage) -> Result<(), ControlError> {
        self.inbox.send(message).map_err(|_| ControlError::Closed)
    }

    /// Queue a directive from a trusted operator (the console).
    pub fn submit_directive(&self, source: &str, text: &str) -> Result<(), ControlError> {
        self.send(InboxMessage::Directive {
            source: source.to_string(),
            text: text.to_string(),
        })
    }

    /// Replace the long-term goal.
    ///
    /// # Errors
    ///
    /// [`ControlError::EmptyGoal`] for blank text.
    pub fn set_goal(&self, goal: &str) -> Result<(), ControlError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(ControlError::EmptyGoal);
        }
        self.send(InboxMessage::SetGoal {
            source: "console".to_string(),
            goal: goal.to_string(),
        })
    }

    /// Forward a player chat line; trust rules decide what happens to it.
    pub fn chat_message(&self, sender: &str, text: &str) -> Result<(), ControlError> {
        self.send(InboxMessage::Chat {
            sender: sender.to_string(),
            text: text.to_string(),
        })
    }

    pub fn server_message(&self, text: &str) -> Result<(), ControlError> {
        self.send(InboxMessage::ServerMessage(text.to_string()))
    }

    /// The snapshot published by the most recent tick.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Wait until the next tick publishes a snapshot.
    pub async fn changed(&mut self) -> Result<StatusSnapshot, ControlError> {
        self.status.changed().await.map_err(|_| ControlError::Closed)?;
        Ok(self.status.borrow_and_update().clone())
    }
}

/// Outcome of one [`AgentLoop::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub decision: Option<Decision>,
    pub result: Option<ActionResult>,
    pub error: Option<AgentError>,
    /// Delay until the next tick should run.
    pub next_delay: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Split `text` into chunks of at most `max_len` characters.
///
/// Chunks break at the last space within the limit unless that space sits in
/// the first half of the chunk, in which case the word is cut hard.
pub fn split_chat_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut parts = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        if rest.chars().count() <= max_len {
            parts.push(rest.to_string());
            break;
        }
        let byte_at = |n: usize| rest.char_indices().nth(n).map_or(rest.len(), |(i, _)| i);
        let limit = byte_at(max_len);
        let half = byte_at(max_len / 2);
        let window = byte_at(max_len + 1);
        let cut = match rest[..window].rfind(' ') {
            Some(space) if space >= half && space > 0 => space,
            _ => limit,
        };
        let part = rest[..cut].trim();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        rest = rest[cut..].trim_start();
    }
    parts
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────────────────────────────────────

/// The tick orchestrator.
///
/// Owns the world handle, the optional planner, the [`Arbitrator`] and all
/// mutable [`AgentState`].  Drive it with [`AgentLoop::run`], or call
/// [`AgentLoop::tick`] directly for step-by-step control.
pub struct AgentLoop {
    config: AgentLoopConfig,
    world: Arc<dyn WorldInterface>,
    planner: Option<Arc<dyn Planner>>,
    arbitrator: Arbitrator,
    state: AgentState,
    store: Option<StateStore>,
    inbox_tx: mpsc::UnboundedSender<InboxMessage>,
    inbox: mpsc::UnboundedReceiver<InboxMessage>,
    status_tx: watch::Sender<StatusSnapshot>,
    /// Chat lines to send before the next action.
    outbox: Vec<String>,
    last_report_at: Option<Instant>,
    ticks: u64,
}

impl AgentLoop {
    /// Build a loop allowing every action, with no planner and no store.
    pub fn new(config: AgentLoopConfig, world: Arc<dyn WorldInterface>) -> Self {
        let state = AgentState::new(&config, Instant::now());
        let arbitrator = Arbitrator::new(config.arbiter.clone(), ActionPolicy::allow_all());
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            config,
            world,
            planner: None,
            arbitrator,
            state,
            store: None,
            inbox_tx,
            inbox,
            status_tx,
            outbox: Vec::new(),
            last_report_at: None,
            ticks: 0,
        }
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Restrict the actions the agent may take.
    pub fn with_policy(mut self, policy: ActionPolicy) -> Self {
        self.arbitrator = Arbitrator::new(self.config.arbiter.clone(), policy);
        self
    }

    /// Attach a state store, restoring the saved goal and recent events.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] when the saved state cannot be read.
    pub fn with_store(mut self, store: StateStore) -> Result<Self, StoreError> {
        let goal = store.load_goal()?;
        let events = store.load_events(self.config.event_capacity)?;
        let restored = events.len();
        for event in events {
            self.state.events.append(event);
        }
        if let Some(goal) = &goal {
            self.state.goal = goal.clone();
        }
        info!(goal_restored = goal.is_some(), events = restored, "state restored");
        self.state.events.push(
            EventKind::StateRestored,
            json!({ "goal": goal, "events": restored }),
        );
        self.store = Some(store);
        Ok(self)
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            inbox: self.inbox_tx.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one full tick at `now`.
    pub async fn tick(&mut self, now: Instant) -> TickReport {
        self.ticks += 1;
        self.drain_inbox(now);

        // ── Observe ──────────────────────────────────────────────────────────
        let before = match self.world.observe().await {
            Ok(obs) => self.with_server_context(obs),
            Err(e) => return self.fail(e, now),
        };
        self.flush_outbox().await;

        // ── Arbitrate ────────────────────────────────────────────────────────
        let arbitration =
            match self
                .arbitrator
                .arbitrate(&mut self.state, &before, self.planner.as_ref(), now)
            {
                Ok(arbitration) => arbitration,
                Err(e) => return self.fail(e, now),
            };
        if let Some(command) = &arbitration.join_command {
            self.send_chat(command).await;
        }
        let decision = arbitration.decision;
        let kind = decision.kind();

        // ── Act ──────────────────────────────────────────────────────────────
        let timeout = Duration::from_millis(self.config.action_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.world.execute(&decision.action)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(action = %kind, timeout_ms = self.config.action_timeout_ms, "action timed out");
                ActionResult::timed_out(self.config.action_timeout_ms)
            }
        };
        if result.ok {
            debug!(action = %kind, "action succeeded");
        } else {
            warn!(action = %kind, error = %result.error_text(), "action failed");
        }

        // ── Re-observe ───────────────────────────────────────────────────────
        let after = match self.world.observe().await {
            Ok(obs) => self.with_server_context(obs),
            Err(e) => {
                debug!(error = %e, "post-action observation failed; reusing snapshot");
                before.clone()
            }
        };

        self.bookkeep(&decision, &result, &before, &after, now);
        self.self_report(&after, &decision, now).await;
        self.maybe_persist();

        let ctx = TickContext {
            planner_in_flight: self.state.planner.is_in_flight(),
            moving: after.is_moving,
            loot_recent: self
                .state
                .loot
                .is_recent(Duration::from_millis(self.config.scheduler.loot_recent_ms), now),
            objective: self.state.tracker.kind(),
            errored: false,
        };
        let next_delay = arbitration
            .next_delay
            .unwrap_or_else(|| next_tick_delay(&ctx, &self.config.scheduler));
        self.publish(now);

        TickReport {
            decision: Some(decision),
            result: Some(result),
            error: None,
            next_delay,
        }
    }

    /// Record a failed tick and back off.
    fn fail(&mut self, error: AgentError, now: Instant) -> TickReport {
        warn!(error = %error, validation = error.is_validation(), "tick failed");
        self.state.events.push(
            EventKind::TickError,
            json!({ "error": error.to_string(), "validation": error.is_validation() }),
        );
        let ctx = TickContext {
            planner_in_flight: self.state.planner.is_in_flight(),
            moving: false,
            loot_recent: false,
            objective: self.state.tracker.kind(),
            errored: true,
        };
        let next_delay = next_tick_delay(&ctx, &self.config.scheduler);
        self.publish(now);
        TickReport {
            decision: None,
            result: None,
            error: Some(error),
            next_delay,
        }
    }

    fn bookkeep(
        &mut self,
        decision: &Decision,
        result: &ActionResult,
        before: &Observation,
        after: &Observation,
        now: Instant,
    ) {
        let kind = decision.kind();
        let state = &mut self.state;
        state.tracker.note_result(kind, result, before, after);

        match &decision.action {
            Action::Dig(target) | Action::Break(target) if !result.ok => {
                let key = target.position().block_key();
                debug!(cell = %key, "harvest target blocked");
                state.harvest_blocked.insert_for(key, HARVEST_BLOCK, now);
            }
            Action::Dig(_) | Action::Attack(_) if result.ok => state.loot.touch(now),
            Action::Move(_) => {
                if let Some(id) = state.loot.target_id {
                    if after.entity(id).is_some() {
                        state.loot.touch(now);
                    } else {
                        debug!(id, "loot target collected or gone");
                        state.loot = Default::default();
                    }
                }
            }
            Action::Place(target)
                if !result.ok && result.error_text().contains(BLOCK_UPDATE_ERROR) =>
            {
                let key = target.target_cell().block_key();
                warn!(cell = %key, "placement cell blocked");
                state.placement_blocked.insert_for(key, PLACEMENT_BLOCK, now);
            }
            _ => {}
        }

        if result.ok {
            state.watchdog.clear_failures();
        } else if let Some(ttl) = state.watchdog.record_failure(kind, result.error_text(), now) {
            warn!(action = %kind, block_ms = ttl.as_millis() as u64, "repeated failures; action blocked");
            state.events.push(
                EventKind::ActionBlocked,
                json!({ "action": kind, "blockMs": ttl.as_millis() as u64, "error": result.error_text() }),
            );
        }
        let progressed = state.watchdog.record_progress(kind, before, after, result, now);

        state.record_objective_transitions();
        state.events.push(
            EventKind::ActionResult,
            json!({
                "action": kind,
                "ok": result.ok,
                "error": result.error,
                "progress": progressed,
            }),
        );
        state.last_result = Some(result.clone());
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    /// Tick until `shutdown` resolves.  Ticks never overlap; between ticks
    /// the loop checks on the planner and runs watchdog housekeeping.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let scheduler = self.config.scheduler.clone();
        let mut timers = TimerSet::new();
        let start = clock_now();
        timers.arm(TimerPurpose::Tick, start);
        timers.arm_in(
            TimerPurpose::WatchdogCheck,
            Duration::from_millis(scheduler.watchdog_check_ms),
            start,
        );
        info!(goal = %self.state.goal, tick_ms = scheduler.tick_ms, "agent loop started");

        tokio::pin!(shutdown);
        while let Some((_, deadline)) = timers.next_due() {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
            }

            let now = clock_now();
            for purpose in timers.take_due(now) {
                match purpose {
                    TimerPurpose::Tick => {
                        let report = self.tick(now).await;
                        let after = clock_now();
                        timers.arm_in(TimerPurpose::Tick, report.next_delay, after);
                        if self.state.planner.is_in_flight() {
                            timers.arm_in(
                                TimerPurpose::PlannerRetry,
                                Duration::from_millis(scheduler.planner_retry_ms),
                                after,
                            );
                        } else {
                            timers.cancel(TimerPurpose::PlannerRetry);
                        }
                    }
                    TimerPurpose::PlannerRetry => {
                        for error in self.state.planner.poll(self.arbitrator.policy()) {
                            self.state
                                .events
                                .push(EventKind::PlannerError, json!({ "error": error }));
                        }
                        if self.state.planner.has_proposal() {
                            // a fresh proposal is worth acting on right away
                            timers.arm(TimerPurpose::Tick, now);
                        } else if self.state.planner.is_in_flight() {
                            timers.arm_in(
                                TimerPurpose::PlannerRetry,
                                Duration::from_millis(scheduler.planner_retry_ms),
                                now,
                            );
                        }
                    }
                    TimerPurpose::WatchdogCheck => {
                        self.housekeeping(now);
                        timers.arm_in(
                            TimerPurpose::WatchdogCheck,
                            Duration::from_millis(scheduler.watchdog_check_ms),
                            now,
                        );
                    }
                }
            }
        }

        self.persist();
        info!(ticks = self.ticks, "agent loop stopped");
    }

    fn housekeeping(&mut self, now: Instant) {
        let purged = self.state.harvest_blocked.purge(now) + self.state.placement_blocked.purge(now);
        if purged > 0 {
            debug!(purged, "expired block entries purged");
        }
        if self.state.watchdog.should_force_recovery(now) {
            let status = self.state.watchdog.status(now);
            warn!(
                since_progress_ms = status.since_progress_ms,
                no_progress_ticks = status.no_progress_ticks,
                "no progress; next tick will recover"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Operator input
    // -------------------------------------------------------------------------

    fn drain_inbox(&mut self, now: Instant) {
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                InboxMessage::Directive { source, text } => {
                    self.queue_directive(&source, &text, now);
                }
                InboxMessage::SetGoal { source, goal } => {
                    self.apply_goal(&source, &goal);
                }
                InboxMessage::Chat { sender, text } => self.on_chat(&sender, &text, now),
                InboxMessage::ServerMessage(text) => self.on_server_message(&text, now),
            }
        }
    }

    fn on_chat(&mut self, sender: &str, text: &str, now: Instant) {
        match self.config.trust.classify(sender, text) {
            InboundClass::Command(command) => self.handle_command(sender, &command),
            InboundClass::Directive(text) => {
                if self.queue_directive(sender, &text, now) {
                    self.reply(&format!(
                        "[ack] {sender}, heard you. I will prioritize: \"{text}\""
                    ));
                }
            }
            InboundClass::Ignored => debug!(sender, "chat line ignored"),
        }
    }

    fn on_server_message(&mut self, text: &str, now: Instant) {
        let update = self.state.lobby.on_server_message(text, now);
        if let Some(server) = &update.server_context {
            self.state.events.push(
                EventKind::ServerContext,
                json!({ "server": server, "joined": update.joined }),
            );
        }
        if let Some(join) = update.join {
            self.state.events.push(EventKind::AutoJoin, json!(join));
            self.outbox.push(join.command);
        }
    }

    fn queue_directive(&mut self, source: &str, text: &str, now: Instant) -> bool {
        if !self.state.directives.config().enabled {
            debug!(source, "directives disabled; ignoring");
            return false;
        }
        match self.state.directives.enqueue(source, text, now) {
            Some(directive) => {
                let data = json!({ "source": directive.source, "text": directive.text });
                self.state.events.push(EventKind::DirectiveQueued, data);
                true
            }
            None => false,
        }
    }

    fn apply_goal(&mut self, source: &str, goal: &str) -> bool {
        let goal = goal.trim();
        if goal.is_empty() {
            return false;
        }
        info!(source, goal, "goal updated");
        self.state.goal = goal.to_string();
        self.state
            .events
            .push(EventKind::GoalUpdate, json!({ "source": source, "goal": goal }));
        if let Some(store) = &self.store {
            if let Err(e) = store.save_goal(goal) {
                warn!(error = %e, "failed to persist goal");
            }
        }
        true
    }

    fn handle_command(&mut self, user: &str, command: &str) {
        let (name, args) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(n, a)| (n, a.trim()));
        match name.to_ascii_lowercase().as_str() {
            "help" => self.reply(&format!(
                "{user}: commands -> !goal <text>, !status, !listen"
            )),
            "goal" => {
                if self.apply_goal(user, args) {
                    let goal = self.state.goal.clone();
                    self.reply(&format!("{user}: goal updated -> {goal}"));
                } else {
                    self.reply(&format!("{user}: goal cannot be empty"));
                }
            }
            "status" => {
                let last = self
                    .state
                    .last_decision
                    .as_ref()
                    .map_or("none", |d| d.kind().as_str());
                let line = format!(
                    "{user}: goal=\"{}\" objective={} last action={last}",
                    self.state.goal,
                    self.state.tracker.kind()
                );
                self.reply(&line);
            }
            "listen" => {
                let listening = self.config.trust.directives_enabled
                    && self.state.directives.config().enabled;
                let pending = self
                    .state
                    .directives
                    .pending()
                    .map_or("none".to_string(), |d| format!("\"{}\"", d.text));
                let line = format!(
                    "{user}: listening={} pending={pending}",
                    if listening { "on" } else { "off" }
                );
                self.reply(&line);
            }
            other => debug!(user, command = other, "unknown chat command"),
        }
    }

    fn reply(&mut self, text: &str) {
        self.outbox.extend(split_chat_message(text, CHAT_CHUNK_LEN));
    }

    // -------------------------------------------------------------------------
    // Output helpers
    // -------------------------------------------------------------------------

    async fn flush_outbox(&mut self) {
        for line in std::mem::take(&mut self.outbox) {
            self.send_chat(&line).await;
        }
    }

    // Borrows only the world handle so the returned future stays `Send`
    // (`AgentLoop` itself is not `Sync` once it owns a `StateStore`).
    fn send_chat(&self, line: &str) -> impl std::future::Future<Output = ()> + Send + 'static {
        let world = Arc::clone(&self.world);
        let action = Action::chat(line);
        async move {
            let result = world.execute(&action).await;
            if !result.ok {
                warn!(error = %result.error_text(), "chat send failed");
            }
        }
    }

    async fn self_report(&mut self, obs: &Observation, next: &Decision, now: Instant) {
        if self.config.self_report_ms == 0 || obs.is_lobby() {
            return;
        }
        let interval = Duration::from_millis(self.config.self_report_ms);
        let due = match self.last_report_at {
            None => {
                self.last_report_at = Some(now);
                false
            }
            Some(at) => now.saturating_duration_since(at) >= interval,
        };
        if !due {
            return;
        }
        self.last_report_at = Some(now);
        let p = obs.position;
        let line = format!(
            "Status hp={:.0} hunger={} pos=x={:.1} y={:.1} z={:.1}. Goal: {}. Next: {}.",
            obs.health,
            obs.food,
            p.x,
            p.y,
            p.z,
            self.state.goal,
            next.kind()
        );
        self.state
            .events
            .push(EventKind::SelfReport, json!({ "text": line }));
        for part in split_chat_message(&line, CHAT_CHUNK_LEN) {
            self.send_chat(&part).await;
        }
    }

    /// Fill in the server name from lobby tracking when the world omits it.
    fn with_server_context(&self, mut obs: Observation) -> Observation {
        if obs.server_name.is_none() {
            obs.server_name = self.state.lobby.server_name().map(str::to_string);
        }
        obs
    }

    fn maybe_persist(&mut self) {
        let every = self.config.persist_every_ticks.max(1);
        if self.ticks % every == 0 {
            self.persist();
        }
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let events = self.state.events.recent_owned(self.config.event_capacity);
        if let Err(e) = store.save_events(&events) {
            warn!(error = %e, "failed to persist event log");
        }
    }

    fn publish(&self, now: Instant) {
        let state = &self.state;
        let snapshot = StatusSnapshot {
            ticks: self.ticks,
            goal: state.goal.clone(),
            objective: state.tracker.kind(),
            server_name: state.lobby.server_name().map(str::to_string),
            last_decision: state.last_decision.clone(),
            last_result: state.last_result.clone(),
            pending_directive: state.directives.pending().map(|d| d.text.clone()),
            planner_in_flight: state.planner.is_in_flight(),
            planner_error: state.planner.last_error().map(str::to_string),
            watchdog: Some(state.watchdog.status(now)),
            allowed_actions: self
                .arbitrator
                .policy()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            recent_events: state.events.recent_owned(self.config.arbiter.recent_events),
        };
        self.status_tx.send_replace(snapshot);
    }
}

/// Current time on the tokio clock, so paused-time tests stay consistent.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use blockmind_types::{ActionKind, DecisionSource, Position};
    use blockmind_world::SimWorld;

    fn config() -> AgentLoopConfig {
        AgentLoopConfig {
            seed: Some(7),
            self_report_ms: 0,
            ..AgentLoopConfig::default()
        }
    }

    fn origin() -> Position {
        Position::new(0.0, 64.0, 0.0)
    }

    fn agent(world: &Arc<SimWorld>) -> AgentLoop {
        AgentLoop::new(config(), world.clone())
    }

    #[test]
    fn split_prefers_word_boundaries() {
        let text = format!("{} {}", "a".repeat(150), "b".repeat(150));
        let parts = split_chat_message(&text, 220);
        assert_eq!(parts, vec!["a".repeat(150), "b".repeat(150)]);
    }

    #[test]
    fn split_cuts_hard_when_space_is_early() {
        let text = format!("ab {}", "c".repeat(300));
        let parts = split_chat_message(&text, 220);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].chars().count(), 220);
        assert!(parts.iter().all(|p| p.chars().count() <= 220));
        assert_eq!(parts.concat().len(), text.len() - 1);
    }

    #[test]
    fn split_short_and_blank() {
        assert_eq!(split_chat_message("  hello  ", 220), vec!["hello".to_string()]);
        assert!(split_chat_message("   ", 220).is_empty());
    }

    #[test]
    fn blank_goal_is_rejected_by_handle() {
        let world = Arc::new(SimWorld::builder().build());
        let agent = agent(&world);
        assert_eq!(agent.handle().set_goal("  "), Err(ControlError::EmptyGoal));
    }

    #[tokio::test]
    async fn tick_digs_nearby_log() {
        let log = Position::new(2.0, 64.0, 0.0);
        let world = Arc::new(SimWorld::builder().at(origin()).block("oak_log", log).build());
        let mut agent = agent(&world);

        let report = agent.tick(Instant::now()).await;
        assert!(report.error.is_none());
        assert_eq!(report.decision.map(|d| d.action), Some(Action::dig_at(log)));
        assert!(report.result.is_some_and(|r| r.ok));
        assert!(agent.state().events.last_of(EventKind::ActionResult).is_some());
        // wood gained completes the objective
        assert_eq!(agent.state().tracker.kind(), ObjectiveKind::None);
    }

    #[tokio::test]
    async fn observation_failure_backs_off() {
        let world = Arc::new(SimWorld::builder().build());
        world.fail_observations(1);
        let mut agent = agent(&world);

        let report = agent.tick(Instant::now()).await;
        assert!(matches!(report.error, Some(AgentError::World(_))));
        assert_eq!(report.next_delay, Duration::from_millis(4_000));
        assert!(agent.state().events.last_of(EventKind::TickError).is_some());
        assert!(world.executed().is_empty());
    }

    #[tokio::test]
    async fn disallowed_decision_fails_tick() {
        let world = Arc::new(SimWorld::builder().item("oak_log", 8).build());
        let mut agent = agent(&world).with_policy(ActionPolicy::from_kinds([ActionKind::Dig]));

        let report = agent.tick(Instant::now()).await;
        assert_eq!(report.error, Some(AgentError::ActionNotAllowed(ActionKind::Observe)));
        assert!(world.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_action_times_out() {
        let log = Position::new(2.0, 64.0, 0.0);
        let world = Arc::new(SimWorld::builder().at(origin()).block("oak_log", log).build());
        world.set_delay(ActionKind::Dig, Duration::from_secs(30));
        let mut agent = agent(&world);

        let report = agent.tick(clock_now()).await;
        let result = report.result.unwrap();
        assert!(!result.ok);
        assert_eq!(result.error_text(), "timeout after 20000ms");
    }

    #[tokio::test]
    async fn failed_dig_blocks_target() {
        let log = Position::new(2.0, 64.0, 0.0);
        let world = Arc::new(SimWorld::builder().at(origin()).block("oak_log", log).build());
        world.fail_next(ActionKind::Dig, "no path to block");
        let mut agent = agent(&world);

        let report = agent.tick(Instant::now()).await;
        assert!(report.result.is_some_and(|r| !r.ok));
        assert!(agent.state().harvest_blocked.expires_at(&log.block_key()).is_some());
        assert_eq!(agent.state().watchdog.failure_count(ActionKind::Dig, "no path to block"), 1);
    }

    #[tokio::test]
    async fn chat_goal_command_updates_goal_and_replies() {
        let world = Arc::new(SimWorld::builder().item("oak_log", 8).build());
        let mut agent = agent(&world);
        let control = agent.handle();
        control.chat_message("alice", "!goal build a hut").unwrap();
        control.chat_message("alice", "!status").unwrap();

        agent.tick(Instant::now()).await;
        assert_eq!(agent.state().goal, "build a hut");
        let chat = world.chat_log();
        assert!(chat.contains(&"alice: goal updated -> build a hut".to_string()));
        assert!(chat.iter().any(|l| l.starts_with("alice: goal=\"build a hut\" objective=none")));
        assert!(agent.state().directives.pending().is_none());
        assert_eq!(control.status().goal, "build a hut");
    }

    #[tokio::test]
    async fn chat_directive_is_acknowledged_and_applied() {
        let world = Arc::new(SimWorld::builder().item("oak_log", 8).build());
        let mut agent = agent(&world);
        agent.handle().chat_message("bob", "come to spawn").unwrap();

        agent.tick(Instant::now()).await;
        assert!(world
            .chat_log()
            .contains(&"[ack] bob, heard you. I will prioritize: \"come to spawn\"".to_string()));
        let events = &agent.state().events;
        assert!(events.last_of(EventKind::DirectiveQueued).is_some());
        assert!(events.last_of(EventKind::DirectiveApplied).is_some());
        assert!(agent.state().directives.pending().is_none());
    }

    #[tokio::test]
    async fn untrusted_sender_is_ignored() {
        let world = Arc::new(SimWorld::builder().item("oak_log", 8).build());
        let mut config = config();
        config.trust.admins = vec!["alice".to_string()];
        let mut agent = AgentLoop::new(config, world.clone());
        agent.handle().chat_message("mallory", "dig everything").unwrap();

        agent.tick(Instant::now()).await;
        assert!(agent.state().events.last_of(EventKind::DirectiveQueued).is_none());
        assert!(world.chat_log().is_empty());
    }

    #[tokio::test]
    async fn lobby_auto_join_sends_command() {
        let world = Arc::new(SimWorld::builder().server("lobby").build());
        let mut agent = agent(&world);
        agent
            .handle()
            .server_message("Available servers: creative, survival-1")
            .unwrap();

        let report = agent.tick(Instant::now()).await;
        assert!(world.chat_log().contains(&"/server survival-1".to_string()));
        assert_eq!(report.next_delay, Duration::from_millis(1_500));
        assert_eq!(
            report.decision.map(|d| d.source),
            Some(DecisionSource::Lobby)
        );
    }

    #[tokio::test]
    async fn self_report_is_sent_on_interval() {
        let world = Arc::new(SimWorld::builder().item("oak_log", 8).build());
        let config = AgentLoopConfig {
            self_report_ms: 1_000,
            ..config()
        };
        let mut agent = AgentLoop::new(config, world.clone());
        let now = Instant::now();

        agent.tick(now).await;
        assert!(world.chat_log().is_empty());
        agent.tick(now + Duration::from_secs(2)).await;
        assert!(world.chat_log().iter().any(|l| l.starts_with("Status hp=20 hunger=20")));
    }

    #[tokio::test]
    async fn store_restores_goal_and_events() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_goal("stockpile logs").unwrap();
        let world = Arc::new(SimWorld::builder().build());

        let agent = agent(&world).with_store(store).unwrap();
        assert_eq!(agent.state().goal, "stockpile logs");
        assert!(agent.state().events.last_of(EventKind::StateRestored).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown() {
        let world = Arc::new(SimWorld::demo());
        let mut agent = agent(&world);
        let mut control = agent.handle();

        agent.run(tokio::time::sleep(Duration::from_secs(10))).await;
        assert!(agent.ticks() > 1);
        assert!(!world.executed().is_empty());
        let status = control.changed().await.unwrap();
        assert_eq!(status.ticks, agent.ticks());
        assert!(status.watchdog.is_some());
        drop(agent);
        assert_eq!(control.changed().await.unwrap_err(), ControlError::Closed);
    }
}
