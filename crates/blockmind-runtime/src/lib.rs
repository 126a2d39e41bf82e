//! `blockmind-runtime` – The Agent Brain (Tick Loop Engine)
//!
//! The execution engine where the deciding happens: one observation in, one
//! arbitrated action out, every tick.
//!
//! # Modules
//!
//! - [`agent_loop`] – [`AgentLoop`][agent_loop::AgentLoop]:
//!   the tick orchestrator.  Observes, arbitrates, executes under a timeout,
//!   keeps the books and publishes a status snapshot.  Operators steer it
//!   through a cloneable [`ControlHandle`][agent_loop::ControlHandle].
//! - [`arbitrator`] – [`Arbitrator`][arbitrator::Arbitrator]:
//!   the decision cascade (lobby, directive, objective/planner/fallback,
//!   safety overrides, anti-stall, watchdog recovery, allow-list).
//! - [`objective`] – [`ObjectiveTracker`][objective::ObjectiveTracker]:
//!   short-horizon objectives (gather wood, hunt, eat, set up crafting) and
//!   the forced steps that pursue them.
//! - [`planner_queue`] – [`PlannerQueue`][planner_queue::PlannerQueue]:
//!   at most one background planner request, spaced and freshness-checked,
//!   plus the local fallback used while the planner thinks.
//! - [`planner_driver`] – [`LlmPlanner`][planner_driver::LlmPlanner]:
//!   an OpenAI-compatible chat-completions client implementing
//!   [`Planner`][planner_queue::Planner].
//! - [`directive`] – operator directives with a TTL, and the chat
//!   [`TrustPolicy`][directive::TrustPolicy].
//! - [`lobby`] – server-list parsing and lobby auto-join.
//! - [`scheduler`] – cancellable timers and the adaptive tick interval.
//! - [`scouting`] – random exploration targets.
//! - [`loop_guard`] – [`LoopGuard`][loop_guard::LoopGuard]:
//!   detects the agent repeating one decision.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.
//!
//! # Gating
//!
//! Every decision passes through the kernel's
//! [`DecisionGate`][blockmind_kernel::DecisionGate] before it reaches the
//! world.  The gate is re-exported here so orchestration code does not need
//! a direct dependency on `blockmind-kernel`.

pub mod agent_loop;
pub mod arbitrator;
pub mod directive;
pub mod lobby;
pub mod loop_guard;
pub mod objective;
pub mod planner_driver;
pub mod planner_queue;
pub mod scheduler;
pub mod scouting;
pub mod telemetry;

pub use agent_loop::{
    AgentLoop, AgentLoopConfig, ControlError, ControlHandle, StatusSnapshot, TickReport,
    split_chat_message,
};
pub use arbitrator::{AgentState, ArbiterConfig, Arbitration, Arbitrator};
pub use directive::{Directive, DirectiveConfig, DirectiveQueue, TrustPolicy};
pub use lobby::{LobbyConfig, LobbyTracker};
pub use loop_guard::LoopGuard;
pub use objective::{ObjectiveConfig, ObjectiveKind, ObjectiveTracker};
pub use planner_driver::{LlmPlanner, LlmPlannerConfig, PlannerError};
pub use planner_queue::{Planner, PlannerProposal, PlannerQueue, PlannerQueueConfig, PlannerRequest};
pub use scheduler::{SchedulerConfig, TimerPurpose, TimerSet};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

pub use blockmind_kernel::DecisionGate;
