//! `blockmind-cli` – BlockMind Command Line Interface
//!
//! This binary is the ignition switch for the BlockMind stack.  It:
//!
//! 1. Checks for `~/.blockmind/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Builds the agent loop against the simulated world, wiring in the LLM
//!    planner when an API key is configured and the SQLite state store when
//!    a state path is set.
//! 3. Drops the operator into an **interactive console** for directives,
//!    goals and status.
//! 4. Intercepts **Ctrl-C** to stop the loop and persist state before exit.

mod config;
mod console;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{info, warn};
use zeroize::Zeroizing;

use blockmind_memory::StateStore;
use blockmind_runtime::{AgentLoop, LlmPlanner, init_tracing};
use blockmind_world::SimWorld;

fn main() {
    // Structured logging: RUST_LOG filters, BLOCKMIND_LOG_FORMAT=json for
    // aggregators, OTEL_EXPORTER_OTLP_ENDPOINT for span export.
    let _tracing = init_tracing("blockmind");

    print_banner();

    // ── Config / First-Run Wizard ─────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let agent = match build_agent(&cfg) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("{}: {}", "Startup failed".red().bold(), e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Shared shutdown signal ────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(Notify::new());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown_ctrlc = shutdown.clone();
    let stop_ctrlc = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the agent …".yellow().bold());
        shutdown_ctrlc.store(true, Ordering::SeqCst);
        stop_ctrlc.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop the agent");
    }

    // ── Agent loop ────────────────────────────────────────────────────────
    let handle = agent.handle();
    let stop_loop = stop.clone();
    let task = runtime.spawn(async move {
        let mut agent = agent;
        agent.run(async move { stop_loop.notified().await }).await;
        info!(ticks = agent.ticks(), "agent loop stopped");
    });

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive console ───────────────────────────────────────────────
    console::run(&handle, &cfg, shutdown);

    stop.notify_one();
    if let Err(e) = runtime.block_on(task) {
        warn!(error = %e, "agent task ended abnormally");
    }
    println!("{}", "  ✓ Exiting BlockMind.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent wiring
// ─────────────────────────────────────────────────────────────────────────────

fn build_agent(cfg: &config::Config) -> Result<AgentLoop, String> {
    let policy = cfg.policy()?;
    let world = Arc::new(SimWorld::demo());
    let mut agent = AgentLoop::new(cfg.loop_config(), world).with_policy(policy);

    match cfg.planner_config() {
        Some(planner_cfg) => {
            let planner = LlmPlanner::new(planner_cfg)
                .map_err(|e| format!("Failed to build planner client: {}", e))?;
            println!("  Planner: {} via {}", cfg.model.bold(), cfg.planner_url.dimmed());
            agent = agent.with_planner(Arc::new(planner));
        }
        None => println!(
            "  {}  Set {} to enable the planner.",
            "No planner API key; running on objectives and fallback only.".dimmed(),
            "BLOCKMIND_API_KEY".bold()
        ),
    }

    if let Some(path) = &cfg.state_path {
        let store = StateStore::open(path)
            .map_err(|e| format!("Failed to open state store at {}: {}", path, e))?;
        agent = agent
            .with_store(store)
            .map_err(|e| format!("Failed to restore state from {}: {}", path, e))?;
        println!("  State store: {}", path.bold());
    }

    Ok(agent)
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      BlockMind First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up BlockMind.\n");

    let mut cfg = config::Config::default();

    cfg.planner_url = prompt_line(
        &format!("  Planner endpoint [{}]: ", cfg.planner_url),
        &cfg.planner_url,
    );
    cfg.model = prompt_line(&format!("  Planner model [{}]: ", cfg.model), &cfg.model);

    let key = Zeroizing::new(prompt_line("  API key (leave empty to run without a planner): ", ""));
    cfg.api_key = key.trim().to_string();

    let tick = prompt_line(
        &format!("  Tick interval in ms [{}]: ", cfg.tick_ms),
        &cfg.tick_ms.to_string(),
    );
    if let Ok(ms) = tick.trim().parse::<u64>() {
        cfg.tick_ms = ms;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___  __           __   __  ____         __"#.bold().green());
    println!("{}", r#"  / _ )/ /__  ____  / /__/  |/  (_)__  ___/ /"#.bold().green());
    println!("{}", r#" / _  / / _ \/ __/ /  '_/ /|_/ / / _ \/ _  / "#.bold().green());
    println!("{}", r#"/____/_/\___/\__/ /_/\_\/_/  /_/_/_//_/\_,_/  "#.bold().green());
    println!();
    println!(
        "  {} {}",
        "BlockMind".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Autonomous Block-World Survival Agent");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
