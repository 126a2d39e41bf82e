//! Configuration Vault – reads/writes `~/.blockmind/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use blockmind_kernel::ActionPolicy;
use blockmind_runtime::agent_loop::{AgentLoopConfig, DEFAULT_GOAL};
use blockmind_runtime::planner_driver::LlmPlannerConfig;
use zeroize::Zeroizing;

/// Every primitive action, in the order operators usually list them.
pub const DEFAULT_ALLOWED_ACTIONS: &str =
    "chat,move,stop,look,dig,break,place,equip,interact,attack,useItem,craft,inventory,observe";

/// Persisted user configuration stored in `~/.blockmind/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible planner endpoint.
    #[serde(default = "default_planner_url")]
    pub planner_url: String,

    /// Planner model name (e.g. "openai/gpt-4.1-mini").
    #[serde(default = "default_model")]
    pub model: String,

    /// Planner API key.  Without one the agent runs on objectives and the
    /// local fallback only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Base tick interval in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Long-term goal handed to the planner.
    #[serde(default = "default_goal")]
    pub goal: String,

    /// Comma-separated allow-list of action names.
    #[serde(default = "default_allowed_actions")]
    pub allowed_actions: String,

    /// Status line interval; `0` disables it.
    #[serde(default = "default_self_report_ms")]
    pub self_report_ms: u64,

    /// Chat users allowed to steer the agent.  Empty trusts everyone.
    #[serde(default)]
    pub admins: Vec<String>,

    /// Disable the destructive-action veto.
    #[serde(default)]
    pub allow_destructive: bool,

    /// SQLite file for goal and event persistence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<String>,

    /// Fixed seed for reproducible scouting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("planner_url", &self.planner_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("tick_ms", &self.tick_ms)
            .field("goal", &self.goal)
            .field("allowed_actions", &self.allowed_actions)
            .field("self_report_ms", &self.self_report_ms)
            .field("admins", &self.admins)
            .field("allow_destructive", &self.allow_destructive)
            .field("state_path", &self.state_path)
            .field("seed", &self.seed)
            .finish()
    }
}

fn default_planner_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "openai/gpt-4.1-mini".to_string()
}
fn default_tick_ms() -> u64 {
    4_000
}
fn default_goal() -> String {
    DEFAULT_GOAL.to_string()
}
fn default_allowed_actions() -> String {
    DEFAULT_ALLOWED_ACTIONS.to_string()
}
fn default_self_report_ms() -> u64 {
    45_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            planner_url: default_planner_url(),
            model: default_model(),
            api_key: String::new(),
            tick_ms: default_tick_ms(),
            goal: default_goal(),
            allowed_actions: default_allowed_actions(),
            self_report_ms: default_self_report_ms(),
            admins: Vec::new(),
            allow_destructive: false,
            state_path: None,
            seed: None,
        }
    }
}

impl Config {
    /// The runtime configuration this file describes.
    pub fn loop_config(&self) -> AgentLoopConfig {
        let mut config = AgentLoopConfig {
            goal: self.goal.clone(),
            self_report_ms: self.self_report_ms,
            seed: self.seed,
            ..AgentLoopConfig::default()
        };
        config.scheduler.tick_ms = self.tick_ms;
        config.arbiter.allow_destructive = self.allow_destructive;
        config.trust.admins = self.admins.clone();
        config
    }

    /// Parse the allow-list.
    pub fn policy(&self) -> Result<ActionPolicy, String> {
        ActionPolicy::parse_list(&self.allowed_actions)
            .map_err(|e| format!("Invalid allowed_actions: {}", e))
    }

    /// Planner client settings, or `None` when no API key is configured.
    pub fn planner_config(&self) -> Option<LlmPlannerConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }
        Some(LlmPlannerConfig {
            base_url: self.planner_url.clone(),
            model: self.model.clone(),
            api_key: Some(self.api_key.trim().to_string()),
            ..LlmPlannerConfig::default()
        })
    }
}

/// Return the path to `~/.blockmind/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".blockmind").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `BLOCKMIND_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `BLOCKMIND_PLANNER_URL` | `planner_url` |
/// | `BLOCKMIND_MODEL` | `model` |
/// | `BLOCKMIND_API_KEY` | `api_key` |
/// | `BLOCKMIND_TICK_MS` | `tick_ms` |
/// | `BLOCKMIND_GOAL` | `goal` |
/// | `BLOCKMIND_ALLOWED_ACTIONS` | `allowed_actions` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("BLOCKMIND_PLANNER_URL") {
        cfg.planner_url = v;
    }
    if let Ok(v) = std::env::var("BLOCKMIND_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("BLOCKMIND_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("BLOCKMIND_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.tick_ms = ms;
    }
    if let Ok(v) = std::env::var("BLOCKMIND_GOAL")
        && !v.trim().is_empty()
    {
        cfg.goal = v;
    }
    if let Ok(v) = std::env::var("BLOCKMIND_ALLOWED_ACTIONS") {
        cfg.allowed_actions = v;
    }
}

/// Save the config to disk, creating `~/.blockmind/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = Zeroizing::new(
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?,
    );
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw.as_bytes())
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
