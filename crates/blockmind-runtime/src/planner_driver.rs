//! [`LlmPlanner`] – OpenAI-compatible planner client.
//!
//! Talks to any service exposing `{base_url}/chat/completions` (OpenRouter,
//! Ollama's `/v1`, vLLM, …).  The system prompt carries the goal, the
//! allowed actions, the reply shape and the planning rules, with
//! [`PLANNER_GUIDELINES`] always appended.  The user message is the JSON
//! [`PlannerRequest`] context.
//!
//! Replies are parsed leniently: the first `{` to the last `}` of the
//! assistant text is taken as the JSON object
//! `{"action": "...", "payload": {...}, "reason": "..."}`.
//!
//! # Example
//!
//! ```rust,no_run
//! use blockmind_runtime::planner_driver::{LlmPlanner, LlmPlannerConfig};
//! use blockmind_runtime::planner_queue::{Planner, PlannerRequest};
//! use blockmind_types::Observation;
//!
//! # async fn run() {
//! let planner = LlmPlanner::new(LlmPlannerConfig {
//!     base_url: "http://localhost:11434/v1".into(),
//!     model: "llama3".into(),
//!     ..LlmPlannerConfig::default()
//! })
//! .unwrap();
//!
//! // Requires a running model server.
//! let decision = planner
//!     .propose(PlannerRequest::new("survive", Observation::default()))
//!     .await;
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use blockmind_types::{Action, AgentError, Decision, DecisionSource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::planner_queue::{Planner, PlannerRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Guidelines
// ─────────────────────────────────────────────────────────────────────────────

/// Anti-loop rules appended to every system message sent to the planner.
pub const PLANNER_GUIDELINES: &str = "\
## Stability Guidelines (anti-loop rules)
- Do not propose the same action with the same payload more than 3 times in a row.
- If an action failed in recentEvents, try a different approach rather than retrying immediately.
- Vary your strategy when the previous actions have not produced progress.
- When nothing useful can be done, answer with action \"observe\".";

const PAYLOAD_REMINDERS: [&str; 5] = [
    "- Payload schema reminders:",
    "  - equip -> {\"itemName\":\"item_name\",\"destination\":\"hand|off-hand|head|torso|legs|feet\"}",
    "  - craft -> {\"itemName\":\"item_name\",\"count\":1,\"table\":{\"x\":0,\"y\":0,\"z\":0} (optional)}",
    "  - move -> {\"x\":number,\"y\":number,\"z\":number,\"range\":1}",
    "  - dig/break -> {\"x\":number,\"y\":number,\"z\":number}",
];

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    #[error("failed to parse model JSON: {0}")]
    Unparseable(String),
    #[error("model returned empty action")]
    EmptyAction,
    #[error(transparent)]
    InvalidAction(#[from] AgentError),
}

impl From<PlannerError> for AgentError {
    fn from(e: PlannerError) -> Self {
        match e {
            PlannerError::InvalidAction(inner) => inner,
            other => AgentError::PlannerFailed(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// The object a planner must reply with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlannerReply {
    /// An allowed action name, or `none`.
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub reason: String,
}

impl PlannerReply {
    /// Validate into a [`Decision`].  `none` becomes `observe`.
    ///
    /// # Errors
    ///
    /// [`PlannerError::EmptyAction`] for a blank action name, otherwise the
    /// validation error from [`Action::from_parts`].
    pub fn into_decision(self, source: DecisionSource) -> Result<Decision, PlannerError> {
        let name = self.action.trim();
        if name.is_empty() {
            return Err(PlannerError::EmptyAction);
        }
        let action = if name == "none" {
            Action::Observe
        } else {
            Action::from_parts(name, self.payload)?
        };
        let reason = match self.reason.trim() {
            "" => "planner proposal".to_string(),
            r => r.to_string(),
        };
        Ok(Decision::new(action, reason, source))
    }
}

/// The substring from the first `{` to the last `}`, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmPlanner
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmPlannerConfig {
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_ms: u64,
    /// Sent as `X-Title` when set.
    pub app_name: Option<String>,
}

impl Default for LlmPlannerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4.1-mini".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 300,
            request_timeout_ms: 30_000,
            app_name: Some("blockmind".to_string()),
        }
    }
}

impl std::fmt::Debug for LlmPlannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmPlannerConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// A [`Planner`] backed by a chat-completions endpoint.
pub struct LlmPlanner {
    config: LlmPlannerConfig,
    client: reqwest::Client,
}

impl LlmPlanner {
    /// # Errors
    ///
    /// [`PlannerError::Http`] when the HTTP client cannot be built.
    pub fn new(config: LlmPlannerConfig) -> Result<Self, PlannerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &LlmPlannerConfig {
        &self.config
    }

    /// Build the system and user messages for `request`.
    pub fn build_messages(request: &PlannerRequest) -> Vec<ChatMessage> {
        let mut lines = vec![
            "You are the planner of an autonomous agent in a block-building survival world."
                .to_string(),
            format!("Goal: {}", request.goal),
            format!("Allowed actions: {}", request.allowed_actions.join(", ")),
            "Return only valid JSON with this shape:".to_string(),
            r#"{"action":"<allowed-action-or-none>","payload":{},"reason":"short reason"}"#
                .to_string(),
            "Rules:".to_string(),
            "- Prioritize survival first: avoid nearby hostiles, protect health, and maintain hunger."
                .to_string(),
            "- Then progress the survival loop: gather wood, craft tools, secure shelter.".to_string(),
        ];
        if let Some(directive) = &request.operator_directive {
            lines.push(format!(
                "- Highest priority right now: follow operator directive \"{}\" from {}.",
                directive.text, directive.source
            ));
        }
        lines.extend(
            [
                "- Prefer safe, reversible actions.",
                "- If uncertain, use action \"observe\" or a short safe move.",
                "- Keep payload minimal and valid for the selected action.",
            ]
            .map(str::to_string),
        );
        lines.extend(PAYLOAD_REMINDERS.map(str::to_string));
        let system = format!("{}\n\n{}", lines.join("\n"), PLANNER_GUIDELINES);

        let user = json!({
            "observation": request.observation,
            "priorityState": request.priority_state,
            "operatorDirective": request.operator_directive,
            "recentEvents": request.recent_events,
        });
        let user = serde_json::to_string_pretty(&user).unwrap_or_else(|_| user.to_string());

        vec![
            ChatMessage {
                role: Role::System,
                content: system,
            },
            ChatMessage {
                role: Role::User,
                content: user,
            },
        ]
    }

    /// Parse the assistant text into a [`Decision`].
    pub fn parse_reply(content: &str, source: DecisionSource) -> Result<Decision, PlannerError> {
        let snippet: String = content.chars().take(300).collect();
        let object = extract_json_object(content).ok_or_else(|| PlannerError::Unparseable(snippet.clone()))?;
        let reply: PlannerReply =
            serde_json::from_str(object).map_err(|_| PlannerError::Unparseable(snippet))?;
        reply.into_decision(source)
    }

    /// Ask the model for the next decision.
    ///
    /// # Errors
    ///
    /// [`PlannerError::Http`] for transport or status failures,
    /// [`PlannerError::BadResponse`] for an empty reply, and the parse and
    /// validation errors of [`LlmPlanner::parse_reply`].
    pub async fn plan(&self, request: &PlannerRequest) -> Result<Decision, PlannerError> {
        let messages = Self::build_messages(request);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            messages: &messages,
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        if let Some(app) = &self.config.app_name {
            builder = builder.header("X-Title", app);
        }

        let response: ChatResponse = builder.send().await?.error_for_status()?.json().await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PlannerError::BadResponse("empty choices array".into()))?;
        debug!(chars = content.len(), "planner reply received");

        let source = if request.operator_directive.is_some() {
            DecisionSource::Directive
        } else {
            DecisionSource::Planner
        };
        Self::parse_reply(&content, source)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn propose(&self, request: PlannerRequest) -> Result<Decision, AgentError> {
        Ok(self.plan(&request).await?)
    }
}
