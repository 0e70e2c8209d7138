//! LLM provider adapters.
//!
//! The decision agent only sees [`LlmProvider`]. [`provider_from_config`] is
//! the one place that looks at which vendor is configured.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::prompt;
use super::{DecisionContext, DecisionError, LlmDecision};
use crate::config::{LlmConfig, ProviderKind};
use crate::events::EventType;

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider}: no API key (set {env})")]
    MissingCredentials { provider: String, env: String },

    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }
}

pub trait LlmProvider {
    fn name(&self) -> &str;

    /// Whether the provider has what it needs (credentials) to be called.
    fn is_available(&self) -> bool;

    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;

    fn parse_decision(&self, raw: &str) -> Result<LlmDecision, DecisionError> {
        prompt::parse_decision(raw)
    }
}

/// Build the provider named in config. API keys are read from the
/// environment here, once.
pub fn provider_from_config(config: &LlmConfig) -> Box<dyn LlmProvider> {
    match config.provider {
        ProviderKind::Anthropic => Box::new(AnthropicProvider::from_config(config)),
        ProviderKind::Openai => Box::new(OpenAiProvider::from_config(config)),
        ProviderKind::Heuristic => Box::new(HeuristicProvider),
    }
}

fn http_agent(timeout_secs: u64) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(timeout_secs)))
        .http_status_as_error(false)
        .build()
        .into()
}

fn api_key(config: &LlmConfig, default_env: &str) -> (String, Option<String>) {
    let env = config
        .api_key_env
        .clone()
        .unwrap_or_else(|| default_env.to_string());
    let key = std::env::var(&env).ok().filter(|k| !k.trim().is_empty());
    (env, key)
}

fn post_json<T: serde::de::DeserializeOwned>(
    provider: &str,
    request: ureq::RequestBuilder<ureq::typestate::WithBody>,
    body: &serde_json::Value,
) -> Result<T, ProviderError> {
    let request_error = |e: ureq::Error| ProviderError::Request {
        provider: provider.to_string(),
        message: e.to_string(),
    };
    let mut response = request.send_json(body).map_err(request_error)?;
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let body = response.body_mut().read_to_string().unwrap_or_default();
        return Err(ProviderError::Status {
            provider: provider.to_string(),
            status,
            body: body.chars().take(500).collect(),
        });
    }
    response.body_mut().read_json().map_err(request_error)
}

/// Anthropic Messages API.
pub struct AnthropicProvider {
    model: String,
    url: String,
    max_tokens: u32,
    key_env: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicProvider {
    pub fn from_config(config: &LlmConfig) -> Self {
        let (key_env, api_key) = api_key(config, "ANTHROPIC_API_KEY");
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_URL.to_string()),
            max_tokens: config.max_tokens,
            key_env,
            api_key,
            agent: http_agent(config.timeout_secs),
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: self.name().to_string(),
                env: self.key_env.clone(),
            })?;

        // System prompts are a top-level field, not a message role.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system.join("\n\n"),
            "messages": turns,
        });

        tracing::debug!(model = %self.model, "anthropic completion");
        let request = self
            .agent
            .post(&self.url)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response: AnthropicResponse = post_json(self.name(), request, &body)?;

        let text: String = response
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            });
        }
        Ok(text)
    }
}

/// OpenAI Chat Completions API (and compatible endpoints via `base_url`).
pub struct OpenAiProvider {
    model: String,
    url: String,
    max_tokens: u32,
    key_env: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn from_config(config: &LlmConfig) -> Self {
        let (key_env, api_key) = api_key(config, "OPENAI_API_KEY");
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            max_tokens: config.max_tokens,
            key_env,
            api_key,
            agent: http_agent(config.timeout_secs),
        }
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials {
                provider: self.name().to_string(),
                env: self.key_env.clone(),
            })?;
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });

        tracing::debug!(model = %self.model, "openai completion");
        let request = self
            .agent
            .post(&self.url)
            .header("Authorization", &format!("Bearer {key}"));
        let response: OpenAiResponse = post_json(self.name(), request, &body)?;

        response
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            })
    }
}

/// Offline provider: reads the context embedded in the prompt and answers
/// with fixed rules. Always available.
pub struct HeuristicProvider;

impl HeuristicProvider {
    pub fn decide(ctx: &DecisionContext) -> LlmDecision {
        let project = &ctx.project;
        let mut decision = if project.is_protected && project.uncommitted_changes > 0 {
            LlmDecision::new(
                "branch",
                0.85,
                "Uncommitted work on a protected branch belongs on a feature branch.",
            )
        } else if ctx.trigger.event_type == EventType::TestsPassing && project.uncommitted_changes > 0 {
            LlmDecision::new("checkpoint", 0.8, "Tests pass; good moment to checkpoint the work.")
        } else if project.uncommitted_changes >= 10 {
            LlmDecision::new("commit", 0.85, "A large change set is building up uncommitted.")
        } else if project.uncommitted_changes >= 5 {
            LlmDecision::new("commit", 0.65, "Several files changed since the last commit.")
        } else if matches!(
            ctx.trigger.event_type,
            EventType::FeatureComplete | EventType::WorkingDirectoryClean
        ) && !project.is_main
            && !project.is_protected
            && project.uncommitted_changes == 0
        {
            let mut pr = LlmDecision::new("pr", 0.7, "Feature branch is clean and the work looks done.");
            pr.requires_approval = true;
            pr
        } else {
            LlmDecision::new("none", 0.5, "Nothing worth doing yet.")
        };

        if ctx.time_of_day.is_some_and(|t| !t.is_working_hours) {
            decision.requires_approval = true;
            decision.risk_assessment = Some("outside working hours".to_string());
        }
        decision
    }
}

impl LlmProvider for HeuristicProvider {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let ctx = messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::User)
            .find_map(|m| prompt::extract_context(&m.content))
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: self.name().to_string(),
            })?;
        serde_json::to_string(&Self::decide(&ctx)).map_err(|e| ProviderError::Request {
            provider: self.name().to_string(),
            message: e.to_string(),
        })
    }
}
