//! Decision pipeline: context in, one proposed action out.

pub mod agent;
pub mod prompt;
pub mod provider;

pub use agent::DecisionAgent;
pub use provider::{
    AnthropicProvider, ChatMessage, HeuristicProvider, LlmProvider, OpenAiProvider, ProviderError,
    Role, provider_from_config,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PreferencesConfig;
use crate::events::MonitoringEvent;

/// Actions a decision may propose. `none` means "leave things alone".
pub const PERMISSIBLE_ACTIONS: &[&str] = &["commit", "checkpoint", "branch", "pr", "stash", "none"];

/// How many recent project events go into a decision context.
pub const CONTEXT_EVENTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("automation not configured: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("could not parse decision: {0}")]
    Parse(String),
}

/// One proposed action. Adjustments build a new value rather than mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmDecision {
    pub action: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<String>,
}

impl LlmDecision {
    pub fn new(action: &str, confidence: f64, reasoning: &str) -> Self {
        Self {
            action: action.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.to_string(),
            requires_approval: false,
            alternative_actions: Vec::new(),
            risk_assessment: None,
        }
    }

    pub fn with_confidence(&self, confidence: f64) -> Self {
        Self {
            confidence,
            ..self.clone()
        }
    }

    pub fn with_approval_required(&self) -> Self {
        Self {
            requires_approval: true,
            ..self.clone()
        }
    }

    /// True when the decision proposes doing something.
    pub fn is_actionable(&self) -> bool {
        self.action != "none"
    }
}

/// Repository facts a decision is made against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub branch: String,
    pub is_protected: bool,
    pub is_main: bool,
    pub uncommitted_changes: usize,
    #[serde(default)]
    pub last_commit_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeContext {
    pub hour: u32,
    pub is_working_hours: bool,
}

/// Built fresh for every decision and never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub trigger: MonitoringEvent,
    pub project: ProjectState,
    pub recent_events: Vec<MonitoringEvent>,
    pub preferences: PreferencesConfig,
    pub permissible_actions: Vec<String>,
    #[serde(default)]
    pub time_of_day: Option<TimeContext>,
}

impl DecisionContext {
    pub fn new(
        trigger: MonitoringEvent,
        project: ProjectState,
        recent_events: Vec<MonitoringEvent>,
        preferences: PreferencesConfig,
    ) -> Self {
        Self {
            trigger,
            project,
            recent_events,
            preferences,
            permissible_actions: PERMISSIBLE_ACTIONS.iter().map(|a| (*a).to_string()).collect(),
            time_of_day: None,
        }
    }

    pub fn at_hour(mut self, hour: u32) -> Self {
        self.time_of_day = Some(TimeContext {
            hour,
            is_working_hours: self.preferences.is_working_hour(hour),
        });
        self
    }
}

/// Where one triggering event is in the decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPhase {
    Idle,
    Requested,
    Made,
    AutoExecute,
    ApprovalRequired,
}

/// Post-processing hook applied to every raw decision.
pub trait DecisionAdjuster {
    fn adjust(&self, decision: &LlmDecision, ctx: &DecisionContext) -> LlmDecision;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::path::Path;

    use super::*;
    use crate::events::EventType;

    /// Replays canned responses in order; errors once they run out.
    pub struct ScriptedProvider {
        pub responses: RefCell<Vec<String>>,
        pub available: bool,
    }

    impl ScriptedProvider {
        pub fn new(responses: &[&str]) -> Self {
            Self {
                responses: RefCell::new(responses.iter().rev().map(|r| (*r).to_string()).collect()),
                available: true,
            }
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ProviderError> {
            self.responses
                .borrow_mut()
                .pop()
                .ok_or_else(|| ProviderError::EmptyResponse {
                    provider: "scripted".into(),
                })
        }
    }

    pub fn context(kind: EventType, branch: &str, protected: bool, uncommitted: usize) -> DecisionContext {
        let trigger = MonitoringEvent::new(kind, Path::new("/repo"), Utc::now(), serde_json::json!({}));
        DecisionContext::new(
            trigger,
            ProjectState {
                branch: branch.to_string(),
                is_protected: protected,
                is_main: branch == "main",
                uncommitted_changes: uncommitted,
                last_commit_time: None,
            },
            Vec::new(),
            PreferencesConfig::default(),
        )
    }
}
