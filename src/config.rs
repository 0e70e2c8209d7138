use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Config file name constants.
pub const CONFIG_TOML: &str = ".gitpilot.toml";
pub const CONFIG_JSON: &str = ".gitpilot.json";

/// Find the config file path, preferring .gitpilot.toml over .gitpilot.json.
/// Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let toml_path = dir.join(CONFIG_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = dir.join(CONFIG_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

/// Top-level .gitpilot.toml config.
///
/// All structs use snake_case (TOML native) with `alias` attributes so
/// camelCase JSON configs load too.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub git: GitWorkflowConfig,
    #[serde(default)]
    pub suggestions: SuggestionConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            automation: AutomationConfig::default(),
            git: GitWorkflowConfig::default(),
            suggestions: SuggestionConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// How much the assistant is allowed to do on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AutomationMode {
    /// Decisions are never requested.
    Off,
    /// Decisions are proposed and routed to a human.
    #[default]
    Assisted,
    /// Confident decisions that pass the safety gate execute without asking.
    Autonomous,
}

impl AutomationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomationMode::Off => "off",
            AutomationMode::Assisted => "assisted",
            AutomationMode::Autonomous => "autonomous",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AutomationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: AutomationMode,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AutomationMode::default(),
            llm: LlmConfig::default(),
            safety: SafetyConfig::default(),
            learning: LearningConfig::default(),
            preferences: PreferencesConfig::default(),
        }
    }
}

impl AutomationConfig {
    /// True when the decision pipeline should run at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.mode != AutomationMode::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    #[serde(alias = "open_ai")]
    Openai,
    /// Offline rule-based provider; needs no credentials.
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    /// Model id; each provider has its own default when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default, alias = "apiKeyEnv")]
    pub api_key_env: Option<String>,
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens", alias = "maxTokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout", alias = "timeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            api_key_env: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SafetyConfig {
    #[serde(default = "default_auto_execute_threshold", alias = "autoExecuteThreshold")]
    pub auto_execute_threshold: f64,
    #[serde(default = "default_max_actions_per_hour", alias = "maxActionsPerHour")]
    pub max_actions_per_hour: u32,
    #[serde(default, alias = "emergencyStop")]
    pub emergency_stop: bool,
    /// Actions that always go to a human, whatever the confidence.
    #[serde(default = "default_require_approval_for", alias = "requireApprovalFor")]
    pub require_approval_for: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            auto_execute_threshold: default_auto_execute_threshold(),
            max_actions_per_hour: default_max_actions_per_hour(),
            emergency_stop: false,
            require_approval_for: default_require_approval_for(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LearningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_similar", alias = "minSimilarDecisions")]
    pub min_similar_decisions: usize,
    #[serde(
        default = "default_implicit_approval_timeout",
        alias = "implicitApprovalTimeoutSecs"
    )]
    pub implicit_approval_timeout_secs: u64,
    #[serde(default = "default_max_feedback_entries", alias = "maxFeedbackEntries")]
    pub max_feedback_entries: usize,
    /// Where feedback is persisted; defaults to the user data dir.
    #[serde(default, alias = "feedbackPath")]
    pub feedback_path: Option<PathBuf>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_similar_decisions: default_min_similar(),
            implicit_approval_timeout_secs: default_implicit_approval_timeout(),
            max_feedback_entries: default_max_feedback_entries(),
            feedback_path: None,
        }
    }
}

impl LearningConfig {
    /// Resolve the feedback file, falling back to `<data dir>/gitpilot/feedback.json`.
    pub fn resolved_feedback_path(&self) -> PathBuf {
        if let Some(ref path) = self.feedback_path {
            return path.clone();
        }
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("gitpilot")
            .join("feedback.json")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PreferencesConfig {
    #[serde(default = "default_working_hours_start", alias = "workingHoursStart")]
    pub working_hours_start: u32,
    #[serde(default = "default_working_hours_end", alias = "workingHoursEnd")]
    pub working_hours_end: u32,
    #[serde(default = "default_branch_prefix", alias = "branchPrefix")]
    pub branch_prefix: String,
    #[serde(default = "default_commit_style", alias = "commitStyle")]
    pub commit_style: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            working_hours_start: default_working_hours_start(),
            working_hours_end: default_working_hours_end(),
            branch_prefix: default_branch_prefix(),
            commit_style: default_commit_style(),
        }
    }
}

impl PreferencesConfig {
    /// Whether `hour` (0-23, local) falls inside the configured working day.
    pub fn is_working_hour(&self, hour: u32) -> bool {
        if self.working_hours_start <= self.working_hours_end {
            hour >= self.working_hours_start && hour < self.working_hours_end
        } else {
            // Overnight shift, e.g. 22..6
            hour >= self.working_hours_start || hour < self.working_hours_end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GitWorkflowConfig {
    #[serde(default = "default_main_branch", alias = "mainBranch")]
    pub main_branch: String,
    #[serde(default = "default_protected_branches", alias = "protectedBranches")]
    pub protected_branches: Vec<String>,
}

impl Default for GitWorkflowConfig {
    fn default() -> Self {
        Self {
            main_branch: default_main_branch(),
            protected_branches: default_protected_branches(),
        }
    }
}

impl GitWorkflowConfig {
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|b| b == branch)
    }

    pub fn is_main(&self, branch: &str) -> bool {
        branch == self.main_branch || branch == "main" || branch == "master"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SuggestionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_uncommitted_threshold", alias = "uncommittedFileThreshold")]
    pub uncommitted_file_threshold: usize,
    #[serde(default = "default_reminder_minutes", alias = "reminderMinutes")]
    pub reminder_minutes: i64,
    #[serde(default = "default_warning_minutes", alias = "warningMinutes")]
    pub warning_minutes: i64,
    #[serde(default = "default_cooldown_minutes", alias = "cooldownMinutes")]
    pub cooldown_minutes: i64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uncommitted_file_threshold: default_uncommitted_threshold(),
            reminder_minutes: default_reminder_minutes(),
            warning_minutes: default_warning_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EventsConfig {
    #[serde(default = "default_max_events", alias = "maxEvents")]
    pub max_events: usize,
    #[serde(default = "default_milestone_window", alias = "milestoneWindowSecs")]
    pub milestone_window_secs: i64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            milestone_window_secs: default_milestone_window(),
        }
    }
}

// Default value functions for serde
fn default_version() -> String { "1".into() }
fn default_true() -> bool { true }
fn default_max_tokens() -> u32 { 1024 }
fn default_llm_timeout() -> u64 { 30 }
fn default_auto_execute_threshold() -> f64 { 0.8 }
fn default_max_actions_per_hour() -> u32 { 10 }
fn default_require_approval_for() -> Vec<String> { vec!["pr".into()] }
fn default_min_similar() -> usize { 3 }
fn default_implicit_approval_timeout() -> u64 { 3600 }
fn default_max_feedback_entries() -> usize { 1000 }
fn default_working_hours_start() -> u32 { 9 }
fn default_working_hours_end() -> u32 { 18 }
fn default_branch_prefix() -> String { "feature/".into() }
fn default_commit_style() -> String { "conventional".into() }
fn default_main_branch() -> String { "main".into() }
fn default_protected_branches() -> Vec<String> {
    vec!["main".into(), "master".into(), "develop".into()]
}
fn default_uncommitted_threshold() -> usize { 5 }
fn default_reminder_minutes() -> i64 { 60 }
fn default_warning_minutes() -> i64 { 120 }
fn default_cooldown_minutes() -> i64 { 10 }
fn default_max_events() -> usize { 1000 }
fn default_milestone_window() -> i64 { 300 }

impl Config {
    /// Load config from a file (TOML or JSON, auto-detected by extension).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => Self::parse_toml(&contents).or_else(|_| Self::parse_json(&contents))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load the project's config, or defaults when the project has none.
    pub fn load_or_default(project_root: &Path) -> anyhow::Result<Self> {
        match find_config(project_root) {
            Some(path) => Self::load(&path),
            None => {
                tracing::debug!(root = %project_root.display(), "no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    pub fn parse_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_JSON}: {e}")).into())
    }

    /// Reject values serde accepts but the pipeline cannot use.
    pub fn validate(&self) -> anyhow::Result<()> {
        let threshold = self.automation.safety.auto_execute_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ExitError::Config(format!(
                "automation.safety.auto_execute_threshold must be within 0..=1, got {threshold}"
            ))
            .into());
        }
        let prefs = &self.automation.preferences;
        if prefs.working_hours_start > 23 || prefs.working_hours_end > 24 {
            return Err(ExitError::Config(format!(
                "working hours must be 0-24, got {}..{}",
                prefs.working_hours_start, prefs.working_hours_end
            ))
            .into());
        }
        if self.events.max_events == 0 {
            return Err(ExitError::Config("events.max_events must be at least 1".into()).into());
        }
        Ok(())
    }

    /// Serialize config to a TOML string with section comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# gitpilot configuration\n# Run `gitpilot schema` for the full JSON Schema.\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, path: &[&str], comment: &str) {
            let Some((last, parents)) = path.split_last() else {
                return;
            };
            let mut table = doc.as_table_mut();
            for key in parents {
                match table.get_mut(key).and_then(|i| i.as_table_mut()) {
                    Some(t) => table = t,
                    None => return,
                }
            }
            if let Some(tbl) = table.get_mut(last).and_then(|i| i.as_table_mut()) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        set_table_comment(
            &mut doc,
            &["automation"],
            "\n# Decision pipeline. mode: off | assisted | autonomous\n",
        );
        set_table_comment(
            &mut doc,
            &["automation", "llm"],
            "\n# Decision provider: anthropic | openai | heuristic\n",
        );
        set_table_comment(
            &mut doc,
            &["automation", "safety"],
            "\n# Safety gate applied before every action\n",
        );
        set_table_comment(
            &mut doc,
            &["automation", "learning"],
            "\n# Feedback persistence and confidence learning\n",
        );
        set_table_comment(&mut doc, &["git"], "\n# Branch policy\n");
        set_table_comment(
            &mut doc,
            &["suggestions"],
            "\n# Rule-based suggestions (work even with automation disabled)\n",
        );

        Ok(doc.to_string())
    }
}
