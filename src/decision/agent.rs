use super::{
    DecisionAdjuster, DecisionContext, DecisionError, LlmDecision, LlmProvider, prompt,
    provider_from_config,
};
use crate::config::AutomationConfig;

/// Turns a decision context into one proposed action through the
/// configured provider.
pub struct DecisionAgent {
    config: AutomationConfig,
    provider: Option<Box<dyn LlmProvider>>,
    initialized: bool,
}

impl DecisionAgent {
    /// The provider is built from config on first `initialize`.
    pub fn new(config: AutomationConfig) -> Self {
        Self {
            config,
            provider: None,
            initialized: false,
        }
    }

    pub fn with_provider(config: AutomationConfig, provider: Box<dyn LlmProvider>) -> Self {
        Self {
            config,
            provider: Some(provider),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(|p| p.name())
    }

    /// Idempotent. Fails when automation is off or the provider has no
    /// credentials; callers fall back to suggestions only.
    pub fn initialize(&mut self) -> Result<(), DecisionError> {
        if self.initialized {
            return Ok(());
        }
        if !self.config.is_active() {
            return Err(DecisionError::Config(format!(
                "automation is disabled (enabled = {}, mode = {})",
                self.config.enabled,
                self.config.mode.as_str()
            )));
        }
        let provider = self
            .provider
            .get_or_insert_with(|| provider_from_config(&self.config.llm));
        if !provider.is_available() {
            return Err(DecisionError::Config(format!(
                "{} provider has no credentials",
                provider.name()
            )));
        }
        tracing::info!(provider = provider.name(), "decision agent ready");
        self.initialized = true;
        Ok(())
    }

    /// Ask the provider for a decision, validate it, then apply the optional
    /// adjuster and policy.
    pub fn make_decision(
        &mut self,
        ctx: &DecisionContext,
        adjuster: Option<&dyn DecisionAdjuster>,
    ) -> Result<LlmDecision, DecisionError> {
        self.initialize()?;
        let provider = self
            .provider
            .as_deref()
            .ok_or_else(|| DecisionError::Config("no provider".into()))?;

        let messages = prompt::build_messages(ctx)?;
        let raw = provider.complete(&messages)?;
        let mut decision = provider.parse_decision(&raw)?;

        if !ctx.permissible_actions.contains(&decision.action) {
            tracing::warn!(action = %decision.action, "provider proposed an action outside the allowed set");
        }
        // Policy runs last so a learned correction cannot dodge it.
        if let Some(adjuster) = adjuster {
            decision = adjuster.adjust(&decision, ctx);
        }
        if self
            .config
            .safety
            .require_approval_for
            .contains(&decision.action)
        {
            decision = decision.with_approval_required();
        }

        tracing::info!(
            provider = provider.name(),
            action = %decision.action,
            confidence = decision.confidence,
            requires_approval = decision.requires_approval,
            "decision made"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationMode;
    use crate::decision::ProviderError;
    use crate::decision::testing::{self, ScriptedProvider};
    use crate::events::EventType;

    fn enabled() -> AutomationConfig {
        AutomationConfig {
            enabled: true,
            mode: AutomationMode::Autonomous,
            ..AutomationConfig::default()
        }
    }

    struct Halve;

    impl DecisionAdjuster for Halve {
        fn adjust(&self, decision: &LlmDecision, _ctx: &DecisionContext) -> LlmDecision {
            decision.with_confidence(decision.confidence / 2.0)
        }
    }

    struct RewriteTo(&'static str);

    impl DecisionAdjuster for RewriteTo {
        fn adjust(&self, decision: &LlmDecision, _ctx: &DecisionContext) -> LlmDecision {
            LlmDecision {
                action: self.0.to_string(),
                ..decision.clone()
            }
        }
    }

    #[test]
    fn disabled_automation_is_a_config_error() {
        let mut agent = DecisionAgent::with_provider(
            AutomationConfig::default(),
            Box::new(ScriptedProvider::new(&[])),
        );
        assert!(matches!(agent.initialize(), Err(DecisionError::Config(_))));
        assert!(!agent.is_initialized());
    }

    #[test]
    fn unavailable_provider_is_a_config_error() {
        let mut provider = ScriptedProvider::new(&[]);
        provider.available = false;
        let mut agent = DecisionAgent::with_provider(enabled(), Box::new(provider));
        let err = agent.initialize().unwrap_err();
        assert!(err.to_string().contains("no credentials"));
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut agent = DecisionAgent::with_provider(enabled(), Box::new(ScriptedProvider::new(&[])));
        agent.initialize().unwrap();
        agent.initialize().unwrap();
        assert!(agent.is_initialized());
        assert_eq!(agent.provider_name(), Some("scripted"));
    }

    #[test]
    fn decision_is_parsed_and_adjusted() {
        let mut agent = DecisionAgent::with_provider(
            enabled(),
            Box::new(ScriptedProvider::new(&[
                r#"{"action":"commit","confidence":0.9,"reasoning":"big change set"}"#,
            ])),
        );
        let ctx = testing::context(EventType::UncommittedChanges, "feature/x", false, 8);
        let decision = agent.make_decision(&ctx, Some(&Halve)).unwrap();
        assert_eq!(decision.action, "commit");
        assert!((decision.confidence - 0.45).abs() < 1e-9);
    }

    #[test]
    fn configured_actions_always_need_approval() {
        let mut agent = DecisionAgent::with_provider(
            enabled(),
            Box::new(ScriptedProvider::new(&[
                r#"{"action":"pr","confidence":0.99,"reasoning":"done"}"#,
            ])),
        );
        let ctx = testing::context(EventType::FeatureComplete, "feature/x", false, 0);
        assert!(agent.make_decision(&ctx, None).unwrap().requires_approval);
    }

    #[test]
    fn rewritten_action_still_needs_approval() {
        let mut agent = DecisionAgent::with_provider(
            enabled(),
            Box::new(ScriptedProvider::new(&[
                r#"{"action":"commit","confidence":1.0,"reasoning":"save work"}"#,
            ])),
        );
        let ctx = testing::context(EventType::UncommittedChanges, "feature/x", false, 3);
        let decision = agent.make_decision(&ctx, Some(&RewriteTo("pr"))).unwrap();
        assert_eq!(decision.action, "pr");
        assert!(decision.requires_approval);
    }

    #[test]
    fn provider_failure_propagates() {
        let mut agent = DecisionAgent::with_provider(enabled(), Box::new(ScriptedProvider::new(&[])));
        let ctx = testing::context(EventType::UncommittedChanges, "feature/x", false, 8);
        let err = agent.make_decision(&ctx, None).unwrap_err();
        assert!(matches!(
            err,
            DecisionError::Provider(ProviderError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn malformed_reply_is_a_parse_error() {
        let mut agent = DecisionAgent::with_provider(
            enabled(),
            Box::new(ScriptedProvider::new(&["I think you should commit."])),
        );
        let ctx = testing::context(EventType::UncommittedChanges, "feature/x", false, 8);
        assert!(matches!(
            agent.make_decision(&ctx, None),
            Err(DecisionError::Parse(_))
        ));
    }
}
