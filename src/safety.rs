//! Safety gate evaluated before every action.
//!
//! Every check runs and contributes its own reason, so a rejection always
//! explains everything that was wrong, not just the first thing.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{AutomationConfig, AutomationMode, SafetyConfig};
use crate::decision::{DecisionContext, LlmDecision};

/// Actions that write to the current branch.
const BRANCH_MUTATING: &[&str] = &["commit", "checkpoint", "pr"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCheck {
    AutomationEnabled,
    Mode,
    Confidence,
    RateLimit,
    ProtectedBranch,
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyReason {
    pub check: SafetyCheck,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reasons: Vec<SafetyReason>,
}

impl SafetyVerdict {
    pub fn messages(&self) -> Vec<&str> {
        self.reasons.iter().map(|r| r.message.as_str()).collect()
    }

    pub fn summary(&self) -> String {
        self.messages().join("; ")
    }

    pub fn failed(&self, check: SafetyCheck) -> bool {
        self.reasons.iter().any(|r| r.check == check)
    }
}

/// Decides whether one more action fits the rate budget.
///
/// `executed` holds the times of previously executed actions, oldest first.
pub trait RateLimitPolicy {
    fn allows(&self, executed: &[DateTime<Utc>], now: DateTime<Utc>) -> bool;
}

/// Never limits.
pub struct Unlimited;

impl RateLimitPolicy for Unlimited {
    fn allows(&self, _executed: &[DateTime<Utc>], _now: DateTime<Utc>) -> bool {
        true
    }
}

/// At most `max` actions in any rolling hour.
pub struct RollingHour {
    pub max: u32,
}

impl RateLimitPolicy for RollingHour {
    fn allows(&self, executed: &[DateTime<Utc>], now: DateTime<Utc>) -> bool {
        let from = now - Duration::hours(1);
        let recent = executed.iter().filter(|t| **t > from && **t <= now).count();
        recent < self.max as usize
    }
}

pub struct SafetyValidator {
    rate_limit: Box<dyn RateLimitPolicy>,
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new(Box::new(Unlimited))
    }
}

impl SafetyValidator {
    pub fn new(rate_limit: Box<dyn RateLimitPolicy>) -> Self {
        Self { rate_limit }
    }

    /// Rolling-hour limit from `max_actions_per_hour`; 0 disables it.
    pub fn from_config(safety: &SafetyConfig) -> Self {
        match safety.max_actions_per_hour {
            0 => Self::default(),
            max => Self::new(Box::new(RollingHour { max })),
        }
    }

    /// Run every check. Has no side effects.
    ///
    /// Decisions that require approval skip the mode and confidence checks:
    /// a human is making that call.
    pub fn validate(
        &self,
        config: &AutomationConfig,
        decision: &LlmDecision,
        ctx: &DecisionContext,
        executed: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> SafetyVerdict {
        let mut reasons = Vec::new();
        let mut fail = |check, message: String| reasons.push(SafetyReason { check, message });

        if !config.enabled {
            fail(SafetyCheck::AutomationEnabled, "automation is disabled".to_string());
        }

        if !decision.requires_approval {
            if config.mode != AutomationMode::Autonomous {
                fail(
                    SafetyCheck::Mode,
                    format!(
                        "mode is {}; only autonomous mode executes without approval",
                        config.mode.as_str()
                    ),
                );
            }
            let threshold = config.safety.auto_execute_threshold;
            if decision.confidence < threshold {
                fail(
                    SafetyCheck::Confidence,
                    format!(
                        "confidence {:.2} is below the auto-execute threshold {threshold:.2}",
                        decision.confidence
                    ),
                );
            }
        }

        if !self.rate_limit.allows(executed, now) {
            fail(
                SafetyCheck::RateLimit,
                format!(
                    "rate limit reached ({} actions per hour)",
                    config.safety.max_actions_per_hour
                ),
            );
        }

        if ctx.project.is_protected && BRANCH_MUTATING.contains(&decision.action.as_str()) {
            fail(
                SafetyCheck::ProtectedBranch,
                format!(
                    "{} would modify protected branch '{}'",
                    decision.action, ctx.project.branch
                ),
            );
        }

        if config.safety.emergency_stop {
            fail(SafetyCheck::EmergencyStop, "emergency stop is active".to_string());
        }

        let verdict = SafetyVerdict {
            safe: reasons.is_empty(),
            reasons,
        };
        if !verdict.safe {
            tracing::debug!(action = %decision.action, reasons = %verdict.summary(), "safety gate closed");
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::testing;
    use crate::events::EventType;

    fn autonomous() -> AutomationConfig {
        AutomationConfig {
            enabled: true,
            mode: AutomationMode::Autonomous,
            ..AutomationConfig::default()
        }
    }

    fn check(config: &AutomationConfig, decision: &LlmDecision, protected: bool) -> SafetyVerdict {
        let branch = if protected { "main" } else { "feature/x" };
        let ctx = testing::context(EventType::UncommittedChanges, branch, protected, 3);
        SafetyValidator::default().validate(config, decision, &ctx, &[], Utc::now())
    }

    #[test]
    fn confident_decision_on_feature_branch_is_safe() {
        let verdict = check(&autonomous(), &LlmDecision::new("commit", 0.9, "r"), false);
        assert!(verdict.safe, "{}", verdict.summary());
    }

    #[test]
    fn commit_on_protected_branch_is_rejected() {
        let verdict = check(&autonomous(), &LlmDecision::new("commit", 0.95, "r"), true);
        assert!(!verdict.safe);
        assert!(verdict.messages().iter().any(|m| m.contains("protected branch")));
    }

    #[test]
    fn branch_creation_from_protected_is_allowed() {
        let verdict = check(&autonomous(), &LlmDecision::new("branch", 0.95, "r"), true);
        assert!(verdict.safe, "{}", verdict.summary());
    }

    #[test]
    fn emergency_stop_blocks_everything() {
        let mut config = autonomous();
        config.safety.emergency_stop = true;
        for action in ["commit", "branch", "stash", "pr"] {
            let decision = LlmDecision::new(action, 1.0, "r").with_approval_required();
            let verdict = check(&config, &decision, false);
            assert!(!verdict.safe);
            assert!(verdict.failed(SafetyCheck::EmergencyStop));
        }
    }

    #[test]
    fn failures_accumulate() {
        let mut config = autonomous();
        config.enabled = false;
        config.mode = AutomationMode::Assisted;
        config.safety.emergency_stop = true;
        let verdict = check(&config, &LlmDecision::new("commit", 0.2, "r"), true);
        let checks: Vec<SafetyCheck> = verdict.reasons.iter().map(|r| r.check).collect();
        assert_eq!(
            checks,
            vec![
                SafetyCheck::AutomationEnabled,
                SafetyCheck::Mode,
                SafetyCheck::Confidence,
                SafetyCheck::ProtectedBranch,
                SafetyCheck::EmergencyStop,
            ]
        );
    }

    #[test]
    fn approval_required_skips_mode_and_confidence() {
        let mut config = autonomous();
        config.mode = AutomationMode::Assisted;
        let decision = LlmDecision::new("stash", 0.3, "r").with_approval_required();
        assert!(check(&config, &decision, false).safe);
    }

    #[test]
    fn assisted_mode_blocks_auto_execution() {
        let mut config = autonomous();
        config.mode = AutomationMode::Assisted;
        let verdict = check(&config, &LlmDecision::new("stash", 0.99, "r"), false);
        assert!(verdict.failed(SafetyCheck::Mode));
    }

    #[test]
    fn validation_is_repeatable() {
        let config = autonomous();
        let decision = LlmDecision::new("commit", 0.5, "r");
        let first = check(&config, &decision, false);
        let second = check(&config, &decision, false);
        assert_eq!(first, second);
    }

    #[test]
    fn rolling_hour_limit() {
        let now = Utc::now();
        let policy = RollingHour { max: 2 };
        let executed = vec![now - Duration::minutes(90), now - Duration::minutes(30)];
        assert!(policy.allows(&executed, now));
        let executed = vec![now - Duration::minutes(50), now - Duration::minutes(10)];
        assert!(!policy.allows(&executed, now));

        let validator = SafetyValidator::new(Box::new(policy));
        let ctx = testing::context(EventType::UncommittedChanges, "feature/x", false, 1);
        let verdict = validator.validate(
            &autonomous(),
            &LlmDecision::new("stash", 0.9, "r"),
            &ctx,
            &executed,
            now,
        );
        assert!(verdict.failed(SafetyCheck::RateLimit));
    }

    #[test]
    fn zero_budget_means_unlimited() {
        let now = Utc::now();
        let executed: Vec<DateTime<Utc>> = (0..20).map(|i| now - Duration::minutes(i)).collect();
        let ctx = testing::context(EventType::UncommittedChanges, "feature/x", false, 1);
        let decision = LlmDecision::new("stash", 0.9, "r");

        let mut safety = SafetyConfig::default();
        let limited = SafetyValidator::from_config(&safety);
        assert!(limited.validate(&autonomous(), &decision, &ctx, &executed, now).failed(SafetyCheck::RateLimit));

        safety.max_actions_per_hour = 0;
        let unlimited = SafetyValidator::from_config(&safety);
        assert!(unlimited.validate(&autonomous(), &decision, &ctx, &executed, now).safe);
    }
}
