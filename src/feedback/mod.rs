//! Human feedback on decisions and what is learned from it.
//!
//! The feedback file is the only durable state in the pipeline. Everything
//! else here (pending decisions, preference cache) lives for one session.

mod handlers;
mod learning;
mod store;

pub use handlers::{PendingDecision, PendingRegistry};
pub use learning::{HistoricalContext, LearningEngine, PreferenceKind, UserPreference};
pub use store::{FeedbackStats, FeedbackStore};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LearningConfig;
use crate::decision::{DecisionAdjuster, DecisionContext, LlmDecision};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid feedback file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Decision not found or already processed")]
    NotFound(String),

    #[error("feedback for {0} already recorded")]
    Duplicate(String),

    #[error("correction for {0} has no corrected action")]
    MissingCorrection(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Approval,
    Rejection,
    Correction,
    ImplicitApproval,
}

impl FeedbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackKind::Approval => "approval",
            FeedbackKind::Rejection => "rejection",
            FeedbackKind::Correction => "correction",
            FeedbackKind::ImplicitApproval => "implicit_approval",
        }
    }

    /// Silence counts as consent.
    pub fn is_approval(self) -> bool {
        matches!(self, FeedbackKind::Approval | FeedbackKind::ImplicitApproval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeedback {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_action: Option<String>,
}

impl UserFeedback {
    pub fn new(kind: FeedbackKind) -> Self {
        Self {
            kind,
            reason: None,
            corrected_action: None,
            user_action: None,
        }
    }
}

/// What happened after feedback was given, e.g. whether the approved action ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub project_path: PathBuf,
    pub decision: LlmDecision,
    pub context: DecisionContext,
    pub feedback: UserFeedback,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

/// Pending decisions, the feedback store, and the learning engine behind
/// one facade.
pub struct FeedbackLoop {
    config: LearningConfig,
    store: FeedbackStore,
    pending: PendingRegistry,
    engine: LearningEngine,
}

impl FeedbackLoop {
    pub fn new(config: &LearningConfig, store: FeedbackStore) -> Self {
        let secs = u32::try_from(config.implicit_approval_timeout_secs).unwrap_or(u32::MAX);
        let timeout = Duration::seconds(i64::from(secs));
        Self {
            config: config.clone(),
            store,
            pending: PendingRegistry::new(timeout),
            engine: LearningEngine::new(config.min_similar_decisions),
        }
    }

    /// Open the configured feedback file.
    pub fn open(config: &LearningConfig) -> Self {
        let store = FeedbackStore::open(&config.resolved_feedback_path(), config.max_feedback_entries);
        Self::new(config, store)
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// Hold `decision` until feedback arrives or its deadline passes.
    pub fn register(&mut self, decision: LlmDecision, context: DecisionContext, now: DateTime<Utc>) -> String {
        self.pending.register(decision, context, now)
    }

    pub fn approve(
        &mut self,
        id: &str,
        user_action: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let mut feedback = UserFeedback::new(FeedbackKind::Approval);
        feedback.user_action = user_action;
        self.resolve(id, feedback, now)
    }

    pub fn reject(
        &mut self,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let mut feedback = UserFeedback::new(FeedbackKind::Rejection);
        feedback.reason = reason;
        self.resolve(id, feedback, now)
    }

    pub fn correct(
        &mut self,
        id: &str,
        corrected_action: &str,
        user_action: Option<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let mut feedback = UserFeedback::new(FeedbackKind::Correction);
        feedback.corrected_action = Some(corrected_action.to_string());
        feedback.user_action = user_action;
        feedback.reason = reason;
        let entry = self.resolve(id, feedback, now)?;
        // Best effort: the entry is already recorded.
        if let Err(e) = self.engine.learn_from_correction(&entry) {
            tracing::warn!(id, error = %e, "learning from correction failed");
        }
        Ok(entry)
    }

    /// Record an implicit approval for every pending decision past its deadline.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<FeedbackEntry> {
        self.pending
            .take_expired(now)
            .into_iter()
            .filter_map(|pending| {
                let id = pending.id.clone();
                let entry = Self::entry(pending, UserFeedback::new(FeedbackKind::ImplicitApproval), now);
                self.engine.invalidate(&entry.project_path);
                match self.store.record(entry.clone()) {
                    Ok(()) => {
                        tracing::info!(id = %id, "decision implicitly approved after timeout");
                        Some(entry)
                    }
                    Err(e) => {
                        tracing::warn!(id = %id, error = %e, "implicit approval not recorded");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn record_outcome(&mut self, id: &str, outcome: Outcome) -> bool {
        if let Some(project) = self.store.get(id).map(|e| e.project_path.clone()) {
            self.engine.invalidate(&project);
        }
        self.store.update_outcome(id, outcome)
    }

    pub fn analyze(&self, decision: &LlmDecision, ctx: &DecisionContext) -> HistoricalContext {
        self.engine.analyze(&self.store, decision, ctx)
    }

    pub fn stats(&self) -> FeedbackStats {
        self.store.stats()
    }

    pub fn learned_preferences(&self, project: &Path) -> Vec<UserPreference> {
        self.engine.preferences_for(&self.store, project)
    }

    /// Approval rate per action across all projects.
    pub fn action_approval_rates(&self) -> BTreeMap<String, f64> {
        self.store.stats().action_approval_rates
    }

    fn resolve(
        &mut self,
        id: &str,
        feedback: UserFeedback,
        now: DateTime<Utc>,
    ) -> Result<FeedbackEntry, FeedbackError> {
        let pending = self
            .pending
            .take(id)
            .ok_or_else(|| FeedbackError::NotFound(id.to_string()))?;
        let entry = Self::entry(pending, feedback, now);
        self.engine.invalidate(&entry.project_path);
        self.store.record(entry.clone())?;
        tracing::info!(id, kind = entry.feedback.kind.as_str(), "feedback recorded");
        Ok(entry)
    }

    fn entry(pending: PendingDecision, feedback: UserFeedback, now: DateTime<Utc>) -> FeedbackEntry {
        FeedbackEntry {
            id: pending.id,
            timestamp: now,
            project_path: pending.context.trigger.project_path.clone(),
            decision: pending.decision,
            context: pending.context,
            feedback,
            outcome: None,
        }
    }
}

impl DecisionAdjuster for FeedbackLoop {
    fn adjust(&self, decision: &LlmDecision, ctx: &DecisionContext) -> LlmDecision {
        if !self.config.enabled {
            return decision.clone();
        }
        let history = self.analyze(decision, ctx);
        let mut adjusted = decision.with_confidence(self.engine.adjust_confidence(&self.store, decision, ctx));

        if let Some(ref action) = history.adjusted_action
            && *action != decision.action
        {
            adjusted.alternative_actions.insert(0, decision.action.clone());
            adjusted.alternative_actions.retain(|a| a != action);
            adjusted.action = action.clone();
        }
        if !history.should_proceed {
            adjusted.requires_approval = true;
        }
        if !history.reasoning.is_empty() {
            adjusted.reasoning = format!("{} [{}]", decision.reasoning, history.reasoning.join("; "));
        }
        tracing::debug!(
            from = decision.confidence,
            to = adjusted.confidence,
            similar = history.similar_count,
            "confidence adjusted from feedback history"
        );
        adjusted
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::testing::context;
    use crate::events::EventType;

    fn feedback_loop() -> FeedbackLoop {
        let config = LearningConfig::default();
        FeedbackLoop::new(&config, FeedbackStore::in_memory(config.max_feedback_entries))
    }

    #[test]
    fn second_approval_is_rejected() {
        let mut fl = feedback_loop();
        let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
        let id = fl.register(LlmDecision::new("commit", 0.6, "r"), ctx, Utc::now());

        assert!(fl.approve(&id, None, Utc::now()).is_ok());
        let err = fl.approve(&id, None, Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Decision not found or already processed");
        assert_eq!(fl.store().entries().len(), 1);
    }

    #[test]
    fn correction_is_recorded_and_learned() {
        let mut fl = feedback_loop();
        let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
        let decision = LlmDecision::new("commit", 0.6, "r");
        let id = fl.register(decision.clone(), ctx.clone(), Utc::now());

        let entry = fl
            .correct(&id, "branch", None, Some("work on a branch".into()), Utc::now())
            .unwrap();
        assert_eq!(entry.feedback.kind, FeedbackKind::Correction);
        assert_eq!(entry.feedback.corrected_action.as_deref(), Some("branch"));
        assert_eq!(fl.store().entries().len(), 1);

        let history = fl.analyze(&decision, &ctx);
        assert!(history.common_corrections.contains(&"branch".to_string()));
    }

    #[test]
    fn preferences_follow_feedback_recorded_later() {
        let mut fl = feedback_loop();
        let repo = Path::new("/repo");
        assert!(fl.learned_preferences(repo).is_empty());

        let t0 = Utc::now();
        for _ in 0..5 {
            let late = context(EventType::UncommittedChanges, "feature/x", false, 4).at_hour(22);
            let id = fl.register(LlmDecision::new("commit", 0.9, "r"), late, t0);
            fl.reject(&id, Some("it's late".into()), t0).unwrap();
        }
        let prefs = fl.learned_preferences(repo);
        assert!(prefs.iter().any(|p| p.kind == PreferenceKind::WorkingHours));
    }

    #[test]
    fn renamed_branches_become_a_naming_preference() {
        let mut fl = feedback_loop();
        let repo = Path::new("/repo");
        assert!(fl.learned_preferences(repo).is_empty());

        for name in ["fix/login", "fix/typo"] {
            let ctx = context(EventType::FeatureComplete, "main", true, 2);
            let id = fl.register(LlmDecision::new("branch", 0.8, "r"), ctx, Utc::now());
            let entry = fl
                .correct(&id, "branch", Some(name.into()), None, Utc::now())
                .unwrap();
            assert_eq!(entry.feedback.user_action.as_deref(), Some(name));
        }
        let prefs = fl.learned_preferences(repo);
        let naming = prefs
            .iter()
            .find(|p| p.kind == PreferenceKind::BranchNaming)
            .unwrap();
        assert!(naming.description.contains("fix/"));
    }

    #[test]
    fn timeout_records_implicit_approval_once() {
        let mut fl = feedback_loop();
        let t0 = Utc::now();
        let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
        let id = fl.register(LlmDecision::new("stash", 0.6, "r"), ctx, t0);

        assert!(fl.expire(t0 + Duration::minutes(59)).is_empty());
        let expired = fl.expire(t0 + Duration::minutes(61));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].feedback.kind, FeedbackKind::ImplicitApproval);
        assert!(fl.expire(t0 + Duration::hours(3)).is_empty());
        assert!(fl.approve(&id, None, t0 + Duration::hours(3)).is_err());
        assert_eq!(fl.store().entries().len(), 1);
    }

    #[test]
    fn explicit_feedback_cancels_timeout() {
        let mut fl = feedback_loop();
        let t0 = Utc::now();
        let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
        let id = fl.register(LlmDecision::new("stash", 0.6, "r"), ctx, t0);
        fl.reject(&id, Some("not now".into()), t0 + Duration::minutes(5)).unwrap();
        assert!(fl.expire(t0 + Duration::hours(2)).is_empty());
        assert_eq!(fl.store().entries()[0].feedback.kind, FeedbackKind::Rejection);
    }

    #[test]
    fn adjuster_lowers_confidence_after_rejections() {
        let mut fl = feedback_loop();
        let t0 = Utc::now();
        for _ in 0..5 {
            let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
            let id = fl.register(LlmDecision::new("commit", 0.9, "r"), ctx, t0);
            fl.reject(&id, None, t0).unwrap();
        }
        let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
        let adjusted = fl.adjust(&LlmDecision::new("commit", 0.9, "r"), &ctx);
        assert!(adjusted.confidence < 0.9);
        assert!(adjusted.requires_approval);
    }

    #[test]
    fn adjuster_is_identity_when_learning_disabled() {
        let config = LearningConfig {
            enabled: false,
            ..LearningConfig::default()
        };
        let fl = FeedbackLoop::new(&config, FeedbackStore::in_memory(10));
        let ctx = context(EventType::UncommittedChanges, "feature/x", false, 4);
        let decision = LlmDecision::new("commit", 0.9, "r");
        assert_eq!(fl.adjust(&decision, &ctx), decision);
    }
}
