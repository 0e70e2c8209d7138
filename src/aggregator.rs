//! The event pipeline.
//!
//! An [`EventAggregator`] owns every piece of in-memory state: the event
//! history, the git-state baseline, suggestion cooldowns, the pending
//! decision registry and the execution history. Each incoming event flows
//! through milestone detection, suggestion generation and, when automation
//! is active, one decision cycle:
//!
//! ```text
//! event -> store -> milestones / suggestions
//!                -> decide -> safety preflight -> execute
//!                                              -> wait for feedback
//! ```
//!
//! Callers observe the pipeline through [`Notification`]s, either by
//! subscribing or from the return value of each entry point.

use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::decision::{
    CONTEXT_EVENTS, DecisionAgent, DecisionContext, DecisionPhase, LlmDecision, ProjectState,
};
use crate::events::{EventStats, EventStore, EventType, MonitoringEvent};
use crate::executor::{ActionExecutor, ActionResult};
use crate::feedback::{
    FeedbackEntry, FeedbackError, FeedbackLoop, FeedbackStats, Outcome, PendingDecision,
    UserPreference,
};
use crate::git::{GitCollaborator, GitError, GitHubCollaborator};
use crate::milestones::{AggregatedMilestone, MilestoneDetector};
use crate::patterns::conversation;
use crate::patterns::{GitSnapshot, GitStateDetector};
use crate::safety::{SafetyCheck, SafetyValidator};
use crate::suggestions::{MonitoringSuggestion, SuggestionGenerator};

/// Everything the pipeline tells the outside world.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    Milestone(AggregatedMilestone),
    Suggestion(MonitoringSuggestion),
    /// A decision passed the safety gate and was executed.
    ActionReady {
        decision: LlmDecision,
        result: ActionResult,
    },
    /// A decision is waiting for approval under `id`.
    ApprovalRequired { id: String, decision: LlmDecision },
    /// The safety gate refused a decision outright; asking a human would
    /// not change the outcome.
    Blocked {
        decision: LlmDecision,
        reasons: Vec<String>,
    },
    RollbackFailed { action: String, error: String },
}

/// Answer to an approval, rejection or correction.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

impl FeedbackResponse {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            result: None,
        }
    }
}

type Subscriber = Box<dyn FnMut(&Notification)>;

pub struct EventAggregator {
    config: Config,
    store: EventStore,
    git_state: GitStateDetector,
    milestones: MilestoneDetector,
    suggestions: SuggestionGenerator,
    agent: DecisionAgent,
    executor: ActionExecutor,
    feedback: FeedbackLoop,
    subscribers: Vec<Subscriber>,
    processing_decision: AtomicBool,
    phase: DecisionPhase,
}

impl EventAggregator {
    /// Pipeline with the configured provider and the on-disk feedback file.
    pub fn new(config: Config, git: Rc<dyn GitCollaborator>, github: Rc<dyn GitHubCollaborator>) -> Self {
        let agent = DecisionAgent::new(config.automation.clone());
        let feedback = FeedbackLoop::open(&config.automation.learning);
        Self::with_parts(config, agent, git, github, feedback)
    }

    pub fn with_parts(
        config: Config,
        agent: DecisionAgent,
        git: Rc<dyn GitCollaborator>,
        github: Rc<dyn GitHubCollaborator>,
        feedback: FeedbackLoop,
    ) -> Self {
        let validator = SafetyValidator::from_config(&config.automation.safety);
        let executor = ActionExecutor::new(&config, git, github, validator);
        Self {
            store: EventStore::new(config.events.max_events),
            git_state: GitStateDetector::new(config.git.clone()),
            milestones: MilestoneDetector::new(Duration::seconds(config.events.milestone_window_secs)),
            suggestions: SuggestionGenerator::new(config.suggestions.clone()),
            agent,
            executor,
            feedback,
            subscribers: Vec::new(),
            processing_decision: AtomicBool::new(false),
            phase: DecisionPhase::Idle,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Furthest phase the most recent decision cycle reached.
    pub fn last_phase(&self) -> DecisionPhase {
        self.phase
    }

    pub fn subscribe(&mut self, handler: impl FnMut(&Notification) + 'static) {
        self.subscribers.push(Box::new(handler));
    }

    /// Record `event` and run it through the pipeline.
    ///
    /// Events the pipeline emits about itself are stored but never start a
    /// new decision cycle.
    pub fn add_event(&mut self, event: MonitoringEvent, now: DateTime<Utc>) -> Vec<Notification> {
        self.tick(now);
        tracing::debug!(
            event = %event.event_type,
            project = %event.project_path.display(),
            "event received"
        );
        self.store.add_event(event.clone());
        if event.event_type.is_internal() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let from = event.timestamp - self.milestones.window();
        let window = self.store.window(&event.project_path, from, event.timestamp);
        for milestone in self.milestones.detect(&event, &window) {
            tracing::info!(milestone = milestone.kind.as_str(), title = %milestone.title, "milestone reached");
            self.emit(Notification::Milestone(milestone), &mut out);
        }
        if let Some(suggestion) = self.suggestions.generate(&event, now) {
            tracing::debug!(kind = suggestion.kind.as_str(), "suggestion generated");
            self.emit(Notification::Suggestion(suggestion), &mut out);
        }
        if self.config.automation.is_active() {
            self.decision_cycle(&event, now, &mut out);
        }
        out
    }

    /// Diff `snapshot` against the last one seen for `project` and feed the
    /// resulting events through the pipeline.
    pub fn observe_snapshot(
        &mut self,
        project: &Path,
        snapshot: GitSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Notification> {
        let events = self.git_state.observe(project, snapshot, now);
        events
            .into_iter()
            .flat_map(|event| self.add_event(event, now))
            .collect()
    }

    /// Take a snapshot of `project` through git and observe it.
    pub fn poll(&mut self, project: &Path, now: DateTime<Utc>) -> Result<Vec<Notification>, GitError> {
        let snapshot = self.executor.git().snapshot(project)?;
        Ok(self.observe_snapshot(project, snapshot, now))
    }

    /// Feed conversation text through the phrase recognizer.
    pub fn note(&mut self, project: &Path, text: &str, now: DateTime<Utc>) -> Vec<Notification> {
        conversation::match_message(text, project, now)
            .into_iter()
            .flat_map(|event| self.add_event(event, now))
            .collect()
    }

    /// Fire implicit approvals whose deadline has passed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<FeedbackEntry> {
        let expired = self.feedback.expire(now);
        for entry in &expired {
            self.store.add_event(feedback_event(entry, now));
        }
        expired
    }

    pub fn recent_events(&self, n: usize) -> Vec<MonitoringEvent> {
        self.store.recent_events(n)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> EventStats {
        self.store.stats(now)
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn pending(&self) -> Vec<&PendingDecision> {
        self.feedback.pending().list()
    }

    pub fn feedback_stats(&self) -> FeedbackStats {
        self.feedback.stats()
    }

    pub fn learned_preferences(&self, project: &Path) -> Vec<UserPreference> {
        self.feedback.learned_preferences(project)
    }

    pub fn execution_history(&self) -> &[ActionResult] {
        self.executor.history()
    }

    /// Execute `decision` directly. The safety gate still applies.
    pub fn execute_decision(
        &mut self,
        decision: &LlmDecision,
        ctx: &DecisionContext,
        now: DateTime<Utc>,
    ) -> ActionResult {
        let result = self.executor.execute_decision(decision, ctx, now);
        self.store.add_event(result.to_event(&ctx.trigger.project_path));
        result
    }

    /// Undo `result`. Failures are reported as a notification, never raised.
    pub fn rollback(&mut self, result: &ActionResult) -> bool {
        match self.executor.try_rollback(result) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(action = %result.action, error = %e, "rollback failed");
                let mut sink = Vec::new();
                self.emit(
                    Notification::RollbackFailed {
                        action: result.action.clone(),
                        error: e.to_string(),
                    },
                    &mut sink,
                );
                false
            }
        }
    }

    /// Approve a pending decision and execute it.
    pub fn handle_approval(
        &mut self,
        id: &str,
        user_action: Option<String>,
        now: DateTime<Utc>,
    ) -> FeedbackResponse {
        // The repository may have moved on since the decision was registered;
        // gate it against what is checked out now.
        let Some(trigger) = self.feedback.pending().get(id).map(|p| p.context.trigger.clone()) else {
            return FeedbackResponse::failed(FeedbackError::NotFound(id.to_string()).to_string());
        };
        let current = match self.build_context(&trigger, now) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(id, error = %e, "could not re-read project state; approval left pending");
                return FeedbackResponse::failed(format!("Could not read project state: {e}"));
            }
        };
        let entry = match self.feedback.approve(id, user_action, now) {
            Ok(entry) => entry,
            Err(e) => return FeedbackResponse::failed(e.to_string()),
        };
        self.store.add_event(feedback_event(&entry, now));

        let result = self.execute_decision(&entry.decision, &current, now);
        let detail = if result.success {
            result.output.clone()
        } else {
            result.error.clone()
        };
        self.feedback.record_outcome(
            id,
            Outcome {
                success: result.success,
                detail: detail.clone(),
                recorded_at: now,
            },
        );
        let message = match (result.success, detail) {
            (true, Some(output)) => format!("Approved and executed: {output}"),
            (true, None) => "Approved and executed".to_string(),
            (false, error) => format!(
                "Approved, but execution failed: {}",
                error.unwrap_or_else(|| "unknown error".into())
            ),
        };
        FeedbackResponse {
            success: true,
            message,
            result: Some(result),
        }
    }

    pub fn handle_rejection(&mut self, id: &str, reason: Option<String>, now: DateTime<Utc>) -> FeedbackResponse {
        match self.feedback.reject(id, reason, now) {
            Ok(entry) => {
                self.store.add_event(feedback_event(&entry, now));
                FeedbackResponse {
                    success: true,
                    message: format!("Rejected {}", entry.decision.action),
                    result: None,
                }
            }
            Err(e) => FeedbackResponse::failed(e.to_string()),
        }
    }

    /// Record that the user wanted `corrected_action` instead. The correction
    /// is learned from; it is not executed.
    pub fn handle_correction(
        &mut self,
        id: &str,
        corrected_action: &str,
        user_action: Option<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> FeedbackResponse {
        match self.feedback.correct(id, corrected_action, user_action, reason, now) {
            Ok(entry) => {
                self.store.add_event(feedback_event(&entry, now));
                FeedbackResponse {
                    success: true,
                    message: format!("Corrected {} to {corrected_action}", entry.decision.action),
                    result: None,
                }
            }
            Err(e) => FeedbackResponse::failed(e.to_string()),
        }
    }

    fn emit(&mut self, notification: Notification, out: &mut Vec<Notification>) {
        for subscriber in &mut self.subscribers {
            subscriber(&notification);
        }
        out.push(notification);
    }

    fn decision_cycle(&mut self, trigger: &MonitoringEvent, now: DateTime<Utc>, out: &mut Vec<Notification>) {
        if self
            .processing_decision
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(event = %trigger.event_type, "decision cycle already running; skipped");
            return;
        }
        self.phase = DecisionPhase::Idle;
        self.run_decision(trigger, now, out);
        self.processing_decision.store(false, Ordering::Release);
    }

    fn run_decision(&mut self, trigger: &MonitoringEvent, now: DateTime<Utc>, out: &mut Vec<Notification>) {
        let ctx = match self.build_context(trigger, now) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "could not read project state; no decision this cycle");
                return;
            }
        };
        self.enter(DecisionPhase::Requested);
        self.store.add_event(MonitoringEvent::new(
            EventType::LlmDecisionRequested,
            &trigger.project_path,
            now,
            serde_json::json!({ "trigger": trigger.event_type }),
        ));

        let decision = match self.agent.make_decision(&ctx, Some(&self.feedback)) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "no decision this cycle");
                return;
            }
        };
        self.enter(DecisionPhase::Made);
        if !decision.is_actionable() {
            tracing::debug!(reasoning = %decision.reasoning, "decided to do nothing");
            return;
        }

        // Checks a human cannot override. If these fail there is nothing to ask.
        let gated = decision.with_approval_required();
        let hard = self.executor.preflight(&gated, &ctx, now);
        if !hard.safe {
            tracing::info!(action = %decision.action, reasons = %hard.summary(), "decision blocked");
            let reasons = hard.messages().into_iter().map(str::to_string).collect();
            self.emit(Notification::Blocked { decision, reasons }, out);
            return;
        }

        if !decision.requires_approval {
            let verdict = self.executor.preflight(&decision, &ctx, now);
            if verdict.safe {
                self.enter(DecisionPhase::AutoExecute);
                let result = self.execute_decision(&decision, &ctx, now);
                self.emit(Notification::ActionReady { decision, result }, out);
                return;
            }
            tracing::debug!(
                mode = verdict.failed(SafetyCheck::Mode),
                confidence = verdict.failed(SafetyCheck::Confidence),
                "not auto-executable; asking for approval"
            );
        }

        self.enter(DecisionPhase::ApprovalRequired);
        let id = self.feedback.register(gated.clone(), ctx, now);
        self.store.add_event(MonitoringEvent::new(
            EventType::LlmApprovalRequired,
            &trigger.project_path,
            now,
            serde_json::json!({ "id": id, "decision": gated }),
        ));
        tracing::info!(id = %id, action = %gated.action, confidence = gated.confidence, "approval required");
        self.emit(Notification::ApprovalRequired { id, decision: gated }, out);
    }

    fn enter(&mut self, phase: DecisionPhase) {
        tracing::trace!(from = ?self.phase, to = ?phase, "decision phase");
        self.phase = phase;
    }

    fn build_context(&self, trigger: &MonitoringEvent, now: DateTime<Utc>) -> Result<DecisionContext, GitError> {
        let repo = &trigger.project_path;
        let git = self.executor.git();
        let branch = git.current_branch(repo)?;
        let changes = git.uncommitted_changes(repo)?;
        let last_commit_time = git.recent_commits(repo, 1)?.first().map(|c| c.timestamp);
        let project = ProjectState {
            is_protected: self.config.git.is_protected(&branch),
            is_main: self.config.git.is_main(&branch),
            branch,
            uncommitted_changes: changes.count,
            last_commit_time,
        };
        let recent = self.store.recent_for_project(repo, CONTEXT_EVENTS);
        let hour = now.with_timezone(&Local).hour();
        Ok(DecisionContext::new(
            trigger.clone(),
            project,
            recent,
            self.config.automation.preferences.clone(),
        )
        .at_hour(hour))
    }
}

fn feedback_event(entry: &FeedbackEntry, now: DateTime<Utc>) -> MonitoringEvent {
    MonitoringEvent::new(
        EventType::FeedbackRecorded,
        &entry.project_path,
        now,
        serde_json::json!({
            "id": entry.id,
            "action": entry.decision.action,
            "feedback": entry.feedback.kind.as_str(),
        }),
    )
}
