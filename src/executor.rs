//! Executes gated decisions against git and GitHub.
//!
//! Every call goes through the safety gate first. Results are structured
//! values, never errors: a failed action is a result with `success = false`.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AutomationConfig, Config};
use crate::decision::{DecisionContext, LlmDecision};
use crate::events::{EventType, MonitoringEvent};
use crate::git::{GitCollaborator, GitError, GitHubCollaborator, PullRequest};
use crate::messages;
use crate::safety::{SafetyValidator, SafetyVerdict};

const STASH_MARKER: &str = "gitpilot auto-stash";

/// Git commands that undo an action, run in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub project_path: PathBuf,
    pub steps: Vec<Vec<String>>,
}

impl RollbackInfo {
    fn new(project_path: &Path, steps: &[&[&str]]) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            steps: steps
                .iter()
                .map(|step| step.iter().map(|a| (*a).to_string()).collect())
                .collect(),
        }
    }

    pub fn display(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("git {}", step.join(" ")))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_info: Option<RollbackInfo>,
    pub timestamp: DateTime<Utc>,
}

impl ActionResult {
    fn ok(action: &str, output: String, rollback_info: Option<RollbackInfo>, now: DateTime<Utc>) -> Self {
        Self {
            success: true,
            action: action.to_string(),
            output: Some(output),
            error: None,
            rollback_info,
            timestamp: now,
        }
    }

    fn failed(action: &str, error: String, now: DateTime<Utc>) -> Self {
        Self {
            success: false,
            action: action.to_string(),
            output: None,
            error: Some(error),
            rollback_info: None,
            timestamp: now,
        }
    }

    /// The LLM_ACTION_EXECUTED / LLM_ACTION_FAILED event for this result.
    pub fn to_event(&self, project: &Path) -> MonitoringEvent {
        let kind = if self.success {
            EventType::LlmActionExecuted
        } else {
            EventType::LlmActionFailed
        };
        let data = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        MonitoringEvent::new(kind, project, self.timestamp, data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("action '{0}' is not reversible")]
    NotReversible(String),

    #[error("rollback step `{step}` failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: GitError,
    },
}

pub struct ActionExecutor {
    git: Rc<dyn GitCollaborator>,
    github: Rc<dyn GitHubCollaborator>,
    validator: SafetyValidator,
    automation: AutomationConfig,
    main_branch: String,
    history: Vec<ActionResult>,
}

impl ActionExecutor {
    pub fn new(
        config: &Config,
        git: Rc<dyn GitCollaborator>,
        github: Rc<dyn GitHubCollaborator>,
        validator: SafetyValidator,
    ) -> Self {
        Self {
            git,
            github,
            validator,
            automation: config.automation.clone(),
            main_branch: config.git.main_branch.clone(),
            history: Vec::new(),
        }
    }

    pub fn git(&self) -> &dyn GitCollaborator {
        self.git.as_ref()
    }

    pub fn history(&self) -> &[ActionResult] {
        &self.history
    }

    /// Times of successful executions, oldest first.
    pub fn executed_at(&self) -> Vec<DateTime<Utc>> {
        self.history
            .iter()
            .filter(|r| r.success)
            .map(|r| r.timestamp)
            .collect()
    }

    /// The verdict `execute_decision` would reach if called now.
    pub fn preflight(&self, decision: &LlmDecision, ctx: &DecisionContext, now: DateTime<Utc>) -> SafetyVerdict {
        self.validator
            .validate(&self.automation, decision, ctx, &self.executed_at(), now)
    }

    /// Validate, then run the decision's action in the trigger's project.
    pub fn execute_decision(
        &mut self,
        decision: &LlmDecision,
        ctx: &DecisionContext,
        now: DateTime<Utc>,
    ) -> ActionResult {
        let verdict = self.preflight(decision, ctx, now);

        let result = if verdict.safe {
            let repo = ctx.trigger.project_path.clone();
            self.dispatch(decision, ctx, &repo, now)
                .unwrap_or_else(|e| ActionResult::failed(&decision.action, e, now))
        } else {
            ActionResult::failed(
                &decision.action,
                format!("Safety check failed: {}", verdict.summary()),
                now,
            )
        };

        if result.success {
            tracing::info!(action = %result.action, output = ?result.output, "action executed");
        } else {
            tracing::warn!(action = %result.action, error = ?result.error, "action failed");
        }
        self.history.push(result.clone());
        result
    }

    fn dispatch(
        &self,
        decision: &LlmDecision,
        ctx: &DecisionContext,
        repo: &Path,
        now: DateTime<Utc>,
    ) -> Result<ActionResult, String> {
        let action = decision.action.as_str();
        let git_err = |e: GitError| e.to_string();
        match action {
            "commit" | "checkpoint" => {
                let changes = self.git.uncommitted_changes(repo).map_err(git_err)?;
                if changes.count == 0 {
                    return Err("Nothing to commit".to_string());
                }
                let message = if action == "checkpoint" {
                    messages::checkpoint_message(&changes.files)
                } else {
                    messages::commit_message(
                        &changes.files,
                        &self.automation.preferences.commit_style,
                        Some(ctx.trigger.event_type),
                    )
                };
                self.git.stage_all(repo).map_err(git_err)?;
                let head = self.git.commit_changes(repo, &message).map_err(git_err)?;
                let short: String = head.chars().take(7).collect();
                Ok(ActionResult::ok(
                    action,
                    format!("Committed {short}: {message}"),
                    Some(RollbackInfo::new(repo, &[&["reset", "--soft", "HEAD~1"]])),
                    now,
                ))
            }
            "branch" => {
                let previous = self.git.current_branch(repo).map_err(git_err)?;
                let changes = self.git.uncommitted_changes(repo).map_err(git_err)?;
                let name = messages::branch_name(
                    &self.automation.preferences.branch_prefix,
                    &ctx.trigger,
                    &changes.files,
                    now,
                );
                self.git.create_branch(repo, &name).map_err(git_err)?;
                Ok(ActionResult::ok(
                    action,
                    format!("Created branch {name} from {previous}"),
                    Some(RollbackInfo::new(
                        repo,
                        &[&["checkout", previous.as_str()], &["branch", "-D", name.as_str()]],
                    )),
                    now,
                ))
            }
            "pr" => {
                let branch = self.git.current_branch(repo).map_err(git_err)?;
                self.git.push_branch(repo, &branch).map_err(git_err)?;
                let pr = PullRequest {
                    title: messages::pr_title(&branch, &self.automation.preferences.branch_prefix),
                    body: decision.reasoning.clone(),
                    base: self.main_branch.clone(),
                    head: branch,
                };
                let url = self.github.create_pull_request(repo, &pr).map_err(git_err)?;
                // Pushed commits and an open PR cannot be taken back.
                Ok(ActionResult::ok(action, format!("Opened {url}"), None, now))
            }
            "stash" => {
                let message = format!("{STASH_MARKER} {}", now.format("%Y-%m-%dT%H:%M:%SZ"));
                self.git.stash(repo, &message).map_err(git_err)?;
                Ok(ActionResult::ok(
                    action,
                    format!("Stashed changes as '{message}'"),
                    Some(RollbackInfo::new(repo, &[&["stash", "pop"]])),
                    now,
                ))
            }
            other => Err(format!("Unknown action: {other}")),
        }
    }

    /// Replay the rollback steps of `result`, stopping at the first failure.
    pub fn try_rollback(&self, result: &ActionResult) -> Result<(), RollbackError> {
        let info = result
            .rollback_info
            .as_ref()
            .ok_or_else(|| RollbackError::NotReversible(result.action.clone()))?;
        for step in &info.steps {
            self.git
                .run(&info.project_path, step)
                .map_err(|source| RollbackError::StepFailed {
                    step: format!("git {}", step.join(" ")),
                    source,
                })?;
        }
        tracing::info!(action = %result.action, rollback = %info.display(), "rolled back");
        Ok(())
    }

    /// Like [`try_rollback`](Self::try_rollback), but logs instead of returning the error.
    pub fn rollback(&self, result: &ActionResult) -> bool {
        match self.try_rollback(result) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(action = %result.action, error = %e, "rollback failed");
                false
            }
        }
    }
}
