//! Rule-based suggestions derived from single events.
//!
//! Independent of the decision pipeline: suggestions keep flowing when
//! automation is disabled or the provider is unreachable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::SuggestionConfig;
use crate::events::{EventType, MonitoringEvent};
use crate::patterns::files::{self, ChangeSummary};
use crate::patterns::{BranchPayload, ChangeSetPayload};

/// Ordered so that sorting puts `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    High,
    Medium,
    Low,
}

impl SuggestionPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionPriority::High => "high",
            SuggestionPriority::Medium => "medium",
            SuggestionPriority::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Branch,
    Commit,
    AtomicCommits,
    Checkpoint,
    Positive,
    Pr,
}

impl SuggestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionKind::Branch => "branch",
            SuggestionKind::Commit => "commit",
            SuggestionKind::AtomicCommits => "atomic_commits",
            SuggestionKind::Checkpoint => "checkpoint",
            SuggestionKind::Positive => "positive",
            SuggestionKind::Pr => "pr",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSuggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub priority: SuggestionPriority,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub related_events: Vec<EventType>,
}

impl MonitoringSuggestion {
    fn new(kind: SuggestionKind, priority: SuggestionPriority, message: String) -> Self {
        Self {
            kind,
            priority,
            message,
            action: None,
            reason: None,
            related_events: Vec::new(),
        }
    }

    fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Per-project timing state the duration rules depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkContext {
    pub session_start: Option<DateTime<Utc>>,
    pub uncommitted_since: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
}

pub struct SuggestionGenerator {
    config: SuggestionConfig,
    cooldowns: HashMap<(EventType, PathBuf), DateTime<Utc>>,
    contexts: HashMap<PathBuf, WorkContext>,
}

impl SuggestionGenerator {
    pub fn new(config: SuggestionConfig) -> Self {
        Self {
            config,
            cooldowns: HashMap::new(),
            contexts: HashMap::new(),
        }
    }

    pub fn work_context(&self, project: &Path) -> Option<&WorkContext> {
        self.contexts.get(project)
    }

    fn cooldown(&self) -> Duration {
        Duration::minutes(self.config.cooldown_minutes)
    }

    /// Produce at most one suggestion for `event`, the highest-priority
    /// candidate, unless the (event type, project) pair is cooling down.
    pub fn generate(
        &mut self,
        event: &MonitoringEvent,
        now: DateTime<Utc>,
    ) -> Option<MonitoringSuggestion> {
        if !self.config.enabled {
            return None;
        }
        self.track(event);
        self.prune(now);

        let key = (event.event_type, event.project_path.clone());
        if let Some(last) = self.cooldowns.get(&key)
            && now - *last < self.cooldown()
        {
            tracing::debug!(
                event = %event.event_type,
                project = %event.project_path.display(),
                "suggestion suppressed by cooldown"
            );
            return None;
        }

        let suggestion = self.candidates(event, now).into_iter().next()?;
        self.cooldowns.insert(key, now);
        Some(suggestion)
    }

    /// Every rule that matches `event`, sorted by priority (stable).
    pub fn candidates(&self, event: &MonitoringEvent, now: DateTime<Utc>) -> Vec<MonitoringSuggestion> {
        let mut out = match event.event_type {
            EventType::UncommittedChanges => event
                .payload::<ChangeSetPayload>()
                .map(|p| self.uncommitted_rules(&p, &event.project_path, now))
                .unwrap_or_default(),
            EventType::FilesAdded => event
                .payload::<ChangeSetPayload>()
                .map(|p| new_file_rules(&p))
                .unwrap_or_default(),
            EventType::WorkingDirectoryClean => event
                .payload::<BranchPayload>()
                .map(|p| clean_rules(&p))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        for suggestion in &mut out {
            suggestion.related_events.push(event.event_type);
        }
        out.sort_by_key(|s| s.priority);
        out
    }

    fn track(&mut self, event: &MonitoringEvent) {
        let ctx = self.contexts.entry(event.project_path.clone()).or_default();
        ctx.session_start.get_or_insert(event.timestamp);
        match event.event_type {
            EventType::UncommittedChanges => {
                ctx.uncommitted_since.get_or_insert(event.timestamp);
            }
            EventType::CommitCreated => {
                ctx.last_commit = Some(event.timestamp);
                ctx.uncommitted_since = None;
            }
            EventType::WorkingDirectoryClean => {
                ctx.uncommitted_since = None;
            }
            _ => {}
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown();
        self.cooldowns.retain(|_, last| now - *last < cooldown);
    }

    fn uncommitted_rules(
        &self,
        payload: &ChangeSetPayload,
        project: &Path,
        now: DateTime<Utc>,
    ) -> Vec<MonitoringSuggestion> {
        let mut out = Vec::new();
        let count = payload.file_count;

        if payload.is_protected && count > 0 {
            out.push(
                MonitoringSuggestion::new(
                    SuggestionKind::Branch,
                    SuggestionPriority::High,
                    format!(
                        "You have {count} uncommitted changes on protected branch '{}'. Create a feature branch before committing.",
                        payload.branch
                    ),
                )
                .with_action("create_branch")
                .with_reason("protected branches should only change through reviewed merges"),
            );
        }

        if count >= self.config.uncommitted_file_threshold {
            out.push(
                MonitoringSuggestion::new(
                    SuggestionKind::Commit,
                    SuggestionPriority::Medium,
                    format!("You have {count} uncommitted files. Consider committing your progress."),
                )
                .with_action("commit"),
            );
        }

        let summary = ChangeSummary::from_changes(&payload.files);
        if summary.is_mixed() {
            out.push(
                MonitoringSuggestion::new(
                    SuggestionKind::AtomicCommits,
                    SuggestionPriority::Medium,
                    format!(
                        "This change set has {} added, {} modified and {} deleted files. Consider splitting it into atomic commits.",
                        summary.added, summary.modified, summary.deleted
                    ),
                )
                .with_action("split_commits"),
            );
        }

        if let Some(since) = self.contexts.get(project).and_then(|c| c.uncommitted_since) {
            let minutes = (now - since).num_minutes();
            if minutes > self.config.warning_minutes {
                out.push(
                    MonitoringSuggestion::new(
                        SuggestionKind::Checkpoint,
                        SuggestionPriority::High,
                        format!("Changes have been uncommitted for {minutes} minutes. Create a checkpoint commit now."),
                    )
                    .with_action("checkpoint"),
                );
            } else if minutes > self.config.reminder_minutes {
                out.push(
                    MonitoringSuggestion::new(
                        SuggestionKind::Checkpoint,
                        SuggestionPriority::Medium,
                        format!("Changes have been uncommitted for {minutes} minutes. Consider a checkpoint commit."),
                    )
                    .with_action("checkpoint"),
                );
            }
        }

        if summary.has_tests_and_code() {
            out.push(MonitoringSuggestion::new(
                SuggestionKind::Positive,
                SuggestionPriority::Low,
                "Tests are changing alongside the implementation. Nice.".to_string(),
            ));
        }
        if summary.has_docs_and_code() {
            out.push(MonitoringSuggestion::new(
                SuggestionKind::Positive,
                SuggestionPriority::Low,
                "Docs are being updated with the code. Keep it up.".to_string(),
            ));
        }

        out
    }
}

fn new_file_rules(payload: &ChangeSetPayload) -> Vec<MonitoringSuggestion> {
    if !payload.is_main {
        return Vec::new();
    }
    let Some(feature_file) = payload
        .files
        .iter()
        .filter(|f| f.is_new())
        .find(|f| files::is_feature_path(&f.path))
    else {
        return Vec::new();
    };
    vec![
        MonitoringSuggestion::new(
            SuggestionKind::Branch,
            SuggestionPriority::High,
            format!(
                "New feature file '{}' created on '{}'. Start a feature branch for this work.",
                feature_file.path, payload.branch
            ),
        )
        .with_action("create_branch"),
    ]
}

fn clean_rules(payload: &BranchPayload) -> Vec<MonitoringSuggestion> {
    if payload.is_protected || payload.is_main {
        return Vec::new();
    }
    vec![
        MonitoringSuggestion::new(
            SuggestionKind::Pr,
            SuggestionPriority::Medium,
            format!(
                "Working directory is clean on '{}'. Ready to open a pull request?",
                payload.branch
            ),
        )
        .with_action("create_pr"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::{ChangeStatus, FileChange};

    fn uncommitted(
        branch: &str,
        protected: bool,
        files: &[(&str, ChangeStatus)],
        at: DateTime<Utc>,
    ) -> MonitoringEvent {
        let files: Vec<FileChange> = files.iter().map(|(p, s)| FileChange::new(p, *s)).collect();
        let payload = ChangeSetPayload {
            branch: branch.to_string(),
            is_protected: protected,
            is_main: branch == "main",
            file_count: files.len(),
            files,
        };
        MonitoringEvent::new(
            EventType::UncommittedChanges,
            Path::new("/repo"),
            at,
            serde_json::to_value(payload).unwrap(),
        )
    }

    fn modified(n: usize) -> Vec<(String, ChangeStatus)> {
        (0..n)
            .map(|i| (format!("src/file{i}.rs"), ChangeStatus::Modified))
            .collect()
    }

    fn as_refs(files: &[(String, ChangeStatus)]) -> Vec<(&str, ChangeStatus)> {
        files.iter().map(|(p, s)| (p.as_str(), *s)).collect()
    }

    #[test]
    fn commit_suggestion_over_threshold() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let now = Utc::now();
        let files = modified(7);
        let event = uncommitted("feature/x", false, &as_refs(&files), now);
        let suggestion = generator.generate(&event, now).unwrap();
        assert_eq!(suggestion.kind.as_str(), "commit");
        assert_eq!(suggestion.priority, SuggestionPriority::Medium);
        assert!(suggestion.message.contains("7 uncommitted files"));
    }

    #[test]
    fn cooldown_suppresses_within_ten_minutes() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let t0 = Utc::now();
        let files = modified(7);
        let refs = as_refs(&files);

        assert!(generator.generate(&uncommitted("feature/x", false, &refs, t0), t0).is_some());

        let t9 = t0 + Duration::minutes(9);
        assert!(generator.generate(&uncommitted("feature/x", false, &refs, t9), t9).is_none());

        let t11 = t0 + Duration::minutes(11);
        assert!(generator.generate(&uncommitted("feature/x", false, &refs, t11), t11).is_some());
    }

    #[test]
    fn cooldown_is_per_project() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let now = Utc::now();
        let files = modified(6);
        let refs = as_refs(&files);
        let first = uncommitted("feature/x", false, &refs, now);
        let mut other = first.clone();
        other.project_path = PathBuf::from("/other");
        assert!(generator.generate(&first, now).is_some());
        assert!(generator.generate(&other, now).is_some());
    }

    #[test]
    fn protected_branch_warning_wins() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let now = Utc::now();
        let files = modified(7);
        let event = uncommitted("main", true, &as_refs(&files), now);
        let suggestion = generator.generate(&event, now).unwrap();
        assert_eq!(suggestion.kind, SuggestionKind::Branch);
        assert_eq!(suggestion.priority, SuggestionPriority::High);
        assert!(suggestion.message.contains("protected branch 'main'"));
    }

    #[test]
    fn candidates_sorted_by_priority() {
        let generator = SuggestionGenerator::new(SuggestionConfig::default());
        let now = Utc::now();
        let event = uncommitted(
            "main",
            true,
            &[
                ("src/a.rs", ChangeStatus::Added),
                ("src/b.rs", ChangeStatus::Modified),
                ("src/c.rs", ChangeStatus::Deleted),
                ("tests/a.rs", ChangeStatus::Modified),
                ("src/d.rs", ChangeStatus::Modified),
            ],
            now,
        );
        let priorities: Vec<SuggestionPriority> =
            generator.candidates(&event, now).iter().map(|s| s.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
        assert_eq!(priorities.first(), Some(&SuggestionPriority::High));
        assert_eq!(priorities.last(), Some(&SuggestionPriority::Low));
    }

    #[test]
    fn long_uncommitted_work_gets_checkpoint() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let t0 = Utc::now();
        let files = [("src/a.rs", ChangeStatus::Modified)];
        // First sighting starts the clock.
        let _ = generator.generate(&uncommitted("feature/x", false, &files, t0), t0);

        let later = t0 + Duration::minutes(75);
        let reminder = generator
            .generate(&uncommitted("feature/x", false, &files, later), later)
            .unwrap();
        assert_eq!(reminder.kind, SuggestionKind::Checkpoint);
        assert_eq!(reminder.priority, SuggestionPriority::Medium);

        let much_later = t0 + Duration::minutes(130);
        let warning = generator
            .generate(&uncommitted("feature/x", false, &files, much_later), much_later)
            .unwrap();
        assert_eq!(warning.priority, SuggestionPriority::High);
        assert!(warning.message.contains("130 minutes"));
    }

    #[test]
    fn commit_resets_uncommitted_clock() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let t0 = Utc::now();
        let files = [("src/a.rs", ChangeStatus::Modified)];
        let _ = generator.generate(&uncommitted("feature/x", false, &files, t0), t0);
        let commit = MonitoringEvent::new(
            EventType::CommitCreated,
            Path::new("/repo"),
            t0 + Duration::minutes(30),
            serde_json::json!({}),
        );
        let _ = generator.generate(&commit, commit.timestamp);
        let ctx = generator.work_context(Path::new("/repo")).unwrap();
        assert!(ctx.uncommitted_since.is_none());
        assert_eq!(ctx.last_commit, Some(commit.timestamp));
    }

    #[test]
    fn feature_file_on_main_suggests_branch() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let now = Utc::now();
        let payload = ChangeSetPayload {
            branch: "main".into(),
            is_protected: false,
            is_main: true,
            file_count: 1,
            files: vec![FileChange::new("src/components/Nav.tsx", ChangeStatus::Untracked)],
        };
        let event = MonitoringEvent::new(
            EventType::FilesAdded,
            Path::new("/repo"),
            now,
            serde_json::to_value(payload).unwrap(),
        );
        let suggestion = generator.generate(&event, now).unwrap();
        assert_eq!(suggestion.kind, SuggestionKind::Branch);
        assert_eq!(suggestion.priority, SuggestionPriority::High);
    }

    #[test]
    fn clean_feature_branch_suggests_pr() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig::default());
        let now = Utc::now();
        let payload = BranchPayload {
            branch: "feature/login".into(),
            previous_branch: None,
            is_protected: false,
            is_main: false,
            head: Some("abc".into()),
        };
        let event = MonitoringEvent::new(
            EventType::WorkingDirectoryClean,
            Path::new("/repo"),
            now,
            serde_json::to_value(payload).unwrap(),
        );
        let suggestion = generator.generate(&event, now).unwrap();
        assert_eq!(suggestion.kind, SuggestionKind::Pr);
        assert_eq!(suggestion.priority, SuggestionPriority::Medium);
    }

    #[test]
    fn disabled_generator_is_silent() {
        let mut generator = SuggestionGenerator::new(SuggestionConfig {
            enabled: false,
            ..Default::default()
        });
        let now = Utc::now();
        let files = modified(9);
        assert!(generator
            .generate(&uncommitted("feature/x", false, &as_refs(&files), now), now)
            .is_none());
    }
}
