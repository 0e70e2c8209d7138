//! Commit message and branch name generation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::events::{EventType, MonitoringEvent};
use crate::patterns::files::{self, ChangeSummary, FileKind};
use crate::patterns::FileChange;

const MAX_SLUG: usize = 40;

/// Conventional-commit type for a change set.
fn commit_type(changes: &[FileChange], trigger: Option<EventType>) -> &'static str {
    if trigger == Some(EventType::BugFixed) {
        return "fix";
    }
    let summary = ChangeSummary::from_changes(changes);
    let total = changes.len();
    if total > 0 && summary.tests == total {
        "test"
    } else if total > 0 && summary.docs == total {
        "docs"
    } else if summary.source == 0 && summary.config > 0 {
        "chore"
    } else if trigger == Some(EventType::RefactorDone) {
        "refactor"
    } else if changes
        .iter()
        .any(|c| c.is_new() && files::classify(&c.path) == FileKind::Source)
    {
        "feat"
    } else {
        "chore"
    }
}

/// Shared top-level directory of every change, if there is one.
fn common_scope(changes: &[FileChange]) -> Option<String> {
    let tops: BTreeSet<&str> = changes
        .iter()
        .filter_map(|c| c.path.split_once('/').map(|(top, _)| top))
        .collect();
    let all_nested = changes.iter().all(|c| c.path.contains('/'));
    match (tops.len(), all_nested) {
        (1, true) => tops.into_iter().next().map(String::from),
        _ => None,
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("1 {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Build a commit message for `changes`.
///
/// `style` is either `conventional` (`type(scope): subject`) or anything
/// else for a plain sentence.
pub fn commit_message(changes: &[FileChange], style: &str, trigger: Option<EventType>) -> String {
    let summary = ChangeSummary::from_changes(changes);
    let mut parts = Vec::new();
    if summary.added > 0 {
        parts.push(format!("add {}", plural(summary.added, "file")));
    }
    if summary.modified > 0 {
        parts.push(format!("update {}", plural(summary.modified, "file")));
    }
    if summary.deleted > 0 {
        parts.push(format!("remove {}", plural(summary.deleted, "file")));
    }
    let subject = if parts.is_empty() {
        "update project".to_string()
    } else {
        parts.join(", ")
    };

    if style != "conventional" {
        let mut chars = subject.chars();
        return chars
            .next()
            .map(|c| c.to_uppercase().chain(chars).collect())
            .unwrap_or(subject);
    }

    let kind = commit_type(changes, trigger);
    match common_scope(changes) {
        Some(scope) => format!("{kind}({scope}): {subject}"),
        None => format!("{kind}: {subject}"),
    }
}

pub fn checkpoint_message(changes: &[FileChange]) -> String {
    format!("chore: checkpoint work in progress ({})", plural(changes.len(), "file"))
}

fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= MAX_SLUG {
            break;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Branch name for work described by `trigger` and `changes`.
///
/// Prefers the conversation text that triggered the decision, then the
/// first new file, then a timestamp.
pub fn branch_name(
    prefix: &str,
    trigger: &MonitoringEvent,
    changes: &[FileChange],
    now: DateTime<Utc>,
) -> String {
    let from_message = trigger
        .data
        .get("message")
        .and_then(|m| m.as_str())
        .map(slugify)
        .filter(|s| !s.is_empty());
    let from_file = || {
        changes
            .iter()
            .find(|c| c.is_new())
            .and_then(|c| c.path.rsplit('/').next())
            .map(|name| name.split('.').next().unwrap_or(name))
            .map(slugify)
            .filter(|s| !s.is_empty())
    };
    let slug = from_message
        .or_else(from_file)
        .unwrap_or_else(|| format!("work-{}", now.format("%Y%m%d-%H%M")));
    format!("{prefix}{slug}")
}

pub fn pr_title(branch: &str, prefix: &str) -> String {
    let name = branch.strip_prefix(prefix).unwrap_or(branch);
    let words = name.replace(['-', '_', '/'], " ");
    let mut chars = words.trim().chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_else(|| branch.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::patterns::ChangeStatus;

    fn change(path: &str, status: ChangeStatus) -> FileChange {
        FileChange::new(path, status)
    }

    #[test]
    fn conventional_feature_commit_with_scope() {
        let changes = vec![
            change("src/parser.rs", ChangeStatus::Added),
            change("src/lib.rs", ChangeStatus::Modified),
        ];
        assert_eq!(
            commit_message(&changes, "conventional", None),
            "feat(src): add 1 file, update 1 file"
        );
    }

    #[test]
    fn docs_only_commit() {
        let changes = vec![
            change("README.md", ChangeStatus::Modified),
            change("docs/setup.md", ChangeStatus::Modified),
        ];
        assert_eq!(
            commit_message(&changes, "conventional", None),
            "docs: update 2 files"
        );
    }

    #[test]
    fn bug_fix_trigger_wins() {
        let changes = vec![change("src/a.rs", ChangeStatus::Modified)];
        assert!(commit_message(&changes, "conventional", Some(EventType::BugFixed)).starts_with("fix(src):"));
    }

    #[test]
    fn plain_style() {
        let changes = vec![change("a.rs", ChangeStatus::Deleted)];
        assert_eq!(commit_message(&changes, "plain", None), "Remove 1 file");
    }

    #[test]
    fn branch_from_conversation_text() {
        let trigger = MonitoringEvent::new(
            EventType::FeatureComplete,
            Path::new("/repo"),
            Utc::now(),
            serde_json::json!({"message": "Login form is done!"}),
        );
        assert_eq!(
            branch_name("feature/", &trigger, &[], Utc::now()),
            "feature/login-form-is-done"
        );
    }

    #[test]
    fn branch_from_new_file_then_timestamp() {
        let trigger = MonitoringEvent::new(
            EventType::UncommittedChanges,
            Path::new("/repo"),
            Utc::now(),
            serde_json::json!({}),
        );
        let changes = vec![change("src/components/NavBar.tsx", ChangeStatus::Untracked)];
        assert_eq!(branch_name("feature/", &trigger, &changes, Utc::now()), "feature/navbar");

        let now = DateTime::parse_from_rfc3339("2024-05-01T13:45:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(branch_name("wip/", &trigger, &[], now), "wip/work-20240501-1345");
    }

    #[test]
    fn slug_is_bounded() {
        let long = "a very long sentence that keeps going well past any sensible branch name length";
        assert!(slugify(long).len() <= MAX_SLUG);
        assert!(!slugify(long).ends_with('-'));
    }

    #[test]
    fn pr_title_from_branch() {
        assert_eq!(pr_title("feature/login-form", "feature/"), "Login form");
    }
}
