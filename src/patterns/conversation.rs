//! Recognizes workflow signals in free-form conversation text.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::events::{EventType, MonitoringEvent};

struct Pattern {
    kind: EventType,
    regex: Regex,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(EventType, &str)] = &[
            (
                EventType::FeatureComplete,
                r"(?i)\b(feature|implementation|functionality)\b.{0,30}\b(is\s+)?(done|complete|completed|finished|ready|working)\b",
            ),
            (
                EventType::FeatureComplete,
                r"(?i)\b(finished|completed|implemented)\b.{0,20}\b(the\s+)?(feature|implementation|endpoint|component)\b",
            ),
            (
                EventType::BugFixed,
                r"(?i)\b(fixed|resolved|squashed)\b.{0,20}\b(bug|issue|crash|regression|error)s?\b",
            ),
            (
                EventType::BugFixed,
                r"(?i)\b(bug|issue|crash|regression)s?\b.{0,20}\b(is\s+|are\s+)?(fixed|resolved)\b",
            ),
            (
                EventType::TestsPassing,
                r"(?i)\b(all\s+)?tests?\b.{0,20}\b(are\s+|is\s+)?(passing|pass|passed|green)\b",
            ),
            (EventType::TestsPassing, r"(?i)\b(ci|build)\s+is\s+green\b"),
            (
                EventType::DocsUpdated,
                r"(?i)\b(updated|wrote|added|documented)\b.{0,20}\b(docs|documentation|readme|changelog)\b",
            ),
            (
                EventType::DocsUpdated,
                r"(?i)\b(docs|documentation|readme)\b.{0,20}\b(is\s+|are\s+)?(updated|done)\b",
            ),
            (
                EventType::RefactorDone,
                r"(?i)\b(refactor|refactoring|cleanup|clean-up)\b.{0,20}\b(is\s+)?(done|complete|finished)\b",
            ),
            (
                EventType::ReleaseRequested,
                r"(?i)\b(ready\s+(to|for)\s+(release|ship|deploy)|ship\s+it|cut\s+a\s+release)\b",
            ),
        ];
        table
            .iter()
            .filter_map(|(kind, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some(Pattern { kind: *kind, regex }),
                Err(e) => {
                    tracing::error!(%pattern, error = %e, "invalid conversation pattern");
                    None
                }
            })
            .collect()
    })
}

/// Scan `text` and return one event per distinct signal found, in table order.
pub fn match_message(text: &str, project: &Path, now: DateTime<Utc>) -> Vec<MonitoringEvent> {
    let mut seen: Vec<EventType> = Vec::new();
    let mut events = Vec::new();
    for pattern in patterns() {
        if seen.contains(&pattern.kind) {
            continue;
        }
        if let Some(m) = pattern.regex.find(text) {
            seen.push(pattern.kind);
            events.push(MonitoringEvent::new(
                pattern.kind,
                project,
                now,
                serde_json::json!({
                    "message": text,
                    "matched": m.as_str(),
                }),
            ));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<EventType> {
        match_message(text, Path::new("/repo"), Utc::now())
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[test]
    fn recognizes_feature_complete() {
        assert_eq!(kinds("The login feature is done"), vec![EventType::FeatureComplete]);
        assert_eq!(kinds("I finished the endpoint"), vec![EventType::FeatureComplete]);
    }

    #[test]
    fn recognizes_multiple_signals_in_one_message() {
        let found = kinds("Fixed the bug, all tests are passing and I updated the README");
        assert!(found.contains(&EventType::BugFixed));
        assert!(found.contains(&EventType::TestsPassing));
        assert!(found.contains(&EventType::DocsUpdated));
    }

    #[test]
    fn one_event_per_kind() {
        let found = kinds("fixed a bug, and the crash is resolved too");
        assert_eq!(found, vec![EventType::BugFixed]);
    }

    #[test]
    fn release_phrases() {
        assert_eq!(kinds("I think we're ready to release"), vec![EventType::ReleaseRequested]);
        assert_eq!(kinds("ship it!"), vec![EventType::ReleaseRequested]);
    }

    #[test]
    fn ignores_unrelated_chat() {
        assert!(kinds("what should we have for lunch?").is_empty());
    }

    #[test]
    fn payload_keeps_matched_text() {
        let events = match_message("CI is green", Path::new("/repo"), Utc::now());
        assert_eq!(events[0].data["matched"], "CI is green");
    }
}
