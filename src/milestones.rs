//! Correlates recent events into higher-level milestones.
//!
//! Detection is a pure function of the triggering event and the window of
//! events that precede it. A rule fires only when the trigger is what makes
//! it true: evaluating the same window without the trigger must fail. That
//! keeps a burst of related events from emitting the same milestone on every
//! arrival.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::events::{EventType, MonitoringEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    FeatureShipped,
    ReleaseReady,
}

impl MilestoneKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MilestoneKind::FeatureShipped => "feature_shipped",
            MilestoneKind::ReleaseReady => "release_ready",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMilestone {
    #[serde(rename = "type")]
    pub kind: MilestoneKind,
    pub timestamp: DateTime<Utc>,
    pub events: Vec<MonitoringEvent>,
    pub title: String,
    pub description: String,
}

const FEATURE_SUPPORT: [EventType; 3] = [
    EventType::TestsPassing,
    EventType::DocsUpdated,
    EventType::BugFixed,
];

struct Rule {
    kind: MilestoneKind,
    holds: fn(&[&MonitoringEvent]) -> bool,
    members: &'static [EventType],
    title: &'static str,
    describe: fn(&[&MonitoringEvent]) -> String,
}

const RULES: &[Rule] = &[
    Rule {
        kind: MilestoneKind::FeatureShipped,
        holds: feature_shipped,
        members: &[
            EventType::FeatureComplete,
            EventType::TestsPassing,
            EventType::DocsUpdated,
            EventType::BugFixed,
        ],
        title: "Feature shipped",
        describe: describe_feature_shipped,
    },
    Rule {
        kind: MilestoneKind::ReleaseReady,
        holds: release_ready,
        members: &[
            EventType::FeatureComplete,
            EventType::BugFixed,
            EventType::TestsPassing,
        ],
        title: "Release ready",
        describe: describe_release_ready,
    },
];

fn count(events: &[&MonitoringEvent], kind: EventType) -> usize {
    events.iter().filter(|e| e.event_type == kind).count()
}

fn feature_shipped(events: &[&MonitoringEvent]) -> bool {
    let supporting = FEATURE_SUPPORT
        .iter()
        .filter(|kind| count(events, **kind) > 0)
        .count();
    count(events, EventType::FeatureComplete) > 0 && supporting >= 2
}

fn release_ready(events: &[&MonitoringEvent]) -> bool {
    let features = count(events, EventType::FeatureComplete);
    features >= 3
        || (features >= 1
            && count(events, EventType::BugFixed) >= 2
            && count(events, EventType::TestsPassing) >= 1)
}

fn describe_feature_shipped(events: &[&MonitoringEvent]) -> String {
    let mut parts = Vec::new();
    if count(events, EventType::TestsPassing) > 0 {
        parts.push("tests passing");
    }
    if count(events, EventType::DocsUpdated) > 0 {
        parts.push("docs updated");
    }
    if count(events, EventType::BugFixed) > 0 {
        parts.push("bugs fixed");
    }
    format!("Feature completed with {}", parts.join(", "))
}

fn describe_release_ready(events: &[&MonitoringEvent]) -> String {
    format!(
        "{} features, {} bug fixes, {} passing test runs in the last few minutes",
        count(events, EventType::FeatureComplete),
        count(events, EventType::BugFixed),
        count(events, EventType::TestsPassing)
    )
}

pub struct MilestoneDetector {
    window: Duration,
}

impl Default for MilestoneDetector {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

impl MilestoneDetector {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Evaluate every rule for `trigger` against `recent`.
    ///
    /// A FEATURE_COMPLETE trigger fires every rule it satisfies. Any other
    /// trigger fires only the rules it newly satisfies, so supporting events
    /// arriving after a milestone do not repeat it.
    ///
    /// `recent` may include the trigger itself and events from other projects
    /// or outside the window; those are filtered here.
    pub fn detect(
        &self,
        trigger: &MonitoringEvent,
        recent: &[MonitoringEvent],
    ) -> Vec<AggregatedMilestone> {
        let from = trigger.timestamp - self.window;
        let trigger_idx = recent.iter().rposition(|e| e == trigger);
        let prior: Vec<&MonitoringEvent> = recent
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != trigger_idx)
            .map(|(_, e)| e)
            .filter(|e| e.project_path == trigger.project_path)
            .filter(|e| e.timestamp >= from && e.timestamp <= trigger.timestamp)
            .collect();
        let mut with_trigger = prior.clone();
        with_trigger.push(trigger);

        RULES
            .iter()
            .filter(|rule| rule.members.contains(&trigger.event_type))
            .filter(|rule| (rule.holds)(&with_trigger))
            .filter(|rule| trigger.event_type == EventType::FeatureComplete || !(rule.holds)(&prior))
            .map(|rule| {
                let events: Vec<MonitoringEvent> = with_trigger
                    .iter()
                    .filter(|e| rule.members.contains(&e.event_type))
                    .map(|e| (*e).clone())
                    .collect();
                AggregatedMilestone {
                    kind: rule.kind,
                    timestamp: trigger.timestamp,
                    title: rule.title.to_string(),
                    description: (rule.describe)(&with_trigger),
                    events,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn at(kind: EventType, t0: DateTime<Utc>, secs: i64) -> MonitoringEvent {
        MonitoringEvent::new(
            kind,
            Path::new("/repo"),
            t0 + Duration::seconds(secs),
            serde_json::json!({}),
        )
    }

    /// Feed events one at a time the way the aggregator does.
    fn replay(events: &[MonitoringEvent]) -> Vec<AggregatedMilestone> {
        let detector = MilestoneDetector::default();
        let mut history: Vec<MonitoringEvent> = Vec::new();
        let mut emitted = Vec::new();
        for event in events {
            history.push(event.clone());
            emitted.extend(detector.detect(event, &history));
        }
        emitted
    }

    #[test]
    fn feature_shipped_after_tests_and_docs() {
        let t0 = Utc::now();
        let events = vec![
            at(EventType::FeatureComplete, t0, 0),
            at(EventType::TestsPassing, t0, 60),
            at(EventType::DocsUpdated, t0, 120),
        ];
        let milestones = replay(&events);
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].kind, MilestoneKind::FeatureShipped);
        assert_eq!(milestones[0].events.len(), 3);
        assert!(milestones[0].description.contains("tests passing"));
    }

    #[test]
    fn feature_shipped_when_feature_arrives_last() {
        let t0 = Utc::now();
        let events = vec![
            at(EventType::BugFixed, t0, 0),
            at(EventType::TestsPassing, t0, 10),
            at(EventType::FeatureComplete, t0, 20),
        ];
        let milestones = replay(&events);
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].kind, MilestoneKind::FeatureShipped);
    }

    #[test]
    fn no_milestone_outside_window() {
        let t0 = Utc::now();
        let events = vec![
            at(EventType::FeatureComplete, t0, 0),
            at(EventType::TestsPassing, t0, 60),
            at(EventType::DocsUpdated, t0, 6 * 60),
        ];
        assert!(replay(&events).is_empty());
    }

    #[test]
    fn extra_support_does_not_refire() {
        let t0 = Utc::now();
        let events = vec![
            at(EventType::FeatureComplete, t0, 0),
            at(EventType::TestsPassing, t0, 10),
            at(EventType::DocsUpdated, t0, 20),
            at(EventType::BugFixed, t0, 30),
        ];
        let shipped: Vec<_> = replay(&events)
            .into_iter()
            .filter(|m| m.kind == MilestoneKind::FeatureShipped)
            .collect();
        assert_eq!(shipped.len(), 1);
    }

    #[test]
    fn another_feature_ships_on_the_same_support() {
        let t0 = Utc::now();
        let detector = MilestoneDetector::default();
        let events = [
            at(EventType::FeatureComplete, t0, 0),
            at(EventType::TestsPassing, t0, 10),
            at(EventType::DocsUpdated, t0, 20),
            at(EventType::FeatureComplete, t0, 50),
        ];
        let mut history = Vec::new();
        let per_event: Vec<Vec<MilestoneKind>> = events
            .iter()
            .map(|event| {
                history.push(event.clone());
                detector.detect(event, &history).iter().map(|m| m.kind).collect()
            })
            .collect();
        assert_eq!(
            per_event,
            vec![
                vec![],
                vec![],
                vec![MilestoneKind::FeatureShipped],
                vec![MilestoneKind::FeatureShipped],
            ]
        );
    }

    #[test]
    fn every_further_feature_is_release_ready() {
        let t0 = Utc::now();
        let events: Vec<MonitoringEvent> = (0..4)
            .map(|i| at(EventType::FeatureComplete, t0, i * 10))
            .collect();
        let released = replay(&events)
            .into_iter()
            .filter(|m| m.kind == MilestoneKind::ReleaseReady)
            .count();
        assert_eq!(released, 2);
    }

    #[test]
    fn release_ready_on_three_features() {
        let t0 = Utc::now();
        let events = vec![
            at(EventType::FeatureComplete, t0, 0),
            at(EventType::FeatureComplete, t0, 10),
            at(EventType::FeatureComplete, t0, 20),
        ];
        let milestones = replay(&events);
        assert_eq!(milestones.len(), 1);
        assert_eq!(milestones[0].kind, MilestoneKind::ReleaseReady);
    }

    #[test]
    fn both_rules_can_fire_for_one_trigger() {
        let t0 = Utc::now();
        let events = vec![
            at(EventType::BugFixed, t0, 0),
            at(EventType::BugFixed, t0, 10),
            at(EventType::TestsPassing, t0, 20),
            at(EventType::FeatureComplete, t0, 30),
        ];
        let milestones = replay(&events);
        let kinds: Vec<MilestoneKind> = milestones.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MilestoneKind::FeatureShipped, MilestoneKind::ReleaseReady]);
    }

    #[test]
    fn other_projects_ignored() {
        let t0 = Utc::now();
        let detector = MilestoneDetector::default();
        let other = MonitoringEvent::new(
            EventType::TestsPassing,
            Path::new("/other"),
            t0,
            serde_json::json!({}),
        );
        let docs = at(EventType::DocsUpdated, t0, 1);
        let trigger = at(EventType::FeatureComplete, t0, 2);
        let history = vec![other, docs, trigger.clone()];
        assert!(detector.detect(&trigger, &history).is_empty());
    }
}
