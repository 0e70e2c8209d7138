use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{EventType, MonitoringEvent};

/// Append-only history with FIFO eviction once `max_events` is reached.
///
/// Insertion order is preserved; milestone and pattern logic depends on it.
#[derive(Debug)]
pub struct EventStore {
    events: VecDeque<MonitoringEvent>,
    max_events: usize,
}

/// Rolling counts grouped by event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total: usize,
    pub last_hour: BTreeMap<EventType, usize>,
    pub last_day: BTreeMap<EventType, usize>,
}

impl EventStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events: max_events.max(1),
        }
    }

    pub fn add_event(&mut self, event: MonitoringEvent) {
        self.events.push_back(event);
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }

    /// The last `n` events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<MonitoringEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// The last `n` events for one project, oldest first.
    pub fn recent_for_project(&self, project: &Path, n: usize) -> Vec<MonitoringEvent> {
        let mut matching: Vec<MonitoringEvent> = self
            .events
            .iter()
            .rev()
            .filter(|e| e.project_path == project)
            .take(n)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    /// Events for `project` with `from <= timestamp <= to`, in insertion order.
    pub fn window(
        &self,
        project: &Path,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<MonitoringEvent> {
        self.events
            .iter()
            .filter(|e| e.project_path == project && e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> EventStats {
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);
        let mut stats = EventStats {
            total: self.events.len(),
            ..Default::default()
        };
        for event in &self.events {
            if event.timestamp > day_ago {
                *stats.last_day.entry(event.event_type).or_default() += 1;
                if event.timestamp > hour_ago {
                    *stats.last_hour.entry(event.event_type).or_default() += 1;
                }
            }
        }
        stats
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn event(kind: EventType, project: &str, minutes_ago: i64, now: DateTime<Utc>) -> MonitoringEvent {
        MonitoringEvent::new(
            kind,
            &PathBuf::from(project),
            now - Duration::minutes(minutes_ago),
            serde_json::json!({}),
        )
    }

    #[test]
    fn evicts_oldest_first() {
        let now = Utc::now();
        let mut store = EventStore::new(3);
        store.add_event(event(EventType::BugFixed, "/a", 4, now));
        store.add_event(event(EventType::TestsPassing, "/a", 3, now));
        store.add_event(event(EventType::DocsUpdated, "/a", 2, now));
        store.add_event(event(EventType::FeatureComplete, "/a", 1, now));

        assert_eq!(store.len(), 3);
        let kinds: Vec<EventType> = store.recent_events(10).iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![EventType::TestsPassing, EventType::DocsUpdated, EventType::FeatureComplete]
        );
    }

    #[test]
    fn recent_events_returns_tail_in_order() {
        let now = Utc::now();
        let mut store = EventStore::new(10);
        for kind in [EventType::BugFixed, EventType::TestsPassing, EventType::DocsUpdated] {
            store.add_event(event(kind, "/a", 0, now));
        }
        let tail = store.recent_events(2);
        assert_eq!(tail[0].event_type, EventType::TestsPassing);
        assert_eq!(tail[1].event_type, EventType::DocsUpdated);
    }

    #[test]
    fn recent_for_project_filters() {
        let now = Utc::now();
        let mut store = EventStore::new(10);
        store.add_event(event(EventType::BugFixed, "/a", 3, now));
        store.add_event(event(EventType::BugFixed, "/b", 2, now));
        store.add_event(event(EventType::TestsPassing, "/a", 1, now));
        let a = store.recent_for_project(Path::new("/a"), 10);
        assert_eq!(a.len(), 2);
        assert_eq!(a[1].event_type, EventType::TestsPassing);
    }

    #[test]
    fn stats_use_rolling_windows() {
        let now = Utc::now();
        let mut store = EventStore::new(10);
        store.add_event(event(EventType::BugFixed, "/a", 5, now));
        store.add_event(event(EventType::BugFixed, "/a", 120, now));
        store.add_event(event(EventType::CommitCreated, "/a", 60 * 30, now));

        let stats = store.stats(now);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.last_hour.get(&EventType::BugFixed), Some(&1));
        assert_eq!(stats.last_day.get(&EventType::BugFixed), Some(&2));
        assert_eq!(stats.last_day.get(&EventType::CommitCreated), None);
    }

    #[test]
    fn clear_empties_store() {
        let mut store = EventStore::new(5);
        store.add_event(event(EventType::BugFixed, "/a", 0, Utc::now()));
        store.clear();
        assert!(store.is_empty());
    }
}
