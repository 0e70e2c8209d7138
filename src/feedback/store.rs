use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{FeedbackEntry, FeedbackError, FeedbackKind, Outcome};
use crate::events::EventType;

/// Feedback history backed by one JSON file.
///
/// The file is read whole on open and rewritten whole on every mutation.
/// Write failures are logged and the in-memory copy keeps serving reads.
pub struct FeedbackStore {
    path: Option<PathBuf>,
    entries: Vec<FeedbackEntry>,
    max_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub by_type: BTreeMap<FeedbackKind, usize>,
    pub approval_rate: f64,
    pub action_approval_rates: BTreeMap<String, f64>,
    pub recent: Vec<FeedbackEntry>,
}

const RECENT_IN_STATS: usize = 5;

impl FeedbackStore {
    /// Load `path`, starting empty when it is missing or unreadable.
    pub fn open(path: &Path, max_entries: usize) -> Self {
        let entries = match Self::load(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "starting with empty feedback history");
                Vec::new()
            }
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "feedback store opened");
        let mut store = Self {
            path: Some(path.to_path_buf()),
            entries,
            max_entries,
        };
        store.trim();
        store
    }

    /// A store that never touches disk.
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            max_entries,
        }
    }

    fn load(path: &Path) -> Result<Vec<FeedbackEntry>, FeedbackError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path).map_err(|source| FeedbackError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(|source| FeedbackError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&FeedbackEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Append one entry. An id can be recorded only once.
    pub fn record(&mut self, entry: FeedbackEntry) -> Result<(), FeedbackError> {
        if self.get(&entry.id).is_some() {
            return Err(FeedbackError::Duplicate(entry.id));
        }
        self.entries.push(entry);
        self.trim();
        self.save();
        Ok(())
    }

    pub fn update_outcome(&mut self, id: &str, outcome: Outcome) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        entry.outcome = Some(outcome);
        self.save();
        true
    }

    /// Entries for the same project, branch and trigger type.
    pub fn similar(&self, project: &Path, branch: &str, trigger: EventType) -> Vec<&FeedbackEntry> {
        self.entries
            .iter()
            .filter(|e| e.project_path == project)
            .filter(|e| e.context.project.branch == branch)
            .filter(|e| e.context.trigger.event_type == trigger)
            .collect()
    }

    pub fn for_project(&self, project: &Path) -> Vec<&FeedbackEntry> {
        self.entries.iter().filter(|e| e.project_path == project).collect()
    }

    pub fn recent(&self, n: usize) -> Vec<&FeedbackEntry> {
        let mut sorted: Vec<&FeedbackEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted.truncate(n);
        sorted
    }

    pub fn stats(&self) -> FeedbackStats {
        let mut by_type = BTreeMap::new();
        let mut per_action: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for entry in &self.entries {
            *by_type.entry(entry.feedback.kind).or_insert(0) += 1;
            let slot = per_action.entry(entry.decision.action.clone()).or_insert((0, 0));
            slot.1 += 1;
            if entry.feedback.kind.is_approval() {
                slot.0 += 1;
            }
        }
        let approvals: usize = per_action.values().map(|(a, _)| a).sum();
        FeedbackStats {
            total: self.entries.len(),
            by_type,
            approval_rate: ratio(approvals, self.entries.len()),
            action_approval_rates: per_action
                .into_iter()
                .map(|(action, (approved, total))| (action, ratio(approved, total)))
                .collect(),
            recent: self.recent(RECENT_IN_STATS).into_iter().cloned().collect(),
        }
    }

    /// Drop the oldest entries (by timestamp) beyond the cap.
    fn trim(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        self.entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let excess = self.entries.len() - self.max_entries;
        self.entries.drain(..excess);
    }

    fn save(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        if let Err(e) = self.write(path) {
            tracing::warn!(error = %e, "feedback not persisted");
        }
    }

    fn write(&self, path: &Path) -> Result<(), FeedbackError> {
        let write_err = |source| FeedbackError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|source| FeedbackError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(write_err)
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::feedback::testing::entry;

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("feedback.json");
        let now = Utc::now();
        {
            let mut store = FeedbackStore::open(&path, 100);
            store.record(entry("dec-1", "commit", FeedbackKind::Approval, now)).unwrap();
            store.record(entry("dec-2", "branch", FeedbackKind::Correction, now)).unwrap();
        }
        let store = FeedbackStore::open(&path, 100);
        assert_eq!(store.entries().len(), 2);
        let reloaded = store.get("dec-2").unwrap();
        assert_eq!(reloaded, &entry("dec-2", "branch", FeedbackKind::Correction, now));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut store = FeedbackStore::in_memory(10);
        let now = Utc::now();
        store.record(entry("dec-1", "commit", FeedbackKind::Approval, now)).unwrap();
        let err = store
            .record(entry("dec-1", "commit", FeedbackKind::Approval, now))
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Duplicate(_)));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn trims_oldest_by_timestamp() {
        let mut store = FeedbackStore::in_memory(2);
        let now = Utc::now();
        store.record(entry("new", "commit", FeedbackKind::Approval, now)).unwrap();
        store
            .record(entry("oldest", "commit", FeedbackKind::Approval, now - Duration::hours(2)))
            .unwrap();
        store
            .record(entry("old", "commit", FeedbackKind::Approval, now - Duration::hours(1)))
            .unwrap();
        let ids: Vec<&str> = store.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.json");
        fs::write(&path, "{ not json").unwrap();
        let store = FeedbackStore::open(&path, 10);
        assert!(store.entries().is_empty());
    }

    #[test]
    fn unwritable_path_keeps_serving_reads() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let mut store = FeedbackStore::open(&blocker.join("feedback.json"), 10);
        store
            .record(entry("dec-1", "commit", FeedbackKind::Approval, Utc::now()))
            .unwrap();
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn stats_by_type_and_action() {
        let mut store = FeedbackStore::in_memory(10);
        let now = Utc::now();
        store.record(entry("a", "commit", FeedbackKind::Approval, now)).unwrap();
        store.record(entry("b", "commit", FeedbackKind::Rejection, now)).unwrap();
        store.record(entry("c", "stash", FeedbackKind::ImplicitApproval, now)).unwrap();
        store.record(entry("d", "commit", FeedbackKind::Correction, now)).unwrap();

        let stats = store.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_type[&FeedbackKind::Approval], 1);
        assert_eq!(stats.by_type[&FeedbackKind::ImplicitApproval], 1);
        assert!((stats.approval_rate - 0.5).abs() < 1e-9);
        assert!((stats.action_approval_rates["commit"] - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.action_approval_rates["stash"] - 1.0).abs() < 1e-9);
        assert_eq!(stats.recent.len(), 4);
    }

    #[test]
    fn outcome_updates_in_place() {
        let mut store = FeedbackStore::in_memory(10);
        let now = Utc::now();
        store.record(entry("a", "commit", FeedbackKind::Approval, now)).unwrap();
        let outcome = Outcome {
            success: true,
            detail: Some("Committed abc".into()),
            recorded_at: now,
        };
        assert!(store.update_outcome("a", outcome.clone()));
        assert!(!store.update_outcome("missing", outcome));
        assert!(store.get("a").unwrap().outcome.as_ref().unwrap().success);
    }
}
