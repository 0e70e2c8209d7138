//! Git-state change detection.
//!
//! The detector keeps the last snapshot per project and turns the difference
//! between two snapshots into typed events. The first snapshot of a project
//! only reports what is currently dirty; transitions need a baseline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::files::FileChange;
use crate::config::GitWorkflowConfig;
use crate::events::{EventType, MonitoringEvent};

/// Point-in-time view of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSnapshot {
    pub branch: String,
    pub head: Option<String>,
    pub changes: Vec<FileChange>,
}

/// Payload of UNCOMMITTED_CHANGES and FILES_ADDED events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetPayload {
    pub branch: String,
    pub is_protected: bool,
    pub is_main: bool,
    pub file_count: usize,
    pub files: Vec<FileChange>,
}

/// Payload of BRANCH_SWITCHED, COMMIT_CREATED and WORKING_DIRECTORY_CLEAN events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPayload {
    pub branch: String,
    #[serde(default)]
    pub previous_branch: Option<String>,
    pub is_protected: bool,
    pub is_main: bool,
    #[serde(default)]
    pub head: Option<String>,
}

pub struct GitStateDetector {
    workflow: GitWorkflowConfig,
    last: HashMap<PathBuf, GitSnapshot>,
}

impl GitStateDetector {
    pub fn new(workflow: GitWorkflowConfig) -> Self {
        Self {
            workflow,
            last: HashMap::new(),
        }
    }

    /// Compare `snapshot` with the previous one for `project` and emit events
    /// for everything that changed.
    pub fn observe(
        &mut self,
        project: &Path,
        snapshot: GitSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<MonitoringEvent> {
        let previous = self.last.insert(project.to_path_buf(), snapshot.clone());
        let mut events = Vec::new();

        let branch_payload = |previous_branch: Option<String>| BranchPayload {
            branch: snapshot.branch.clone(),
            previous_branch,
            is_protected: self.workflow.is_protected(&snapshot.branch),
            is_main: self.workflow.is_main(&snapshot.branch),
            head: snapshot.head.clone(),
        };

        if let Some(ref prev) = previous {
            if prev.branch != snapshot.branch {
                events.push(event(
                    EventType::BranchSwitched,
                    project,
                    now,
                    &branch_payload(Some(prev.branch.clone())),
                ));
            } else if prev.head != snapshot.head && snapshot.head.is_some() {
                events.push(event(
                    EventType::CommitCreated,
                    project,
                    now,
                    &branch_payload(None),
                ));
            }

            if !prev.changes.is_empty() && snapshot.changes.is_empty() {
                events.push(event(
                    EventType::WorkingDirectoryClean,
                    project,
                    now,
                    &branch_payload(None),
                ));
            }
        }

        let new_files: Vec<FileChange> = snapshot
            .changes
            .iter()
            .filter(|c| c.is_new())
            .filter(|c| {
                previous
                    .as_ref()
                    .is_none_or(|p| !p.changes.iter().any(|pc| pc.path == c.path))
            })
            .cloned()
            .collect();
        if !new_files.is_empty() {
            events.push(event(
                EventType::FilesAdded,
                project,
                now,
                &self.change_set(&snapshot.branch, new_files),
            ));
        }

        let changes_differ = previous.as_ref().is_none_or(|p| p.changes != snapshot.changes);
        if !snapshot.changes.is_empty() && changes_differ {
            events.push(event(
                EventType::UncommittedChanges,
                project,
                now,
                &self.change_set(&snapshot.branch, snapshot.changes.clone()),
            ));
        }

        events
    }

    fn change_set(&self, branch: &str, files: Vec<FileChange>) -> ChangeSetPayload {
        ChangeSetPayload {
            branch: branch.to_string(),
            is_protected: self.workflow.is_protected(branch),
            is_main: self.workflow.is_main(branch),
            file_count: files.len(),
            files,
        }
    }
}

fn event<T: Serialize>(
    kind: EventType,
    project: &Path,
    now: DateTime<Utc>,
    payload: &T,
) -> MonitoringEvent {
    let data = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    MonitoringEvent::new(kind, project, now, data)
}
