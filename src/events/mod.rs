//! Domain events and the bounded history they are stored in.

mod store;

pub use store::{EventStats, EventStore};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every kind of event the monitoring pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Git state
    FileChanged,
    FilesAdded,
    UncommittedChanges,
    BranchSwitched,
    CommitCreated,
    WorkingDirectoryClean,
    // Conversation
    FeatureComplete,
    BugFixed,
    TestsPassing,
    DocsUpdated,
    RefactorDone,
    ReleaseRequested,
    // Internal
    LlmDecisionRequested,
    LlmApprovalRequired,
    LlmActionExecuted,
    LlmActionFailed,
    FeedbackRecorded,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::FileChanged => "FILE_CHANGED",
            EventType::FilesAdded => "FILES_ADDED",
            EventType::UncommittedChanges => "UNCOMMITTED_CHANGES",
            EventType::BranchSwitched => "BRANCH_SWITCHED",
            EventType::CommitCreated => "COMMIT_CREATED",
            EventType::WorkingDirectoryClean => "WORKING_DIRECTORY_CLEAN",
            EventType::FeatureComplete => "FEATURE_COMPLETE",
            EventType::BugFixed => "BUG_FIXED",
            EventType::TestsPassing => "TESTS_PASSING",
            EventType::DocsUpdated => "DOCS_UPDATED",
            EventType::RefactorDone => "REFACTOR_DONE",
            EventType::ReleaseRequested => "RELEASE_REQUESTED",
            EventType::LlmDecisionRequested => "LLM_DECISION_REQUESTED",
            EventType::LlmApprovalRequired => "LLM_APPROVAL_REQUIRED",
            EventType::LlmActionExecuted => "LLM_ACTION_EXECUTED",
            EventType::LlmActionFailed => "LLM_ACTION_FAILED",
            EventType::FeedbackRecorded => "FEEDBACK_RECORDED",
        }
    }

    /// Events the pipeline produces about itself. These never trigger a new
    /// decision cycle, otherwise every executed action would feed back into
    /// another decision.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            EventType::LlmDecisionRequested
                | EventType::LlmApprovalRequired
                | EventType::LlmActionExecuted
                | EventType::LlmActionFailed
                | EventType::FeedbackRecorded
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation about a project. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub project_path: PathBuf,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl MonitoringEvent {
    pub fn new(
        event_type: EventType,
        project_path: &Path,
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            timestamp,
            project_path: project_path.to_path_buf(),
            data,
        }
    }

    /// Decode the payload into a typed shape, if it matches.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }
}
