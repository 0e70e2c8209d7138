//! Pattern matchers that turn raw signals into typed monitoring events.

pub mod conversation;
pub mod files;
pub mod git_state;

pub use files::{ChangeStatus, ChangeSummary, FileChange, FileKind, parse_porcelain};
pub use git_state::{BranchPayload, ChangeSetPayload, GitSnapshot, GitStateDetector};
