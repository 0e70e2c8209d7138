//! Git and GitHub collaborators.
//!
//! The pipeline only talks to the traits here. `CliGit` and `GhCli` shell
//! out through [`Tool`]; tests substitute in-memory fakes.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::patterns::{FileChange, GitSnapshot, parse_porcelain};
use crate::subprocess::Tool;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);
const GH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("unexpected output from `{command}`: {output}")]
    Parse { command: String, output: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UncommittedChanges {
    pub count: usize,
    pub files: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
}

pub trait GitCollaborator {
    fn current_branch(&self, repo: &Path) -> Result<String, GitError>;
    fn head(&self, repo: &Path) -> Result<Option<String>, GitError>;
    fn uncommitted_changes(&self, repo: &Path) -> Result<UncommittedChanges, GitError>;
    fn recent_commits(&self, repo: &Path, n: usize) -> Result<Vec<CommitInfo>, GitError>;
    /// Create `name` and check it out.
    fn create_branch(&self, repo: &Path, name: &str) -> Result<(), GitError>;
    fn stage_all(&self, repo: &Path) -> Result<(), GitError>;
    /// Commit what is staged and return the new HEAD.
    fn commit_changes(&self, repo: &Path, message: &str) -> Result<String, GitError>;
    fn push_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError>;
    /// Stash tracked and untracked changes under `message`.
    fn stash(&self, repo: &Path, message: &str) -> Result<(), GitError>;
    /// Run an arbitrary git command; used to replay rollback steps.
    fn run(&self, repo: &Path, args: &[String]) -> Result<String, GitError>;

    fn snapshot(&self, repo: &Path) -> Result<GitSnapshot, GitError> {
        Ok(GitSnapshot {
            branch: self.current_branch(repo)?,
            head: self.head(repo)?,
            changes: self.uncommitted_changes(repo)?.files,
        })
    }
}

pub trait GitHubCollaborator {
    /// Open a pull request and return its URL.
    fn create_pull_request(&self, repo: &Path, pr: &PullRequest) -> Result<String, GitError>;
}

/// The `git` binary.
#[derive(Debug, Clone, Default)]
pub struct CliGit;

impl CliGit {
    fn git<S: AsRef<str>>(repo: &Path, args: &[S]) -> Tool {
        Tool::new("git")
            .args(args)
            .current_dir(repo)
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(GIT_TIMEOUT)
    }

    fn output<S: AsRef<str>>(repo: &Path, args: &[S]) -> Result<String, GitError> {
        let tool = Self::git(repo, args);
        tool.run_ok()
            .map(|out| out.stdout)
            .map_err(|e| GitError::Command {
                command: tool.display(),
                message: format!("{e:#}"),
            })
    }
}

impl GitCollaborator for CliGit {
    fn current_branch(&self, repo: &Path) -> Result<String, GitError> {
        let branch = Self::output(repo, &["branch", "--show-current"])?;
        let branch = branch.trim();
        // Empty when HEAD is detached.
        Ok(if branch.is_empty() { "HEAD".to_string() } else { branch.to_string() })
    }

    fn head(&self, repo: &Path) -> Result<Option<String>, GitError> {
        let out = Self::git(repo, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .run()
            .map_err(|e| GitError::Command {
                command: "git rev-parse HEAD".into(),
                message: format!("{e:#}"),
            })?;
        // No commits yet.
        if !out.success() {
            return Ok(None);
        }
        Ok(Some(out.stdout.trim().to_string()).filter(|h| !h.is_empty()))
    }

    fn uncommitted_changes(&self, repo: &Path) -> Result<UncommittedChanges, GitError> {
        let out = Self::output(repo, &["status", "--porcelain", "--untracked-files=all"])?;
        let files = parse_porcelain(&out);
        Ok(UncommittedChanges {
            count: files.len(),
            files,
        })
    }

    fn recent_commits(&self, repo: &Path, n: usize) -> Result<Vec<CommitInfo>, GitError> {
        if self.head(repo)?.is_none() {
            return Ok(Vec::new());
        }
        let count = format!("-n{n}");
        let args = ["log", count.as_str(), "--format=%H%x1f%s%x1f%cI"];
        let out = Self::output(repo, &args)?;
        out.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let mut parts = line.split('\u{1f}');
                let parse_err = || GitError::Parse {
                    command: "git log".into(),
                    output: line.to_string(),
                };
                let hash = parts.next().ok_or_else(parse_err)?;
                let subject = parts.next().ok_or_else(parse_err)?;
                let timestamp = parts
                    .next()
                    .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
                    .ok_or_else(parse_err)?;
                Ok(CommitInfo {
                    hash: hash.to_string(),
                    subject: subject.to_string(),
                    timestamp: timestamp.with_timezone(&Utc),
                })
            })
            .collect()
    }

    fn create_branch(&self, repo: &Path, name: &str) -> Result<(), GitError> {
        Self::output(repo, &["checkout", "-b", name]).map(|_| ())
    }

    fn stage_all(&self, repo: &Path) -> Result<(), GitError> {
        Self::output(repo, &["add", "--all"]).map(|_| ())
    }

    fn commit_changes(&self, repo: &Path, message: &str) -> Result<String, GitError> {
        Self::output(repo, &["commit", "-m", message])?;
        self.head(repo)?.ok_or_else(|| GitError::Parse {
            command: "git rev-parse HEAD".into(),
            output: "no HEAD after commit".into(),
        })
    }

    fn push_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        Self::output(repo, &["push", "--set-upstream", "origin", branch]).map(|_| ())
    }

    fn stash(&self, repo: &Path, message: &str) -> Result<(), GitError> {
        Self::output(repo, &["stash", "push", "--include-untracked", "-m", message]).map(|_| ())
    }

    fn run(&self, repo: &Path, args: &[String]) -> Result<String, GitError> {
        Self::output(repo, args)
    }
}

/// The GitHub CLI.
#[derive(Debug, Clone, Default)]
pub struct GhCli;

impl GitHubCollaborator for GhCli {
    fn create_pull_request(&self, repo: &Path, pr: &PullRequest) -> Result<String, GitError> {
        let tool = Tool::new("gh")
            .args(&[
                "pr",
                "create",
                "--title",
                pr.title.as_str(),
                "--body",
                pr.body.as_str(),
                "--base",
                pr.base.as_str(),
                "--head",
                pr.head.as_str(),
            ])
            .current_dir(repo)
            .env("GH_PROMPT_DISABLED", "1")
            .timeout(GH_TIMEOUT);
        let out = tool.run_ok().map_err(|e| GitError::Command {
            command: tool.display(),
            message: format!("{e:#}"),
        })?;
        // gh prints the PR URL as the last line.
        Ok(out.stdout.lines().last().unwrap_or_default().trim().to_string())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::ChangeStatus;

    fn git_available() -> bool {
        Tool::new("git").arg("--version").run().is_ok_and(|o| o.success())
    }

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "--quiet"],
            vec!["symbolic-ref", "HEAD", "refs/heads/main"],
            vec!["config", "user.email", "dev@example.com"],
            vec!["config", "user.name", "Dev"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            CliGit::git(dir, &args[..]).run_ok().unwrap();
        }
    }

    #[test]
    fn empty_repo_has_no_head_or_commits() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let git = CliGit;
        assert_eq!(git.current_branch(dir.path()).unwrap(), "main");
        assert_eq!(git.head(dir.path()).unwrap(), None);
        assert!(git.recent_commits(dir.path(), 5).unwrap().is_empty());
    }

    #[test]
    fn commit_branch_and_status() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let git = CliGit;

        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let changes = git.uncommitted_changes(dir.path()).unwrap();
        assert_eq!(changes.files, vec![FileChange::new("a.txt", ChangeStatus::Untracked)]);

        git.stage_all(dir.path()).unwrap();
        let head = git.commit_changes(dir.path(), "feat: first").unwrap();
        assert_eq!(git.head(dir.path()).unwrap(), Some(head.clone()));
        assert_eq!(git.uncommitted_changes(dir.path()).unwrap().count, 0);

        let commits = git.recent_commits(dir.path(), 5).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].hash, head);
        assert_eq!(commits[0].subject, "feat: first");

        git.create_branch(dir.path(), "feature/next").unwrap();
        assert_eq!(git.current_branch(dir.path()).unwrap(), "feature/next");

        let snapshot = git.snapshot(dir.path()).unwrap();
        assert_eq!(snapshot.branch, "feature/next");
        assert_eq!(snapshot.head, Some(head));
    }

    #[test]
    fn failed_command_names_the_command() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let err = CliGit
            .run(dir.path(), &["checkout".into(), "no-such-branch".into()])
            .unwrap_err();
        assert!(err.to_string().contains("git checkout no-such-branch"));
    }
}
