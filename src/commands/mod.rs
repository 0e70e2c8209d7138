pub mod decide;
pub mod feedback;
pub mod init;
pub mod note;
pub mod schema;
pub mod suggest;
pub mod watch;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use clap::Args;

use crate::aggregator::{EventAggregator, Notification};
use crate::config::Config;
use crate::git::{CliGit, GhCli};

const EMERGENCY_STOP_ENV: &str = "GITPILOT_EMERGENCY_STOP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

impl OutputFormat {
    /// Pretty on a terminal, text when piped.
    pub fn resolve(format: Option<Self>) -> Self {
        format.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                Self::Pretty
            } else {
                Self::Text
            }
        })
    }
}

/// Process-level settings read once in `main`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub emergency_stop: bool,
}

impl Overrides {
    pub fn from_env() -> Self {
        let emergency_stop = std::env::var(EMERGENCY_STOP_ENV)
            .is_ok_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"));
        if emergency_stop {
            tracing::warn!("emergency stop forced by {EMERGENCY_STOP_ENV}");
        }
        Self { emergency_stop }
    }

    pub fn apply(&self, config: &mut Config) {
        if self.emergency_stop {
            config.automation.safety.emergency_stop = true;
        }
    }
}

/// Flags shared by every command that works on a project.
#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Project root directory (defaults to the current directory)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

impl ProjectArgs {
    pub fn root(&self) -> anyhow::Result<PathBuf> {
        let root = match self.project_root {
            Some(ref root) => root.clone(),
            None => std::env::current_dir().context("reading current directory")?,
        };
        std::fs::canonicalize(&root).with_context(|| format!("resolving {}", root.display()))
    }

    pub fn format(&self) -> OutputFormat {
        OutputFormat::resolve(self.format)
    }

    pub fn config(&self, root: &Path, overrides: Overrides) -> anyhow::Result<Config> {
        let mut config = Config::load_or_default(root)?;
        overrides.apply(&mut config);
        Ok(config)
    }
}

/// The pipeline wired to the real `git` and `gh` binaries.
pub fn pipeline(config: Config) -> EventAggregator {
    EventAggregator::new(config, Rc::new(CliGit), Rc::new(GhCli))
}

pub fn print_notifications(notifications: &[Notification], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(notifications)?),
        OutputFormat::Pretty | OutputFormat::Text => {
            for n in notifications {
                print_notification(n, format);
            }
        }
    }
    Ok(())
}

pub fn print_notification(n: &Notification, format: OutputFormat) {
    let pretty = format == OutputFormat::Pretty;
    match n {
        Notification::Milestone(m) => {
            if pretty {
                println!("* Milestone: {}\n  {}", m.title, m.description);
            } else {
                println!("milestone\t{}\t{}", m.kind.as_str(), m.description);
            }
        }
        Notification::Suggestion(s) => {
            if pretty {
                println!("> [{}] {}", s.priority.as_str(), s.message);
                if let Some(ref reason) = s.reason {
                    println!("  ({reason})");
                }
            } else {
                println!("suggestion\t{}\t{}\t{}", s.kind.as_str(), s.priority.as_str(), s.message);
            }
        }
        Notification::ActionReady { decision, result } => {
            let outcome = if result.success {
                result.output.as_deref().unwrap_or("done")
            } else {
                result.error.as_deref().unwrap_or("failed")
            };
            if pretty {
                println!(
                    "+ Executed {} ({:.0}% confident): {outcome}",
                    decision.action,
                    decision.confidence * 100.0
                );
                if let Some(ref rollback) = result.rollback_info {
                    println!("  undo with: {}", rollback.display());
                }
            } else {
                println!("executed\t{}\t{}\t{outcome}", decision.action, result.success);
            }
        }
        Notification::ApprovalRequired { id, decision } => {
            if pretty {
                println!(
                    "? Proposed {} ({:.0}% confident): {}",
                    decision.action,
                    decision.confidence * 100.0,
                    decision.reasoning
                );
                println!("  decision id: {id}");
            } else {
                println!("approval\t{id}\t{}\t{:.2}\t{}", decision.action, decision.confidence, decision.reasoning);
            }
        }
        Notification::Blocked { decision, reasons } => {
            if pretty {
                println!("! Blocked {}: {}", decision.action, reasons.join("; "));
            } else {
                println!("blocked\t{}\t{}", decision.action, reasons.join("; "));
            }
        }
        Notification::RollbackFailed { action, error } => {
            if pretty {
                println!("! Rollback of {action} failed: {error}");
            } else {
                println!("rollback_failed\t{action}\t{error}");
            }
        }
    }
}
