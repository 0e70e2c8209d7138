use anyhow::Context;
use chrono::Utc;
use clap::Args;

use super::{OutputFormat, Overrides, ProjectArgs, pipeline, print_notifications};
use crate::aggregator::Notification;

#[derive(Debug, Args)]
pub struct SuggestArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl SuggestArgs {
    /// Snapshot the repository once and print what the rules suggest.
    /// Never requests a decision.
    pub fn execute(&self, overrides: Overrides) -> anyhow::Result<()> {
        let root = self.project.root()?;
        let mut config = self.project.config(&root, overrides)?;
        config.automation.enabled = false;

        let mut agg = pipeline(config);
        let notifications = agg
            .poll(&root, Utc::now())
            .with_context(|| format!("reading git state of {}", root.display()))?;

        let format = self.project.format();
        if notifications.is_empty() && format != OutputFormat::Json {
            println!("No suggestions.");
            return Ok(());
        }
        let suggestions: Vec<Notification> = notifications
            .into_iter()
            .filter(|n| matches!(n, Notification::Suggestion(_) | Notification::Milestone(_)))
            .collect();
        print_notifications(&suggestions, format)
    }
}
