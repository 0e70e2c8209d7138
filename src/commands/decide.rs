use anyhow::Context;
use chrono::Utc;
use clap::Args;

use super::{OutputFormat, Overrides, ProjectArgs, pipeline, print_notifications};
use crate::aggregator::{FeedbackResponse, Notification};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct DecideArgs {
    /// Approve and execute the proposed action if it needs approval
    #[arg(long)]
    pub approve: bool,
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl DecideArgs {
    /// Run one decision cycle against the current working tree.
    pub fn execute(&self, overrides: Overrides) -> anyhow::Result<()> {
        let root = self.project.root()?;
        let config = self.project.config(&root, overrides)?;
        if !config.automation.is_active() {
            return Err(ExitError::AutomationUnavailable(format!(
                "automation is off (enabled = {}, mode = {}); enable it in the project config",
                config.automation.enabled,
                config.automation.mode.as_str()
            ))
            .into());
        }

        let mut agg = pipeline(config);
        let now = Utc::now();
        let notifications = agg
            .poll(&root, now)
            .with_context(|| format!("reading git state of {}", root.display()))?;
        let format = self.project.format();

        let decided = notifications.iter().any(|n| {
            matches!(
                n,
                Notification::ActionReady { .. }
                    | Notification::ApprovalRequired { .. }
                    | Notification::Blocked { .. }
            )
        });
        if !decided && format != OutputFormat::Json {
            println!("No action proposed (clean tree, nothing to do, or provider unavailable; see GITPILOT_LOG=info).");
        }
        print_notifications(&notifications, format)?;

        let pending: Vec<String> = notifications
            .iter()
            .filter_map(|n| match n {
                Notification::ApprovalRequired { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        if !self.approve {
            if format != OutputFormat::Json {
                println!(
                    "Not approved: the proposal is dropped when this command exits and no feedback is recorded. \
                     Re-run with --approve to execute it, or use `gitpilot watch` to review interactively."
                );
            }
            return Ok(());
        }
        for id in pending {
            let response = agg.handle_approval(&id, None, Utc::now());
            print_response(&response, format)?;
        }
        Ok(())
    }
}

pub(crate) fn print_response(response: &FeedbackResponse, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(response)?),
        OutputFormat::Pretty | OutputFormat::Text => println!("{}", response.message),
    }
    Ok(())
}
