use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Args;

use super::decide::print_response;
use super::{OutputFormat, Overrides, ProjectArgs, pipeline, print_notification};
use crate::aggregator::{EventAggregator, Notification};
use crate::decision::{LlmDecision, PERMISSIBLE_ACTIONS};

/// Granularity of the interruptible sleep between polls.
const SLEEP_STEP: Duration = Duration::from_millis(200);
const RENAME_BRANCH: &str = "branch, but with a name I choose";

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Seconds between git polls
    #[arg(long, default_value_t = 10)]
    pub interval: u64,
    /// Stop after this many polls
    #[arg(long)]
    pub max_polls: Option<u64>,
    /// Never prompt; pending decisions wait for their implicit-approval deadline
    #[arg(long)]
    pub no_interactive: bool,
    #[command(flatten)]
    pub project: ProjectArgs,
}

enum Answer {
    Approve,
    Reject,
    Correct {
        action: String,
        user_action: Option<String>,
    },
    Skip,
}

impl WatchArgs {
    pub fn execute(&self, overrides: Overrides) -> anyhow::Result<()> {
        let root = self.project.root()?;
        let config = self.project.config(&root, overrides)?;
        let format = self.project.format();
        let interactive = !self.no_interactive && std::io::stdin().is_terminal() && format != OutputFormat::Json;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }

        let mut agg = pipeline(config);
        eprintln!(
            "Watching {} every {}s (Ctrl-C to stop)",
            root.display(),
            self.interval
        );

        let mut polls = 0u64;
        while !stop.load(Ordering::SeqCst) {
            let notifications = agg
                .poll(&root, Utc::now())
                .with_context(|| format!("reading git state of {}", root.display()))?;
            for n in &notifications {
                if format == OutputFormat::Json {
                    println!("{}", serde_json::to_string(n)?);
                } else {
                    print_notification(n, format);
                }
                if interactive && let Notification::ApprovalRequired { id, decision } = n {
                    review(&mut agg, id, decision, format)?;
                }
            }
            for entry in agg.tick(Utc::now()) {
                tracing::info!(id = %entry.id, action = %entry.decision.action, "implicitly approved");
            }

            polls += 1;
            if self.max_polls.is_some_and(|max| polls >= max) {
                break;
            }
            sleep_unless_stopped(Duration::from_secs(self.interval), &stop);
        }
        print_summary(&agg, &root, format);
        Ok(())
    }
}

fn review(agg: &mut EventAggregator, id: &str, decision: &LlmDecision, format: OutputFormat) -> anyhow::Result<()> {
    let response = match ask(decision)? {
        Answer::Approve => agg.handle_approval(id, None, Utc::now()),
        Answer::Reject => {
            let reason: String = dialoguer::Input::new()
                .with_prompt("Reason (optional)")
                .allow_empty(true)
                .interact_text()
                .context("reading rejection reason")?;
            let reason = Some(reason).filter(|r| !r.trim().is_empty());
            agg.handle_rejection(id, reason, Utc::now())
        }
        Answer::Correct { action, user_action } => {
            agg.handle_correction(id, &action, user_action, None, Utc::now())
        }
        Answer::Skip => return Ok(()),
    };
    print_response(&response, format)
}

fn ask(decision: &LlmDecision) -> anyhow::Result<Answer> {
    let choice = dialoguer::Select::new()
        .with_prompt(format!("{} ?", decision.action))
        .items(&["approve", "reject", "do something else", "decide later"])
        .default(3)
        .interact()
        .context("reading approval choice")?;
    Ok(match choice {
        0 => Answer::Approve,
        1 => Answer::Reject,
        2 => {
            let mut options: Vec<&str> = PERMISSIBLE_ACTIONS
                .iter()
                .copied()
                .filter(|a| *a != decision.action)
                .collect();
            if decision.action == "branch" {
                options.insert(0, RENAME_BRANCH);
            }
            let picked = dialoguer::Select::new()
                .with_prompt("What should have happened?")
                .items(&options[..])
                .default(0)
                .interact()
                .context("reading corrected action")?;
            if options[picked] == RENAME_BRANCH {
                let name: String = dialoguer::Input::new()
                    .with_prompt("Branch name")
                    .interact_text()
                    .context("reading branch name")?;
                Answer::Correct {
                    action: "branch".to_string(),
                    user_action: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
                }
            } else {
                Answer::Correct {
                    action: options[picked].to_string(),
                    user_action: None,
                }
            }
        }
        _ => Answer::Skip,
    })
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let mut slept = Duration::ZERO;
    while slept < total && !stop.load(Ordering::SeqCst) {
        let step = SLEEP_STEP.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
}

fn print_summary(agg: &EventAggregator, root: &Path, format: OutputFormat) {
    if format == OutputFormat::Json {
        return;
    }
    let stats = agg.stats(Utc::now());
    let executed = agg.execution_history().iter().filter(|r| r.success).count();
    eprintln!(
        "Stopped watching {}: {} events, {executed} actions executed, {} decisions pending",
        root.display(),
        stats.total,
        agg.pending().len()
    );
}
