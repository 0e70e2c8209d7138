use clap::{Args, Subcommand};

use super::{OutputFormat, Overrides, ProjectArgs};
use crate::feedback::{FeedbackEntry, FeedbackLoop};

#[derive(Debug, Subcommand)]
pub enum FeedbackCommand {
    /// Approval statistics across all recorded feedback
    Stats(FeedbackArgs),
    /// Preferences learned for this project
    Prefs(FeedbackArgs),
    /// Most recent feedback entries
    List {
        /// How many entries to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[command(flatten)]
        args: FeedbackArgs,
    },
}

#[derive(Debug, Args)]
pub struct FeedbackArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

impl FeedbackCommand {
    pub fn execute(&self, overrides: Overrides) -> anyhow::Result<()> {
        let args = match self {
            Self::Stats(args) | Self::Prefs(args) | Self::List { args, .. } => args,
        };
        let root = args.project.root()?;
        let config = args.project.config(&root, overrides)?;
        let feedback = FeedbackLoop::open(&config.automation.learning);
        let format = args.project.format();

        match self {
            Self::Stats(_) => {
                let stats = feedback.stats();
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                    OutputFormat::Pretty => {
                        println!("=== Feedback ===\n");
                        println!("Decisions reviewed: {}", stats.total);
                        println!("Approval rate:      {:.0}%", stats.approval_rate * 100.0);
                        for (kind, count) in &stats.by_type {
                            println!("  {:<18} {count}", kind.as_str());
                        }
                        if !stats.action_approval_rates.is_empty() {
                            println!("\nBy action:");
                            for (action, rate) in &stats.action_approval_rates {
                                println!("  {action:<12} {:.0}%", rate * 100.0);
                            }
                        }
                    }
                    OutputFormat::Text => {
                        println!("total\t{}", stats.total);
                        println!("approval_rate\t{:.3}", stats.approval_rate);
                        for (action, rate) in &stats.action_approval_rates {
                            println!("action\t{action}\t{rate:.3}");
                        }
                    }
                }
            }
            Self::Prefs(_) => {
                let prefs = feedback.learned_preferences(&root);
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&prefs)?),
                    _ if prefs.is_empty() => println!("No preferences learned yet."),
                    OutputFormat::Pretty => {
                        for pref in &prefs {
                            println!("{} ({:.0}% confident)", pref.description, pref.confidence * 100.0);
                            for evidence in &pref.evidence {
                                println!("  - {evidence}");
                            }
                        }
                    }
                    OutputFormat::Text => {
                        for pref in &prefs {
                            println!("{:.2}\t{}", pref.confidence, pref.description);
                        }
                    }
                }
            }
            Self::List { limit, .. } => {
                let entries: Vec<&FeedbackEntry> = feedback.store().recent(*limit);
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                    _ if entries.is_empty() => println!("No feedback recorded."),
                    OutputFormat::Pretty | OutputFormat::Text => {
                        for entry in entries {
                            println!(
                                "{}\t{}\t{}\t{}\t{}",
                                entry.timestamp.format("%Y-%m-%d %H:%M"),
                                entry.id,
                                entry.decision.action,
                                entry.feedback.kind.as_str(),
                                entry.project_path.display()
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
