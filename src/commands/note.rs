use chrono::Utc;
use clap::Args;
use serde::Serialize;

use super::{OutputFormat, Overrides, ProjectArgs, pipeline, print_notification};
use crate::aggregator::Notification;
use crate::events::{EventType, MonitoringEvent};
use crate::patterns::conversation;

#[derive(Debug, Args)]
pub struct NoteArgs {
    /// Conversation messages, processed in order
    #[arg(required = true)]
    pub messages: Vec<String>,
    #[command(flatten)]
    pub project: ProjectArgs,
}

#[derive(Debug, Serialize)]
struct NoteReport {
    events: Vec<MonitoringEvent>,
    notifications: Vec<Notification>,
}

impl NoteArgs {
    pub fn execute(&self, overrides: Overrides) -> anyhow::Result<()> {
        let root = self.project.root()?;
        let config = self.project.config(&root, overrides)?;
        let mut agg = pipeline(config);

        let mut report = NoteReport {
            events: Vec::new(),
            notifications: Vec::new(),
        };
        for message in &self.messages {
            let now = Utc::now();
            let events = conversation::match_message(message, &root, now);
            if events.is_empty() {
                tracing::debug!(%message, "no workflow signal");
            }
            for event in events {
                report.notifications.extend(agg.add_event(event.clone(), now));
                report.events.push(event);
            }
        }

        let format = self.project.format();
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Pretty | OutputFormat::Text => {
                if report.events.is_empty() {
                    println!("No workflow signals recognized.");
                }
                for event in &report.events {
                    let matched = event.data.get("matched").and_then(|m| m.as_str()).unwrap_or("");
                    print_event(event.event_type, matched, format);
                }
                for n in &report.notifications {
                    print_notification(n, format);
                }
            }
        }
        Ok(())
    }
}

fn print_event(kind: EventType, matched: &str, format: OutputFormat) {
    if format == OutputFormat::Pretty {
        println!("- {kind} (\"{matched}\")");
    } else {
        println!("event\t{kind}\t{matched}");
    }
}
