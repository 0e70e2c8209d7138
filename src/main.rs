use std::process::ExitCode;

use clap::{Parser, Subcommand};

use gitpilot::commands::decide::DecideArgs;
use gitpilot::commands::feedback::FeedbackCommand;
use gitpilot::commands::init::InitArgs;
use gitpilot::commands::note::NoteArgs;
use gitpilot::commands::schema::SchemaArgs;
use gitpilot::commands::suggest::SuggestArgs;
use gitpilot::commands::watch::WatchArgs;
use gitpilot::commands::Overrides;
use gitpilot::{error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "gitpilot",
    version,
    about = "Git workflow assistant with gated autonomous actions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a default .gitpilot.toml
    Init(InitArgs),
    /// Print the JSON Schema for .gitpilot.toml
    Schema(SchemaArgs),
    /// Snapshot the repository and print suggestions
    Suggest(SuggestArgs),
    /// Feed conversation messages through the pattern recognizer
    Note(NoteArgs),
    /// Run one decision cycle on the current working tree
    Decide(DecideArgs),
    /// Poll the repository and react to changes until interrupted
    Watch(WatchArgs),
    /// Inspect recorded feedback (stats, prefs, list)
    Feedback {
        #[command(subcommand)]
        command: FeedbackCommand,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Schema(_) => "schema",
            Self::Suggest(_) => "suggest",
            Self::Note(_) => "note",
            Self::Decide(_) => "decide",
            Self::Watch(_) => "watch",
            Self::Feedback { .. } => "feedback",
        }
    }
}

fn main() -> ExitCode {
    telemetry::init();

    let cli = Cli::parse();
    let overrides = Overrides::from_env();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Init(args) => args.execute(),
        Commands::Schema(args) => args.execute(),
        Commands::Suggest(args) => args.execute(overrides),
        Commands::Note(args) => args.execute(overrides),
        Commands::Decide(args) => args.execute(overrides),
        Commands::Watch(args) => args.execute(overrides),
        Commands::Feedback { command } => command.execute(overrides),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
