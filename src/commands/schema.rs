use clap::Args;
use schemars::schema_for;

use crate::config::{CONFIG_TOML, Config};

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Single-line output
    #[arg(long)]
    pub compact: bool,
}

impl SchemaArgs {
    /// Print the JSON Schema for the project config file to stdout.
    pub fn execute(&self) -> anyhow::Result<()> {
        let schema = schema_for!(Config);
        let json = if self.compact {
            serde_json::to_string(&schema)?
        } else {
            serde_json::to_string_pretty(&schema)?
        };
        tracing::debug!(file = CONFIG_TOML, bytes = json.len(), "schema rendered");
        println!("{json}");
        Ok(())
    }
}
