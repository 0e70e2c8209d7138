use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use crate::config::{CONFIG_JSON, CONFIG_TOML, Config, find_config};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
    /// Project root directory (defaults to the current directory)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl InitArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = match self.project_root {
            Some(ref root) => root.clone(),
            None => std::env::current_dir().context("reading current directory")?,
        };
        if !root.is_dir() {
            return Err(ExitError::Config(format!("{} is not a directory", root.display())).into());
        }

        if let Some(existing) = find_config(&root)
            && !self.force
        {
            return Err(ExitError::Other(format!(
                "{} already exists (use --force to overwrite)",
                existing.display()
            ))
            .into());
        }

        let path = root.join(CONFIG_TOML);
        let contents = Config::default().to_toml()?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "config written");

        let json = root.join(CONFIG_JSON);
        if json.exists() {
            eprintln!(
                "note: {} is ignored while {CONFIG_TOML} exists",
                json.display()
            );
        }
        println!("Wrote {}", path.display());
        Ok(())
    }
}
