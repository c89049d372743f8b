//! Bootstrap glue: CLI args and config-file loading. The typed shape this produces
//! (`toolbridge_core::config::Config`) is owned by the core; this module only knows how to
//! get one from disk and the command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use toolbridge_core::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tool bridge server: exposes remote worker tools as authenticated HTTP endpoints")]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "toolbridge.toml")]
    pub config: PathBuf,
}

impl Args {
    pub fn load_config(&self) -> Result<Config> {
        let raw = std::fs::read_to_string(&self.config)
            .with_context(|| format!("reading config file at {}", self.config.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file at {}", self.config.display()))?;
        Ok(config)
    }
}
