//! `hotswap run`: the runtime in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hotswap_core::{config, ConfigError, HotswapConfig};
use hotswap_runtime::start_blocking;

use super::home_dir;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file to use instead of ~/.hotswap/config.yaml.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the configured source root.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Never reload everything when an untracked file changes.
    #[arg(long)]
    pub no_full_reload: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let config = self.resolve_config(&home)?;
        start_blocking(&home, config).context("runtime exited with error")?;
        Ok(())
    }

    fn resolve_config(&self, home: &std::path::Path) -> Result<HotswapConfig> {
        let loaded = match &self.config {
            Some(path) => config::load_from(path),
            None => config::load_at(home),
        };
        let mut config = match loaded {
            Ok(config) => config,
            Err(ConfigError::NotFound { .. }) if self.config.is_none() => {
                eprintln!("no config found; using defaults (run `hotswap init` to create one)");
                HotswapConfig::default()
            }
            Err(err) => return Err(err).context("failed to load hotswap config"),
        };

        if let Some(root) = &self.root {
            config.source_root = root.clone();
        }
        if self.no_full_reload {
            config.full_reload_on_untracked = false;
        }
        Ok(config)
    }
}
