//! `hotswap init [--root <dir>] [--force]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use hotswap_core::config;

use super::home_dir;

/// Write a default config pointing at a module directory.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory holding the reloadable modules. Created if missing.
    #[arg(long, default_value = "modules")]
    pub root: PathBuf,

    /// Overwrite an existing config.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("cannot create '{}'", self.root.display()))?;
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.root.display()))?;

        let config = config::init_at(&home, root, self.force)
            .context("failed to write hotswap config")?;

        println!("✓ Wrote {}", config::config_path_at(&home).display());
        println!("  Source root: {}", config.source_root.display());
        println!("  Watching: {}", config.extensions.join(", "));
        Ok(())
    }
}
