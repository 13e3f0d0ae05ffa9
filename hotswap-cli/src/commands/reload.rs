//! `hotswap reload [<module>]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use hotswap_runtime::request_reload;

use super::home_dir;

#[derive(Args, Debug)]
pub struct ReloadArgs {
    /// Module to reload (`commands/ping`, `./commands/ping.yaml`, ...).
    /// Omit to reload every tracked module.
    pub module: Option<String>,
}

impl ReloadArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let label = self.module.clone().unwrap_or_else(|| "all modules".to_string());
        let summary = request_reload(&home, self.module)
            .with_context(|| format!("reload failed for '{label}'"))?;

        if summary.target == "*" {
            println!(
                "✓ full reload: {} modules in {} ms",
                summary.modules.len(),
                summary.duration_ms
            );
        } else {
            println!("✓ reloaded '{}' in {} ms", summary.target, summary.duration_ms);
        }
        for line in summary.modules {
            let binding = if line.rebound {
                "rebound".green().to_string()
            } else {
                "cache only".bright_black().to_string()
            };
            let state = if line.backup_carried {
                "state carried"
            } else {
                "cold start"
            };
            println!("  {}: {binding}, {state}", line.module);
        }
        Ok(())
    }
}
