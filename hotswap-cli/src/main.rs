//! hotswap: live module hot-reload runtime.
//!
//! # Usage
//!
//! ```text
//! hotswap init [--root <dir>] [--force]
//! hotswap run [--config <path>] [--root <dir>] [--no-full-reload]
//! hotswap reload [<module>]
//! hotswap status [--json]
//! hotswap stop
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    init::InitArgs, reload::ReloadArgs, run::RunArgs, status::StatusArgs, stop::StopArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hotswap",
    version,
    about = "Reload modules in a running process without restarting it",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.hotswap/config.yaml.
    Init(InitArgs),

    /// Run the runtime in the foreground (watcher + control socket).
    Run(RunArgs),

    /// Reload one module, or every tracked module when none is given.
    Reload(ReloadArgs),

    /// Show tracked modules, bindings, and timers of the running runtime.
    Status(StatusArgs),

    /// Ask the running runtime to shut down.
    Stop(StopArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Run(args) => args.run(),
        Commands::Reload(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Stop(args) => args.run(),
    }
}
