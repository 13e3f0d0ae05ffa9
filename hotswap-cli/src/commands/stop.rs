use anyhow::{Context, Result};
use clap::Args;

use hotswap_runtime::{request_stop, RuntimeError};

use super::home_dir;

#[derive(Args, Debug)]
pub struct StopArgs {}

impl StopArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        match request_stop(&home) {
            Ok(()) => println!("runtime stop requested"),
            Err(RuntimeError::NotRunning { .. }) => println!("runtime is not running"),
            Err(err) => return Err(err).context("failed to stop runtime"),
        }
        Ok(())
    }
}
