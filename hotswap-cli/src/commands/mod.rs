pub mod init;
pub mod reload;
pub mod run;
pub mod status;
pub mod stop;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
