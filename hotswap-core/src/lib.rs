//! hotswap core library: module identities, backup payloads, config, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes and status structs
//! - [`resolve`]: specifier → [`ModuleId`] canonicalization
//! - [`state`]: [`BackupState`] and the [`Reloadable`] contract
//! - [`config`]: load / save / init of `config.yaml`
//! - [`error`]: [`ConfigError`], [`ResolveError`]

pub mod config;
pub mod error;
pub mod resolve;
pub mod state;
pub mod types;

pub use config::HotswapConfig;
pub use error::{ConfigError, ResolveError};
pub use resolve::Resolver;
pub use state::{BackupState, Reloadable};
pub use types::{ModuleId, ModuleStatus, TimerKind, TimerName};
