use std::path::PathBuf;

use hotswap_core::{ModuleId, ResolveError};
use thiserror::Error;

/// Error surface for the reload pipeline, watcher, and control socket.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] hotswap_core::ConfigError),

    #[error("cannot resolve module: {0}")]
    Resolve(#[from] ResolveError),

    /// Re-importing a module failed. Fatal: the runtime shuts down.
    #[error("failed to load module '{id}': {reason}")]
    ModuleLoad { id: ModuleId, reason: String },

    /// A module exported something other than what its binding expects.
    /// Fatal for the same reason as `ModuleLoad`.
    #[error("module '{id}' exports {found}, expected {expected}")]
    ExportShape {
        id: ModuleId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("runtime protocol error: {0}")]
    Protocol(String),

    #[error("runtime is not running (socket missing: {socket})")]
    NotRunning { socket: PathBuf },
}

impl RuntimeError {
    /// Load-class failures. The runtime loop shuts down on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::ModuleLoad { .. } | RuntimeError::ExportShape { .. }
        )
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.into(),
        source,
    }
}
