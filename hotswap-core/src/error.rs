//! Error types for hotswap-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or saving `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, rename failure, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, annotated with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// `init` refused to overwrite an existing config.
    #[error("config already exists at {path}; pass --force to overwrite")]
    AlreadyExists { path: PathBuf },
}

/// Errors raised while canonicalizing a module specifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("empty module specifier")]
    Empty,

    /// Absolute path, or `..` segments, pointing outside the source root.
    #[error("'{specifier}' resolves outside the source root {root}")]
    OutsideRoot { specifier: String, root: PathBuf },
}
