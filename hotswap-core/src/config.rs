//! Runtime configuration stored as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.hotswap/
//!   config.yaml   (mode 0600, written by `hotswap init`)
//! ```
//!
//! # API pattern
//!
//! Every file-touching function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::resolve::{Resolver, DEFAULT_EXTENSIONS};

pub const CONFIG_VERSION: u32 = 1;

/// Watcher and reload settings for one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotswapConfig {
    pub version: u32,
    /// Directory holding the reloadable modules. Relative paths are resolved
    /// against the working directory of `hotswap run`.
    pub source_root: PathBuf,
    /// Master switch for the filesystem watcher.
    pub enabled: bool,
    /// Reload every tracked module when an untracked file changes.
    /// Expensive; keep off outside development.
    pub full_reload_on_untracked: bool,
    pub debounce_ms: u64,
    pub extensions: Vec<String>,
    /// `*suffix`, `prefix*`, or exact file-name patterns.
    pub ignore_patterns: Vec<String>,
}

impl Default for HotswapConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            source_root: PathBuf::from("modules"),
            enabled: true,
            full_reload_on_untracked: false,
            debounce_ms: 500,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ignore_patterns: vec!["*.tmp".to_string(), "*.swp".to_string(), "*~".to_string()],
        }
    }
}

impl HotswapConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(&self.source_root).with_extensions(self.extensions.iter().cloned())
    }

    /// Whether a changed path is worth a reload decision at all.
    pub fn should_watch(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.extensions.is_empty()
            && !self
                .extensions
                .iter()
                .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
        {
            return false;
        }

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self
            .ignore_patterns
            .iter()
            .any(|pattern| matches_pattern(pattern, file_name))
    }
}

fn matches_pattern(pattern: &str, file_name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        return file_name.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return file_name.starts_with(prefix);
    }
    file_name == pattern
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.hotswap/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".hotswap").join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load a config file.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path)
/// if malformed YAML.
pub fn load_from(path: &Path) -> Result<HotswapConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_at(home: &Path) -> Result<HotswapConfig, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<HotswapConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically write `config` to `path`.
///
/// Write flow: serialize → `.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_to(path: &Path, config: &HotswapConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            set_dir_permissions(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn save_at(home: &Path, config: &HotswapConfig) -> Result<(), ConfigError> {
    save_to(&config_path_at(home), config)
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Scaffold `<home>/.hotswap/config.yaml` pointing at `source_root`.
///
/// Refuses to overwrite an existing file unless `force` is set.
pub fn init_at(
    home: &Path,
    source_root: PathBuf,
    force: bool,
) -> Result<HotswapConfig, ConfigError> {
    let path = config_path_at(home);
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists { path });
    }
    let config = HotswapConfig {
        source_root,
        ..HotswapConfig::default()
    };
    save_to(&path, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init(source_root: PathBuf, force: bool) -> Result<HotswapConfig, ConfigError> {
    init_at(&home()?, source_root, force)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
