//! Config file error messages, atomic-write safety, and init behavior.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use hotswap_core::{
    config::{self, HotswapConfig},
    ConfigError,
};
use predicates::prelude::predicate;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".hotswap/config.yaml")
        .write_str("source_root: [unclosed\n  debounce_ms: : :")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_wrong_field_type_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".hotswap/config.yaml")
        .write_str("debounce_ms: soon\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &HotswapConfig::default()).expect("save");

    home.child(".hotswap/config.yaml")
        .assert(predicate::path::exists());
    home.child(".hotswap/config.yaml.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn save_then_load_preserves_every_field() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let config = HotswapConfig {
        source_root: PathBuf::from("/srv/bot/modules"),
        enabled: false,
        full_reload_on_untracked: true,
        debounce_ms: 50,
        extensions: vec!["json".to_string()],
        ignore_patterns: vec![],
        ..HotswapConfig::default()
    };
    config::save_at(home.path(), &config).expect("save");
    assert_eq!(config::load_at(home.path()).expect("load"), config);
}

#[cfg(unix)]
#[test]
fn saved_config_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &HotswapConfig::default()).expect("save");
    let mode = fs::metadata(config::config_path_at(home.path()))
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_config_with_source_root() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let created = config::init_at(home.path(), PathBuf::from("/srv/bot/modules"), false)
        .expect("init");

    home.child(".hotswap/config.yaml")
        .assert(predicate::str::contains("source_root: /srv/bot/modules"));
    assert_eq!(config::load_at(home.path()).expect("load"), created);
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), PathBuf::from("first"), false).expect("first init");

    let err = config::init_at(home.path(), PathBuf::from("second"), false).unwrap_err();
    assert!(matches!(err, ConfigError::AlreadyExists { .. }), "got: {err}");
    assert!(err.to_string().contains("--force"));

    config::init_at(home.path(), PathBuf::from("second"), true).expect("forced init");
    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.source_root, PathBuf::from("second"));
}
