//! Identity resolution: every way of naming a module lands on one `ModuleId`.
//!
//! Each `#[case]` is isolated: no shared state.

use std::path::PathBuf;

use hotswap_core::{ModuleId, ResolveError, Resolver};
use rstest::rstest;

fn resolver() -> Resolver {
    Resolver::new("/srv/bot/modules")
}

#[rstest]
#[case::bare("commands/ping")]
#[case::dot_prefix("./commands/ping")]
#[case::with_extension("commands/ping.yaml")]
#[case::alternate_extension("commands/ping.json")]
#[case::backslashes("commands\\ping.yml")]
#[case::mixed_separators(".\\commands/ping")]
#[case::doubled_separators("commands//ping")]
#[case::absolute("/srv/bot/modules/commands/ping.yaml")]
#[case::absolute_trailing_dot_segment("/srv/bot/modules/./commands/ping")]
#[case::surrounding_whitespace("  commands/ping.yaml \n")]
fn specifier_resolves_to_canonical_identity(#[case] specifier: &str) {
    let id = resolver().resolve(specifier).expect("resolve");
    assert_eq!(id, ModuleId::from("commands/ping"));
}

#[rstest]
#[case("counter")]
#[case("./commands/ping.yaml")]
#[case("nested\\deep/module.json")]
#[case("/srv/bot/modules/timers.yml")]
fn resolve_is_idempotent(#[case] specifier: &str) {
    let r = resolver();
    let once = r.resolve(specifier).expect("first resolve");
    let twice = r.resolve(once.as_str()).expect("second resolve");
    assert_eq!(once, twice);
}

#[rstest]
#[case("")]
#[case("   ")]
#[case("./")]
#[case("/srv/bot/modules")]
fn empty_specifiers_are_rejected(#[case] specifier: &str) {
    assert_eq!(resolver().resolve(specifier), Err(ResolveError::Empty));
}

#[test]
fn windows_drive_paths_are_treated_as_absolute() {
    let err = resolver().resolve("C:\\bot\\modules\\ping.yaml").unwrap_err();
    assert!(matches!(err, ResolveError::OutsideRoot { .. }), "got: {err}");
}

#[test]
fn real_root_and_configured_root_resolve_alike() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let root = dir.path().join("modules");
    std::fs::create_dir_all(&root).expect("mkdir");

    let r = Resolver::new(&root);
    let canonical = std::fs::canonicalize(&root).expect("canonicalize");

    let via_configured = r.resolve_path(&root.join("ping.yaml")).expect("configured");
    let via_canonical = r
        .resolve_path(&canonical.join("ping.yaml"))
        .expect("canonical");
    assert_eq!(via_configured, via_canonical);
    assert_eq!(r.root(), canonical.as_path());
}

#[test]
fn custom_extensions_replace_defaults() {
    let r = resolver().with_extensions(["toml"]);
    assert_eq!(r.resolve("ping.toml").unwrap(), ModuleId::from("ping"));
    assert_eq!(r.resolve("ping.yaml").unwrap(), ModuleId::from("ping.yaml"));
    assert_eq!(
        r.candidate_paths(&ModuleId::from("ping")),
        vec![PathBuf::from("/srv/bot/modules/ping.toml")]
    );
}
