use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use hotswap_core::HotswapConfig;
use hotswap_runtime::paths::{socket_path, HEARTBEAT_TIMER};
use hotswap_runtime::{request_reload, request_status, request_stop, request_timers, RuntimeError};
use tempfile::TempDir;

fn wait_for_socket(home: &std::path::Path) {
    let socket = socket_path(home);
    for _ in 0..100 {
        if socket.exists() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("socket never appeared at {}", socket.display());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_reload_and_stop_over_the_socket() {
    let home = TempDir::new().expect("home");
    let root = home.path().join("modules");
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("ping.yaml"), "reply: pong\n").expect("write");

    let config = HotswapConfig {
        source_root: root.clone(),
        enabled: false,
        ..HotswapConfig::default()
    };
    let runtime = tokio::spawn(hotswap_runtime::run(home.path().to_path_buf(), config));

    let home_path: PathBuf = home.path().to_path_buf();
    let client = tokio::task::spawn_blocking(move || {
        wait_for_socket(&home_path);

        let status = request_status(&home_path).expect("status");
        assert!(status.running);
        assert_eq!(status.module("ping").and_then(|m| m.revision), Some(1));

        let timers = request_timers(&home_path).expect("timers");
        assert_eq!(timers[0].name.0, HEARTBEAT_TIMER);

        fs::write(root.join("ping.yaml"), "reply: PONG\n").expect("rewrite");
        let summary = request_reload(&home_path, Some("ping.yaml".to_string())).expect("reload");
        assert_eq!(summary.target, "ping");
        assert!(summary.modules[0].rebound);

        let err = request_reload(&home_path, Some("nope".to_string())).unwrap_err();
        assert!(matches!(err, RuntimeError::Protocol(_)), "got: {err}");

        fs::write(root.join("extra.json"), "{\"enabled\": true}").expect("write extra");
        let refreshed = request_reload(&home_path, Some("extra".to_string())).expect("cache refresh");
        assert!(!refreshed.modules[0].rebound);

        let full = request_reload(&home_path, None).expect("full reload");
        assert_eq!(full.target, "*");
        assert_eq!(full.modules.len(), 2);

        let status = request_status(&home_path).expect("status");
        assert_eq!(status.reloads, 3);
        assert_eq!(status.module("ping").and_then(|m| m.revision), Some(3));
        let extra = status.module("extra").expect("extra tracked");
        assert_eq!(extra.revision, None);
        assert_eq!(extra.status.bound_to, None);

        request_stop(&home_path).expect("stop");
    });

    client.await.expect("client");
    let result = tokio::time::timeout(Duration::from_secs(10), runtime)
        .await
        .expect("runtime exits after stop")
        .expect("join");
    assert!(result.is_ok(), "runtime error: {result:?}");
    assert!(!socket_path(home.path()).exists(), "socket removed on shutdown");
}

#[test]
fn requests_fail_cleanly_without_a_runtime() {
    let home = TempDir::new().expect("home");
    let err = request_stop(home.path()).unwrap_err();
    assert!(matches!(err, RuntimeError::NotRunning { .. }));
}
