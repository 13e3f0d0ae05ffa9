use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hotswap_core::{HotswapConfig, ModuleId};
use hotswap_runtime::watcher::{self, SourceWatcher};
use hotswap_runtime::{
    DocumentSet, HotReloadEvent, ManifestSource, ReloadSummary, ReloadTarget, RuntimeContext,
};
use tempfile::TempDir;
use tokio::time::{timeout, Instant};

struct Fixture {
    _dir: TempDir,
    root: std::path::PathBuf,
    ctx: Arc<RuntimeContext>,
    documents: DocumentSet,
    config: HotswapConfig,
}

async fn fixture(full_reload_on_untracked: bool) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path().join("modules");
    fs::create_dir_all(root.join("commands")).expect("mkdir");
    fs::write(root.join("commands/ping.yaml"), "reply: pong\n").expect("write");
    fs::write(root.join("settings.json"), "{\"prefix\": \"!\"}").expect("write");

    let config = HotswapConfig {
        source_root: root.clone(),
        full_reload_on_untracked,
        debounce_ms: 50,
        ..HotswapConfig::default()
    };
    let resolver = config.resolver();
    let source = Arc::new(ManifestSource::new(resolver.clone()));
    let ctx = Arc::new(RuntimeContext::new(resolver, source.clone()));
    let documents = DocumentSet::mount(&ctx, &source).await.expect("mount");

    Fixture {
        _dir: dir,
        root,
        ctx,
        documents,
        config,
    }
}

/// Write `contents` to `path` and run reloads for watcher targets until one
/// matches `wanted`.
async fn change_and_reload(
    fixture: &Fixture,
    path: &Path,
    contents: &str,
    wanted: fn(&ReloadTarget) -> bool,
) -> ReloadSummary {
    let (_watcher, mut events) = watcher::watch(fixture.ctx.resolver().root()).expect("watch");
    let mut source_watcher = SourceWatcher::new(fixture.ctx.clone(), fixture.config.clone());

    // Give the backend a moment to register before the write lands.
    tokio::time::sleep(Duration::from_millis(200)).await;
    fs::write(path, contents).expect("write");

    let deadline = Duration::from_secs(10);
    timeout(deadline, async {
        loop {
            let event = events.recv().await.expect("watcher channel open").expect("event");
            for target in source_watcher.on_event(event, Instant::now()) {
                if wanted(&target) {
                    return fixture.ctx.run(&target).await.expect("reload");
                }
            }
        }
    })
    .await
    .expect("reload within deadline")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn editing_a_tracked_document_reloads_it() {
    let fixture = fixture(false).await;
    let mut rx = fixture.ctx.subscribe();
    let path = fixture.root.join("commands/ping.yaml");

    let summary = change_and_reload(&fixture, &path, "reply: PONG\n", |target| {
        matches!(target, ReloadTarget::Module(_))
    })
    .await;

    let id = ModuleId::from("commands/ping");
    assert_eq!(summary.target, "commands/ping");
    let doc = fixture.documents.get(&id).expect("document");
    assert_eq!(doc.revision, 2);
    assert_eq!(doc.body["reply"], "PONG");

    let mut saw_file_changed = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, HotReloadEvent::FileChanged { .. }) {
            saw_file_changed = true;
        }
    }
    assert!(saw_file_changed);
    assert_eq!(
        fixture.documents.get(&ModuleId::from("settings")).expect("settings").revision,
        1,
        "other documents untouched"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_untracked_file_triggers_full_reload() {
    let fixture = fixture(true).await;
    let mut rx = fixture.ctx.subscribe();
    let path = fixture.root.join("commands/pong.yaml");

    let summary = change_and_reload(&fixture, &path, "reply: ping\n", |target| {
        *target == ReloadTarget::All
    })
    .await;

    assert_eq!(summary.target, "*");
    assert_eq!(summary.modules.len(), 2);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let first = events
        .iter()
        .position(|e| *e == HotReloadEvent::HotReloadFull)
        .expect("full start");
    let last = events
        .iter()
        .position(|e| *e == HotReloadEvent::HotReloadFullEnd)
        .expect("full end");
    assert!(first < last);
    let scoped = events[first..last]
        .iter()
        .filter(|e| matches!(e, HotReloadEvent::HotReloadEnd { .. }))
        .count();
    assert_eq!(scoped, 2);
    assert!(!fixture.ctx.is_tracked(&ModuleId::from("commands/pong")));
}
