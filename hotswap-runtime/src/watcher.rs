//! Filesystem watcher turning source changes into reload targets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hotswap_core::HotswapConfig;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::context::{ReloadTarget, RuntimeContext};
use crate::error::{io_err, RuntimeError};
use crate::events::HotReloadEvent;

/// Entries older than this are dropped from the debounce map.
const DEBOUNCE_RETENTION: Duration = Duration::from_secs(30);

pub type EventReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Start a recursive watch on `root`. Keep the returned watcher alive for as
/// long as events are wanted.
pub fn watch(root: &Path) -> Result<(RecommendedWatcher, EventReceiver), RuntimeError> {
    if !root.exists() {
        std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    }
    let (event_tx, event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching source tree");
    Ok((watcher, event_rx))
}

pub fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Decides what, if anything, a changed path should reload.
pub struct SourceWatcher {
    ctx: Arc<RuntimeContext>,
    config: HotswapConfig,
    debounce: HashMap<PathBuf, Instant>,
}

impl SourceWatcher {
    pub fn new(ctx: Arc<RuntimeContext>, config: HotswapConfig) -> Self {
        Self {
            ctx,
            config,
            debounce: HashMap::new(),
        }
    }

    /// Tracked path → scoped reload. Untracked path → full reload, only if
    /// `full_reload_on_untracked` is set.
    pub fn classify(&self, path: &Path) -> Option<ReloadTarget> {
        if !self.config.should_watch(path) {
            return None;
        }
        let id = match self.ctx.resolver().resolve_path(path) {
            Ok(id) => id,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "ignoring change outside source root");
                return None;
            }
        };
        if self.ctx.is_tracked(&id) {
            return Some(ReloadTarget::Module(id));
        }
        if self.config.full_reload_on_untracked {
            return Some(ReloadTarget::All);
        }
        tracing::debug!(module = %id, "untracked module changed; full reload disabled");
        None
    }

    /// Filter, debounce, and classify one changed path. Emits `file-changed`
    /// for tracked modules.
    pub fn on_path(&mut self, path: &Path, now: Instant) -> Option<ReloadTarget> {
        if !self.config.should_watch(path) {
            return None;
        }
        if !should_process_event(&mut self.debounce, path, now, self.config.debounce()) {
            return None;
        }
        let target = self.classify(path)?;
        if matches!(target, ReloadTarget::Module(_)) {
            self.ctx.events().emit(HotReloadEvent::FileChanged {
                path: path.to_path_buf(),
            });
        }
        Some(target)
    }

    /// Targets for every relevant path in `event`, in order.
    pub fn on_event(&mut self, event: Event, now: Instant) -> Vec<ReloadTarget> {
        if !is_relevant_event_kind(&event.kind) {
            return Vec::new();
        }
        event
            .paths
            .iter()
            .filter_map(|path| self.on_path(path, now))
            .collect()
    }
}

pub(crate) fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= DEBOUNCE_RETENTION);
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}
