//! Lifecycle events broadcast to collaborators while reloads run.

use std::path::PathBuf;

use hotswap_core::ModuleId;
use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HotReloadEvent {
    /// A scoped reload of `id` started; the cached export is about to be dropped.
    HotReload { id: ModuleId },
    /// `id` was re-imported and its cache entry refreshed.
    HotReloadEnd { id: ModuleId },
    HotReloadFull,
    HotReloadFullEnd,
    /// The watcher saw a change to a tracked module's file.
    FileChanged { path: PathBuf },
}

impl HotReloadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HotReloadEvent::HotReload { .. } => "hot-reload",
            HotReloadEvent::HotReloadEnd { .. } => "hot-reload-end",
            HotReloadEvent::HotReloadFull => "hot-reload-full",
            HotReloadEvent::HotReloadFullEnd => "hot-reload-full-end",
            HotReloadEvent::FileChanged { .. } => "file-changed",
        }
    }
}

/// Fan-out of [`HotReloadEvent`]s. Emitting with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HotReloadEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HotReloadEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: HotReloadEvent) {
        tracing::debug!(event = event.name(), "emit");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kebab_tags() {
        let json = serde_json::to_value(HotReloadEvent::HotReloadEnd {
            id: ModuleId::from("counter"),
        })
        .expect("serialize");
        assert_eq!(json["event"], "hot-reload-end");
        assert_eq!(json["id"], "counter");
        assert_eq!(HotReloadEvent::HotReloadFull.name(), "hot-reload-full");
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(HotReloadEvent::HotReloadFull);

        let mut rx = bus.subscribe();
        bus.emit(HotReloadEvent::HotReloadFullEnd);
        assert_eq!(rx.recv().await.expect("event"), HotReloadEvent::HotReloadFullEnd);
    }
}
