//! The runtime context: one resolver, module cache, reference registry,
//! timer registry, and event bus, shared by `Arc`.
//!
//! # Reload pipeline
//!
//! ```text
//! hot-reload(id) → cache.load(id) → hot-reload-end(id) → swap → complete
//! ```
//!
//! Only one reload runs at a time. A full reload holds the same token for
//! its whole pass over the tracked modules.

use std::sync::Arc;
use std::time::Instant;

use hotswap_core::{ModuleId, ModuleStatus, Resolver};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::error::RuntimeError;
use crate::events::{EventBus, HotReloadEvent};
use crate::loader::{Export, ModuleCache, ModuleSource};
use crate::reference::{Binding, Property, ReferenceRegistry};
use crate::timers::TimerRegistry;

/// What a reload should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadTarget {
    Module(ModuleId),
    All,
}

impl ReloadTarget {
    pub fn label(&self) -> String {
        match self {
            ReloadTarget::Module(id) => id.to_string(),
            ReloadTarget::All => "*".to_string(),
        }
    }
}

/// Result of reloading one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReload {
    pub module: ModuleId,
    /// Whether a `done` handler installed a new live object.
    pub rebound: bool,
    /// Whether the outgoing object handed over a backup.
    pub backup_carried: bool,
}

/// Result of one pass of the pipeline, scoped or full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadSummary {
    pub target: String,
    pub modules: Vec<ModuleReload>,
    pub duration_ms: u64,
}

pub struct RuntimeContext {
    resolver: Resolver,
    cache: ModuleCache,
    references: ReferenceRegistry,
    timers: TimerRegistry,
    events: EventBus,
    reload_token: Mutex<()>,
}

impl RuntimeContext {
    pub fn new(resolver: Resolver, source: Arc<dyn ModuleSource>) -> Self {
        Self::with_timers(resolver, source, TimerRegistry::new())
    }

    /// Context whose timer registry was restored from a previous run.
    pub fn with_timers(
        resolver: Resolver,
        source: Arc<dyn ModuleSource>,
        timers: TimerRegistry,
    ) -> Self {
        Self {
            resolver,
            cache: ModuleCache::new(source),
            references: ReferenceRegistry::new(),
            timers,
            events: EventBus::new(),
            reload_token: Mutex::new(()),
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn references(&self) -> &ReferenceRegistry {
        &self.references
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HotReloadEvent> {
        self.events.subscribe()
    }

    pub fn resolve(&self, specifier: &str) -> Result<ModuleId, RuntimeError> {
        Ok(self.resolver.resolve(specifier)?)
    }

    /// Re-import `id`, replacing any cached export.
    pub async fn load(&self, id: &ModuleId) -> Result<Export, RuntimeError> {
        self.cache.load(id).await
    }

    pub fn track(&self, id: ModuleId, export: Export) {
        self.cache.track(id, export);
    }

    pub fn is_tracked(&self, id: &ModuleId) -> bool {
        self.cache.is_tracked(id)
    }

    pub fn tracked(&self) -> Vec<ModuleId> {
        self.cache.ids()
    }

    pub fn cached(&self, id: &ModuleId) -> Option<Export> {
        self.cache.get(id)
    }

    /// Resolve `specifier` and load it.
    pub async fn require(&self, specifier: &str) -> Result<(ModuleId, Export), RuntimeError> {
        let id = self.resolve(specifier)?;
        let export = self.cache.load(&id).await?;
        Ok((id, export))
    }

    pub fn bind<T>(&self, property: &Property<T>, id: ModuleId) -> Binding<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.references.bind(property, id)
    }

    pub async fn require_and_bind<T>(
        &self,
        specifier: &str,
        property: &Property<T>,
    ) -> Result<(Export, Binding<T>), RuntimeError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (id, export) = self.require(specifier).await?;
        let binding = self.bind(property, id);
        Ok((export, binding))
    }

    /// Reload one module and hand its binding the new export.
    pub async fn hotreload(&self, id: &ModuleId) -> Result<ModuleReload, RuntimeError> {
        let _token = self.reload_token.lock().await;
        self.reload_locked(id).await
    }

    /// Reload every tracked module, in id order.
    pub async fn hotreload_full(&self) -> Result<Vec<ModuleReload>, RuntimeError> {
        let _token = self.reload_token.lock().await;
        self.events.emit(HotReloadEvent::HotReloadFull);
        let ids = self.cache.ids();
        tracing::info!(modules = ids.len(), "full reload");

        let mut reloads = Vec::with_capacity(ids.len());
        for id in ids {
            reloads.push(self.reload_locked(&id).await?);
        }
        self.events.emit(HotReloadEvent::HotReloadFullEnd);
        Ok(reloads)
    }

    /// Run the pipeline for `target` and time it.
    pub async fn run(&self, target: &ReloadTarget) -> Result<ReloadSummary, RuntimeError> {
        let started = Instant::now();
        let modules = match target {
            ReloadTarget::Module(id) => vec![self.hotreload(id).await?],
            ReloadTarget::All => self.hotreload_full().await?,
        };
        Ok(ReloadSummary {
            target: target.label(),
            modules,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Per-module statistics with the binding label of each bound module.
    pub fn status(&self) -> Vec<ModuleStatus> {
        let labels = self.references.labels();
        let mut status = self.cache.status();
        for entry in &mut status {
            entry.bound_to = labels.get(&entry.id).cloned();
        }
        status
    }

    async fn reload_locked(&self, id: &ModuleId) -> Result<ModuleReload, RuntimeError> {
        self.events.emit(HotReloadEvent::HotReload { id: id.clone() });
        let export = self.cache.load(id).await?;
        self.events.emit(HotReloadEvent::HotReloadEnd { id: id.clone() });

        let Some(handler) = self.references.get(id) else {
            tracing::debug!(module = %id, "no binding; cache refreshed only");
            return Ok(ModuleReload {
                module: id.clone(),
                rebound: false,
                backup_carried: false,
            });
        };

        let backup = handler.swap();
        let backup_carried = backup.is_some();
        let rebound = match handler.complete(&export, backup) {
            Ok(rebound) => rebound,
            Err(err) if err.is_fatal() => {
                tracing::error!(module = %id, binding = %handler.label(), error = %err, "reload failed");
                return Err(err);
            }
            Err(err) => {
                tracing::warn!(module = %id, binding = %handler.label(), error = %err, "done handler failed");
                false
            }
        };

        tracing::info!(
            module = %id,
            binding = %handler.label(),
            backup = backup_carried,
            "module reloaded"
        );
        Ok(ModuleReload {
            module: id.clone(),
            rebound,
            backup_carried,
        })
    }
}
