//! Module cache and loader.
//!
//! "Re-importing" a module means asking its [`ModuleSource`] to build a fresh
//! [`Export`] for the module's identity. The cache holds at most one export
//! per identity: the old entry is removed before every load.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hotswap_core::{ModuleId, ModuleStatus};
use parking_lot::RwLock;

use crate::error::RuntimeError;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// A module's exported value: a factory, a class-like constructor, or a
/// plain document. Cloning shares the value.
#[derive(Clone)]
pub struct Export {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Export {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// Whether both exports came from the same load.
    pub fn ptr_eq(&self, other: &Export) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("type", &self.type_name)
            .finish()
    }
}

/// Where module code comes from. Implementations must build a new export on
/// every call; the cache never asks twice for one load.
pub trait ModuleSource: Send + Sync + 'static {
    fn load(&self, id: &ModuleId) -> Result<Export, SourceError>;
}

pub type ModuleFactory = Arc<dyn Fn() -> Result<Export, SourceError> + Send + Sync>;

/// In-process factories keyed by stable module id.
///
/// Registering a new factory under an existing id is how new code is
/// installed; the next reload of that id picks it up.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<ModuleId, ModuleFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `factory` for `id`, returning the one it replaces.
    pub fn register<F>(&self, id: impl Into<ModuleId>, factory: F) -> Option<ModuleFactory>
    where
        F: Fn() -> Result<Export, SourceError> + Send + Sync + 'static,
    {
        self.factories.write().insert(id.into(), Arc::new(factory))
    }

    pub fn unregister(&self, id: &ModuleId) -> Option<ModuleFactory> {
        self.factories.write().remove(id)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.factories.read().contains_key(id)
    }
}

impl ModuleSource for FactoryRegistry {
    fn load(&self, id: &ModuleId) -> Result<Export, SourceError> {
        let factory = self
            .factories
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| format!("no factory registered for '{id}'"))?;
        factory()
    }
}

struct Tracked {
    export: Export,
    loads: u64,
    last_loaded_at: DateTime<Utc>,
}

/// Identity → current export.
pub struct ModuleCache {
    source: Arc<dyn ModuleSource>,
    entries: RwLock<HashMap<ModuleId, Tracked>>,
}

impl ModuleCache {
    pub fn new(source: Arc<dyn ModuleSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached export for `id`, re-import it, and cache the result.
    ///
    /// A failure is fatal for the caller: the entry stays removed and the
    /// error is logged here before it propagates.
    pub async fn load(&self, id: &ModuleId) -> Result<Export, RuntimeError> {
        let previous_loads = self
            .entries
            .write()
            .remove(id)
            .map(|tracked| tracked.loads)
            .unwrap_or(0);

        let source = self.source.clone();
        let load_id = id.clone();
        let loaded = match tokio::task::spawn_blocking(move || source.load(&load_id)).await {
            Ok(loaded) => loaded,
            Err(err) if err.is_panic() => Err(panic_reason(err.into_panic()).into()),
            Err(err) => Err(err.to_string().into()),
        };

        match loaded {
            Ok(export) => {
                self.entries.write().insert(
                    id.clone(),
                    Tracked {
                        export: export.clone(),
                        loads: previous_loads + 1,
                        last_loaded_at: Utc::now(),
                    },
                );
                tracing::debug!(module = %id, export = export.type_name(), "module loaded");
                Ok(export)
            }
            Err(err) => {
                tracing::error!(module = %id, error = %err, "module load failed");
                Err(RuntimeError::ModuleLoad {
                    id: id.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Record `export` as the current value of `id` without loading.
    pub fn track(&self, id: ModuleId, export: Export) {
        let mut entries = self.entries.write();
        let loads = entries.get(&id).map(|t| t.loads).unwrap_or(0) + 1;
        entries.insert(
            id,
            Tracked {
                export,
                loads,
                last_loaded_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, id: &ModuleId) -> Option<Export> {
        self.entries.read().get(id).map(|t| t.export.clone())
    }

    pub fn is_tracked(&self, id: &ModuleId) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Tracked identities, sorted.
    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-module statistics, sorted by id. `bound_to` is filled by the caller.
    pub fn status(&self) -> Vec<ModuleStatus> {
        let entries = self.entries.read();
        let mut status: Vec<ModuleStatus> = entries
            .iter()
            .map(|(id, tracked)| ModuleStatus {
                id: id.clone(),
                loads: tracked.loads,
                last_loaded_at: tracked.last_loaded_at,
                bound_to: None,
            })
            .collect();
        status.sort_by(|a, b| a.id.cmp(&b.id));
        status
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("module panicked while loading: {message}")
}
