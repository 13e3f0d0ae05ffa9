//! Bindings from an owner's property to a module identity.
//!
//! A reload of a bound module runs two handlers on the binding: `reloading`
//! before the new export replaces the live object (so the outgoing object
//! can hand over its state), and `done` once the new export is in the cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hotswap_core::{BackupState, ModuleId};
use parking_lot::{Mutex, RwLock};

use crate::error::RuntimeError;
use crate::loader::Export;

/// A named slot on an owner holding the current live object.
///
/// Clones share the slot, so a binding and the owner always see the same value.
pub struct Property<T: ?Sized> {
    owner: Arc<str>,
    name: Arc<str>,
    value: Arc<RwLock<Option<Arc<T>>>>,
}

impl<T: ?Sized> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

impl<T: ?Sized> Property<T> {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: Arc::from(owner.into()),
            name: Arc::from(name.into()),
            value: Arc::new(RwLock::new(None)),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.value.read().clone()
    }

    /// Store `value`, returning whatever was there.
    pub fn set(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.value.write().replace(value)
    }

    pub fn take(&self) -> Option<Arc<T>> {
        self.value.write().take()
    }

    pub fn is_set(&self) -> bool {
        self.value.read().is_some()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `owner.name`
    pub fn label(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

impl<T: ?Sized> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("set", &self.is_set())
            .finish()
    }
}

/// Where a `reloading` handler leaves state for the replacement.
#[derive(Debug, Default)]
pub struct BackupSlot(Option<BackupState>);

impl BackupSlot {
    pub fn put(&mut self, state: BackupState) {
        self.0 = Some(state);
    }

    pub fn get(&self) -> Option<&BackupState> {
        self.0.as_ref()
    }

    pub fn into_inner(self) -> Option<BackupState> {
        self.0
    }
}

type ReloadingFn<T> = Arc<dyn Fn(&Property<T>, &mut BackupSlot) + Send + Sync>;
type DoneFn<T> =
    Arc<dyn Fn(&Property<T>, &Export, Option<BackupState>) -> Result<(), RuntimeError> + Send + Sync>;

struct Handlers<T: ?Sized> {
    reloading: Option<ReloadingFn<T>>,
    done: Option<DoneFn<T>>,
}

/// One property bound to one module identity.
pub struct Binding<T: ?Sized> {
    id: ModuleId,
    property: Property<T>,
    handlers: Arc<Mutex<Handlers<T>>>,
}

impl<T: ?Sized> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            property: self.property.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

impl<T: ?Sized> Binding<T> {
    fn new(id: ModuleId, property: Property<T>) -> Self {
        Self {
            id,
            property,
            handlers: Arc::new(Mutex::new(Handlers {
                reloading: None,
                done: None,
            })),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn property(&self) -> &Property<T> {
        &self.property
    }

    /// Runs before the replacement is built. Put the outgoing object's
    /// state into the slot to carry it over.
    pub fn on_reloading<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Property<T>, &mut BackupSlot) + Send + Sync + 'static,
    {
        self.handlers.lock().reloading = Some(Arc::new(handler));
        self
    }

    /// Runs after the new export is cached, with the state captured by the
    /// `reloading` handler.
    pub fn on_done<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Property<T>, &Export, Option<BackupState>) -> Result<(), RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.lock().done = Some(Arc::new(handler));
        self
    }
}

/// Type-erased view of a [`Binding`] used by the reload pipeline.
pub trait ReloadHandler: Send + Sync {
    fn label(&self) -> String;

    /// Capture the outgoing object's state.
    fn swap(&self) -> Option<BackupState>;

    /// Install the new export. `Ok(false)` means no `done` handler is attached
    /// and the property was left alone.
    fn complete(&self, export: &Export, backup: Option<BackupState>) -> Result<bool, RuntimeError>;
}

impl<T: ?Sized + Send + Sync + 'static> ReloadHandler for Binding<T> {
    fn label(&self) -> String {
        self.property.label()
    }

    fn swap(&self) -> Option<BackupState> {
        let handler = self.handlers.lock().reloading.clone();
        let handler = handler?;
        let mut slot = BackupSlot::default();
        handler(&self.property, &mut slot);
        slot.into_inner()
    }

    fn complete(&self, export: &Export, backup: Option<BackupState>) -> Result<bool, RuntimeError> {
        let handler = self.handlers.lock().done.clone();
        match handler {
            Some(handler) => {
                handler(&self.property, export, backup)?;
                Ok(true)
            }
            None => {
                tracing::warn!(
                    module = %self.id,
                    binding = %self.property.label(),
                    "binding has no done handler; property keeps the old object"
                );
                Ok(false)
            }
        }
    }
}

/// Identity → the single binding reloads of that identity go through.
#[derive(Default)]
pub struct ReferenceRegistry {
    refs: RwLock<HashMap<ModuleId, Arc<dyn ReloadHandler>>>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `property` to `id`. A later bind of the same id replaces the
    /// earlier one.
    pub fn bind<T>(&self, property: &Property<T>, id: ModuleId) -> Binding<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let binding = Binding::new(id.clone(), property.clone());
        let previous = self
            .refs
            .write()
            .insert(id.clone(), Arc::new(binding.clone()));
        if let Some(previous) = previous {
            tracing::warn!(
                module = %id,
                previous = %previous.label(),
                binding = %property.label(),
                "module rebound; earlier binding no longer receives reloads"
            );
        }
        binding
    }

    pub fn unbind(&self, id: &ModuleId) -> bool {
        self.refs.write().remove(id).is_some()
    }

    pub fn get(&self, id: &ModuleId) -> Option<Arc<dyn ReloadHandler>> {
        self.refs.read().get(id).cloned()
    }

    pub fn is_bound(&self, id: &ModuleId) -> bool {
        self.refs.read().contains_key(id)
    }

    /// Identity → `owner.name` of its binding.
    pub fn labels(&self) -> HashMap<ModuleId, String> {
        self.refs
            .read()
            .iter()
            .map(|(id, handler)| (id.clone(), handler.label()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.refs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_clones_share_the_slot() {
        let property: Property<String> = Property::new("bot", "greeter");
        let alias = property.clone();
        assert!(property.set(Arc::new("hi".to_string())).is_none());
        assert_eq!(alias.get().as_deref().map(String::as_str), Some("hi"));
        assert_eq!(alias.take().as_deref().map(String::as_str), Some("hi"));
        assert!(!property.is_set());
        assert_eq!(property.label(), "bot.greeter");
    }

    #[test]
    fn swap_without_reloading_handler_carries_nothing() {
        let registry = ReferenceRegistry::new();
        let property: Property<u32> = Property::new("bot", "count");
        registry.bind(&property, ModuleId::from("count"));

        let handler = registry.get(&ModuleId::from("count")).expect("bound");
        assert!(handler.swap().is_none());
    }

    #[test]
    fn handlers_run_in_order_with_the_captured_state() {
        let registry = ReferenceRegistry::new();
        let property: Property<u32> = Property::new("bot", "count");
        property.set(Arc::new(7));

        let binding = registry.bind(&property, ModuleId::from("count"));
        binding
            .on_reloading(|property, slot| {
                let current = property.get().map(|v| *v).unwrap_or(0);
                slot.put(BackupState::encode(&current).expect("encode"));
            })
            .on_done(|property, _export, backup| {
                let carried: u32 = backup.map(|b| b.decode()).transpose()?.unwrap_or(0);
                property.set(Arc::new(carried * 10));
                Ok(())
            });

        let handler = registry.get(binding.id()).expect("bound");
        let backup = handler.swap();
        assert!(backup.is_some());
        assert!(handler.complete(&Export::new(()), backup).expect("complete"));
        assert_eq!(property.get().as_deref(), Some(&70));
    }

    #[test]
    fn complete_without_done_handler_leaves_property() {
        let registry = ReferenceRegistry::new();
        let property: Property<u32> = Property::new("bot", "count");
        property.set(Arc::new(1));
        registry.bind(&property, ModuleId::from("count"));

        let handler = registry.get(&ModuleId::from("count")).expect("bound");
        assert!(!handler.complete(&Export::new(2u32), None).expect("complete"));
        assert_eq!(property.get().as_deref(), Some(&1));
    }

    #[test]
    fn last_bind_wins() {
        let registry = ReferenceRegistry::new();
        let first: Property<u32> = Property::new("a", "value");
        let second: Property<u32> = Property::new("b", "value");
        registry.bind(&first, ModuleId::from("shared"));
        registry.bind(&second, ModuleId::from("shared"));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.labels().get(&ModuleId::from("shared")).map(String::as_str),
            Some("b.value")
        );
        assert!(registry.unbind(&ModuleId::from("shared")));
        assert!(registry.is_empty());
    }
}
