//! Preset builders wiring a bound property to a reloadable live object.
//!
//! Two export shapes are supported:
//!
//! - [`Factory`] for singleton-style modules: the export is an `init`
//!   function returning the live object.
//! - [`Class`] for instance-style modules: the export is a constructor.
//!
//! Both receive the outgoing object's [`BackupState`] on reload and `None`
//! on first use.

use std::any::type_name;
use std::sync::Arc;

use hotswap_core::{BackupState, ModuleId, Reloadable};

use crate::context::RuntimeContext;
use crate::error::RuntimeError;
use crate::loader::Export;
use crate::reference::{BackupSlot, Property};

type Build<T> = Arc<dyn Fn(Option<BackupState>) -> Arc<T> + Send + Sync>;

/// `init(backup) -> live object`
pub struct Factory<T: ?Sized> {
    init: Build<T>,
}

impl<T: ?Sized + 'static> Factory<T> {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn(Option<BackupState>) -> Arc<T> + Send + Sync + 'static,
    {
        Self {
            init: Arc::new(init),
        }
    }

    pub fn init(&self, backup: Option<BackupState>) -> Arc<T> {
        (self.init)(backup)
    }

    pub fn into_export(self) -> Export {
        Export::new(self)
    }
}

/// State-aware constructor for instance-style modules.
pub trait FromBackup: Sized {
    fn from_backup(backup: Option<BackupState>) -> Self;
}

/// `new Class(backup)`
pub struct Class<T: ?Sized> {
    name: &'static str,
    construct: Build<T>,
}

impl<T: ?Sized + 'static> Class<T> {
    pub fn new<F>(name: &'static str, construct: F) -> Self
    where
        F: Fn(Option<BackupState>) -> Arc<T> + Send + Sync + 'static,
    {
        Self {
            name,
            construct: Arc::new(construct),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn construct(&self, backup: Option<BackupState>) -> Arc<T> {
        (self.construct)(backup)
    }

    pub fn into_export(self) -> Export {
        Export::new(self)
    }
}

impl<T: FromBackup + Send + Sync + 'static> Class<T> {
    /// Class whose constructor is `T::from_backup`.
    pub fn of() -> Self {
        Class::new(type_name::<T>(), |backup| Arc::new(T::from_backup(backup)))
    }
}

/// Bind `property` to the module at `specifier` and fill it from the
/// module's [`Factory`] export. Returns the first live object.
///
/// On each reload the outgoing object's backup is passed to the new
/// export's `init`.
pub async fn singleton<T>(
    ctx: &RuntimeContext,
    specifier: &str,
    property: &Property<T>,
) -> Result<Arc<T>, RuntimeError>
where
    T: ?Sized + Reloadable,
{
    let (export, binding) = ctx.require_and_bind(specifier, property).await?;
    let factory = expect_shape::<Factory<T>>(binding.id(), &export, "factory")?;
    let live = factory.init(None);
    property.set(live.clone());

    let id = binding.id().clone();
    binding
        .on_reloading(capture_backup::<T>)
        .on_done(move |property, export, backup| {
            let factory = expect_shape::<Factory<T>>(&id, export, "factory")?;
            property.take();
            property.set(factory.init(backup));
            Ok(())
        });
    Ok(live)
}

/// Like [`singleton`] for modules exporting a [`Class`].
pub async fn instance<T>(
    ctx: &RuntimeContext,
    specifier: &str,
    property: &Property<T>,
) -> Result<Arc<T>, RuntimeError>
where
    T: ?Sized + Reloadable,
{
    let (export, binding) = ctx.require_and_bind(specifier, property).await?;
    let class = expect_shape::<Class<T>>(binding.id(), &export, "class")?;
    let live = class.construct(None);
    property.set(live.clone());

    let id = binding.id().clone();
    binding
        .on_reloading(capture_backup::<T>)
        .on_done(move |property, export, backup| {
            let class = expect_shape::<Class<T>>(&id, export, "class")?;
            tracing::debug!(module = %id, class = class.name(), "constructing replacement");
            property.take();
            property.set(class.construct(backup));
            Ok(())
        });
    Ok(live)
}

fn capture_backup<T: ?Sized + Reloadable>(property: &Property<T>, slot: &mut BackupSlot) {
    let Some(current) = property.get() else {
        tracing::warn!(binding = %property.label(), "property empty at reload; nothing to back up");
        return;
    };
    match current.backup() {
        Some(state) => slot.put(state),
        None => tracing::warn!(
            binding = %property.label(),
            "live object has no backup; replacement starts without state"
        ),
    }
}

fn expect_shape<S: Send + Sync + 'static>(
    id: &ModuleId,
    export: &Export,
    expected: &'static str,
) -> Result<Arc<S>, RuntimeError> {
    export.downcast::<S>().ok_or_else(|| RuntimeError::ExportShape {
        id: id.clone(),
        expected,
        found: export.type_name(),
    })
}
