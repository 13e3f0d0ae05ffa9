//! Live module hot-reload runtime: timers, module cache, bindings, presets,
//! filesystem watcher, and the control-socket daemon loop.

pub mod context;
mod error;
pub mod events;
pub mod loader;
pub mod manifest;
pub mod paths;
pub mod preset;
pub mod protocol;
pub mod reference;
mod runtime;
pub mod timers;
pub mod watcher;

pub use context::{ModuleReload, ReloadSummary, ReloadTarget, RuntimeContext};
pub use error::RuntimeError;
pub use events::{EventBus, HotReloadEvent};
pub use loader::{Export, FactoryRegistry, ModuleCache, ModuleSource, SourceError};
pub use manifest::{Document, DocumentSet, ManifestSource};
pub use preset::{instance, singleton, Class, Factory, FromBackup};
pub use protocol::{
    request_reload, request_status, request_stop, request_timers, send_request, ControlRequest,
    ControlResponse, ModuleReport, RuntimeStatus,
};
pub use reference::{BackupSlot, Binding, Property, ReferenceRegistry, ReloadHandler};
pub use runtime::{init_tracing, run, start_blocking, ReloadStats, Runtime};
pub use timers::{TimerCallback, TimerHandle, TimerRegistry, TimerSnapshot, TimerTable};
