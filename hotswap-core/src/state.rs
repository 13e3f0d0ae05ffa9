//! Continuation state handed from an outgoing live object to its replacement.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque backup payload.
///
/// Produced by [`Reloadable::backup`] while a reload is in its swap phase and
/// consumed once by the replacement's `init` / `construct`. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupState(Value);

impl BackupState {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serialize any state struct into a payload.
    pub fn encode<T: Serialize>(state: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(state).map(Self)
    }

    /// Decode the payload back into the replacement's state struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for BackupState {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Contract for any live object whose backing module can be hot-reloaded.
///
/// `backup` returns the state the replacement should start from. The default
/// returns `None`: the reload pipeline logs a warning and the replacement
/// starts cold.
pub trait Reloadable: Send + Sync + 'static {
    fn backup(&self) -> Option<BackupState> {
        None
    }
}
