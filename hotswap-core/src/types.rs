//! Domain types shared by the runtime and the CLI.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Canonical identity of a reloadable module.
///
/// Always produced by [`crate::Resolver`]: forward slashes, no extension,
/// no `.` / `..` segments. Two specifiers naming the same source unit map to
/// the same `ModuleId`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub String);

impl ModuleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Caller-chosen name of a timer in the timer registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerName(pub String);

impl fmt::Display for TimerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TimerName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TimerName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Whether a timer fires once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    Timeout,
    Interval,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Timeout => write!(f, "timeout"),
            TimerKind::Interval => write!(f, "interval"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status structs
// ---------------------------------------------------------------------------

/// Reload bookkeeping for one tracked module, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub id: ModuleId,
    /// Number of successful loads, including the first one.
    pub loads: u64,
    pub last_loaded_at: DateTime<Utc>,
    /// `owner.property` of the binding backed by this module, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_to: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(ModuleId::from("commands/ping").to_string(), "commands/ping");
        assert_eq!(TimerName::from("presence").to_string(), "presence");
    }

    #[test]
    fn newtype_equality() {
        let a = ModuleId::from("x");
        let b = ModuleId::from(String::from("x"));
        assert_eq!(a, b);
    }

    #[test]
    fn timer_kind_serializes_lowercase() {
        let json = serde_json::to_string(&TimerKind::Interval).expect("serialize");
        assert_eq!(json, "\"interval\"");
        assert_eq!(TimerKind::Timeout.to_string(), "timeout");
    }

    #[test]
    fn module_status_omits_missing_binding() {
        let status = ModuleStatus {
            id: ModuleId::from("counter"),
            loads: 2,
            last_loaded_at: Utc::now(),
            bound_to: None,
        };
        let json = serde_json::to_value(&status).expect("serialize");
        assert!(json.get("bound_to").is_none());
        assert_eq!(json["loads"], 2);
    }
}
