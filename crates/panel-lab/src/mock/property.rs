//! Typed property values and change events for mock services.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed property value as exposed on a mock service interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropValue {
    Bool(bool),
    U32(u32),
    I64(i64),
    Str(String),
}

impl PropValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Immutable record of one property mutation on a mock service.
///
/// Produced for every local or external write; consumed by the reactive
/// model to trigger cascades. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyChangeEvent {
    /// Service the change happened on (registry name, e.g. `rfkill`).
    pub service: String,
    /// Interface the changed keys live on.
    pub interface: String,
    /// Keys written together with their new values.
    pub changed: BTreeMap<String, PropValue>,
    /// Keys whose values were invalidated without a replacement.
    pub invalidated: Vec<String>,
}

impl PropertyChangeEvent {
    #[must_use]
    pub fn single(service: &str, interface: &str, key: &str, value: PropValue) -> Self {
        let mut changed = BTreeMap::new();
        changed.insert(key.to_string(), value);
        Self {
            service: service.to_string(),
            interface: interface.to_string(),
            changed,
            invalidated: Vec::new(),
        }
    }
}

/// One derived write computed by a reaction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target service registry name.
    pub service: String,
    /// Target interface on that service.
    pub interface: String,
    /// Property key to write.
    pub key: String,
    /// New value.
    pub value: PropValue,
}

impl Mutation {
    #[must_use]
    pub fn new(service: &str, interface: &str, key: &str, value: PropValue) -> Self {
        Self {
            service: service.to_string(),
            interface: interface.to_string(),
            key: key.to_string(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variant() {
        assert_eq!(PropValue::Bool(true).as_bool(), Some(true));
        assert_eq!(PropValue::U32(7).as_u32(), Some(7));
        assert_eq!(PropValue::Str("x".into()).as_str(), Some("x"));
        assert_eq!(PropValue::Bool(true).as_str(), None);
    }

    #[test]
    fn single_event_carries_one_key() {
        let ev = PropertyChangeEvent::single("rfkill", "iface", "AirplaneMode", true.into());
        assert_eq!(ev.changed.len(), 1);
        assert_eq!(ev.changed["AirplaneMode"], PropValue::Bool(true));
        assert!(ev.invalidated.is_empty());
    }

    #[test]
    fn prop_value_serde_round_trip() {
        let v = PropValue::Str("lap-detected".into());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(serde_json::from_str::<PropValue>(&json).unwrap(), v);
    }
}
