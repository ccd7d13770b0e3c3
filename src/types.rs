//! Core types for the state container.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier assigned to each dispatch, monotonically increasing within one
/// store instance. Used to correlate handler results, updates, and errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchId(pub u64);

impl fmt::Debug for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchId({})", self.0)
    }
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key addressing one item inside a slice.
///
/// A slice holding a JSON object is indexed by the key's string form; a slice
/// holding a JSON array is indexed by non-negative integer keys. An absent
/// key (`Option::None` at the call sites) addresses the whole slice.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemKey {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl ItemKey {
    /// String form used to index JSON object slices.
    pub fn as_map_key(&self) -> String {
        match self {
            ItemKey::Str(s) => s.clone(),
            ItemKey::Int(n) => n.to_string(),
            ItemKey::Bool(b) => b.to_string(),
        }
    }

    /// Array index form, when the key can address a JSON array slice.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            ItemKey::Int(n) if *n >= 0 => Some(*n as usize),
            _ => None,
        }
    }

    /// JSON form, used as the payload of an initializer dispatch.
    pub fn to_value(&self) -> Value {
        match self {
            ItemKey::Str(s) => Value::String(s.clone()),
            ItemKey::Int(n) => Value::from(*n),
            ItemKey::Bool(b) => Value::Bool(*b),
        }
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Str(s) => write!(f, "ItemKey({s:?})"),
            ItemKey::Int(n) => write!(f, "ItemKey({n})"),
            ItemKey::Bool(b) => write!(f, "ItemKey({b})"),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Str(s) => write!(f, "{s}"),
            ItemKey::Int(n) => write!(f, "{n}"),
            ItemKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ItemKey {
    fn from(s: &str) -> Self {
        ItemKey::Str(s.to_string())
    }
}

impl From<String> for ItemKey {
    fn from(s: String) -> Self {
        ItemKey::Str(s)
    }
}

impl From<i64> for ItemKey {
    fn from(n: i64) -> Self {
        ItemKey::Int(n)
    }
}

impl From<i32> for ItemKey {
    fn from(n: i32) -> Self {
        ItemKey::Int(n as i64)
    }
}

impl From<bool> for ItemKey {
    fn from(b: bool) -> Self {
        ItemKey::Bool(b)
    }
}

/// Container statistics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreStats {
    pub slice_count: usize,
    pub pending_loads: usize,
    pub failed_loads: usize,
    pub subscription_count: usize,
    pub registered_actions: usize,
    pub derived_slices: usize,
    pub dispatch_count: u64,
    pub update_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key_map_form() {
        assert_eq!(ItemKey::from(7).as_map_key(), "7");
        assert_eq!(ItemKey::from("left").as_map_key(), "left");
        assert_eq!(ItemKey::from(true).as_map_key(), "true");
    }

    #[test]
    fn test_item_key_index_form() {
        assert_eq!(ItemKey::from(3).as_index(), Some(3));
        assert_eq!(ItemKey::from(-1).as_index(), None);
        assert_eq!(ItemKey::from("3").as_index(), None);
    }

    #[test]
    fn test_item_key_json_roundtrip() {
        let key = ItemKey::from(42);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "42");
        let parsed: ItemKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
