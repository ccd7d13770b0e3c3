//! Immutable, structurally shared snapshots of the state tree.

use crate::types::ItemKey;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One committed state of the tree: slice name → slice value.
///
/// Each slice is individually reference-counted, so snapshots produced by
/// successive commits share every untouched slice. Change detection downstream
/// (dependency bitmasks, derived-state memoization) is pointer identity on
/// these `Arc`s.
///
/// JSON `null` is the uninitialized sentinel: a slice is "ready" only when it
/// is present with a non-null value. Absence and `null` are equivalent for
/// read purposes.
#[derive(Clone, Default)]
pub struct Snapshot {
    slices: Arc<HashMap<String, Arc<Value>>>,
}

impl Snapshot {
    /// Build a snapshot from initial slice values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let slices = values
            .into_iter()
            .map(|(name, value)| (name, Arc::new(value)))
            .collect();
        Self {
            slices: Arc::new(slices),
        }
    }

    pub(crate) fn from_slices(slices: HashMap<String, Arc<Value>>) -> Self {
        Self {
            slices: Arc::new(slices),
        }
    }

    /// The raw slice value, including the `null` sentinel.
    pub fn slice(&self, name: &str) -> Option<&Arc<Value>> {
        self.slices.get(name)
    }

    /// Whether a slice is present with a non-null value.
    pub fn is_ready(&self, name: &str) -> bool {
        matches!(self.slices.get(name), Some(v) if !v.is_null())
    }

    /// The ready value for a slice or one of its items, if any.
    ///
    /// With an item key, a ready object slice is indexed by the key's string
    /// form and a ready array slice by integer index; a missing or null item
    /// is not ready even when its slice is.
    pub fn ready_value(&self, name: &str, item: Option<&ItemKey>) -> Option<Arc<Value>> {
        let slice = self.slices.get(name)?;
        if slice.is_null() {
            return None;
        }
        match item {
            None => Some(Arc::clone(slice)),
            Some(key) => {
                let value = lookup_item(slice, key)?;
                if value.is_null() {
                    None
                } else {
                    Some(Arc::new(value.clone()))
                }
            }
        }
    }

    /// Iterate over all slices, ready or not.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Value>)> {
        self.slices.iter()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// A new snapshot with one slice replaced. Untouched slices keep their
    /// identity.
    pub fn with_slice(&self, name: &str, value: Value) -> Snapshot {
        let mut slices: HashMap<String, Arc<Value>> = (*self.slices).clone();
        slices.insert(name.to_string(), Arc::new(value));
        Snapshot::from_slices(slices)
    }

    /// Materialize the whole tree as one JSON object.
    pub fn to_value(&self) -> Value {
        let map = self
            .slices
            .iter()
            .map(|(name, value)| (name.clone(), (**value).clone()))
            .collect();
        Value::Object(map)
    }
}

/// Index into a slice value by item key: object slices by string key, array
/// slices by integer index.
pub(crate) fn lookup_item<'a>(slice: &'a Value, key: &ItemKey) -> Option<&'a Value> {
    match slice {
        Value::Object(map) => map.get(&key.as_map_key()),
        Value::Array(items) => key.as_index().and_then(|i| items.get(i)),
        _ => None,
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.slices.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Snapshot").field("slices", &names).finish()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.slices.len()))?;
        for (name, value) in self.slices.iter() {
            map.serialize_entry(name, value.as_ref())?;
        }
        map.end()
    }
}
