//! Copy-on-write working copy of a snapshot.

use crate::state::patches::{diff_slice, Patch};
use crate::state::snapshot::Snapshot;
use crate::types::ItemKey;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Mutable draft built from a committed snapshot.
///
/// Mutators receive a draft and write through it. Only slices actually
/// touched are materialized (cloned from the base); on commit every untouched
/// slice keeps its `Arc` identity in the new snapshot, which is what the
/// bitmask invalidation and memoization layers key on.
pub struct Draft {
    base: Snapshot,
    // Touch order is preserved so the patch log reads like the mutator ran.
    touched: Vec<(String, Option<Value>)>,
}

impl Draft {
    pub(crate) fn new(base: Snapshot) -> Self {
        Self {
            base,
            touched: Vec::new(),
        }
    }

    fn touched_index(&self, name: &str) -> Option<usize> {
        self.touched.iter().position(|(n, _)| n == name)
    }

    /// Current value of a slice as seen by this draft.
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(i) = self.touched_index(name) {
            return self.touched[i].1.as_ref();
        }
        self.base.slice(name).map(Arc::as_ref)
    }

    /// Whether a slice is present with a non-null value in this draft.
    pub fn is_ready(&self, name: &str) -> bool {
        matches!(self.get(name), Some(v) if !v.is_null())
    }

    /// Replace a slice wholesale.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.touched_index(&name) {
            Some(i) => self.touched[i].1 = Some(value),
            None => self.touched.push((name, Some(value))),
        }
    }

    /// Delete a slice.
    pub fn remove(&mut self, name: &str) {
        match self.touched_index(name) {
            Some(i) => self.touched[i].1 = None,
            None => self.touched.push((name.to_string(), None)),
        }
    }

    /// Mutable access to a slice, materializing a copy of the base value on
    /// first touch. A missing or removed slice materializes as `null`.
    pub fn get_mut(&mut self, name: &str) -> &mut Value {
        let i = match self.touched_index(name) {
            Some(i) => i,
            None => {
                let value = self
                    .base
                    .slice(name)
                    .map(|v| (**v).clone())
                    .unwrap_or(Value::Null);
                self.touched.push((name.to_string(), Some(value)));
                self.touched.len() - 1
            }
        };
        self.touched[i].1.get_or_insert(Value::Null)
    }

    /// Write one item of a slice.
    ///
    /// Object slices insert by the key's string form; array slices replace,
    /// append, or null-extend by integer index. A slice that is not yet a
    /// container becomes an object first.
    pub fn set_item(&mut self, name: &str, key: &ItemKey, value: Value) {
        let slice = self.get_mut(name);
        match (&mut *slice, key.as_index()) {
            (Value::Array(items), Some(i)) => {
                if i < items.len() {
                    items[i] = value;
                } else {
                    items.resize(i, Value::Null);
                    items.push(value);
                }
            }
            (Value::Object(map), _) => {
                map.insert(key.as_map_key(), value);
            }
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(key.as_map_key(), value);
                *slice = Value::Object(map);
            }
        }
    }

    /// Commit the draft: the new snapshot plus forward patches and reverts
    /// (reverts ordered last-change-first).
    pub(crate) fn commit(self) -> (Snapshot, Vec<Patch>, Vec<Patch>) {
        let mut slices: HashMap<String, Arc<Value>> =
            self.base.iter().map(|(n, v)| (n.clone(), Arc::clone(v))).collect();
        let mut patches = Vec::new();
        let mut reverts = Vec::new();

        for (name, value) in self.touched {
            let old = self.base.slice(&name).map(Arc::as_ref);
            let (p, r) = diff_slice(&name, old, value.as_ref());
            patches.extend(p);
            reverts.extend(r);
            match value {
                Some(v) => {
                    slices.insert(name, Arc::new(v));
                }
                None => {
                    slices.remove(&name);
                }
            }
        }

        reverts.reverse();
        (Snapshot::from_slices(slices), patches, reverts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::patches::PatchOp;
    use serde_json::json;

    fn base() -> Snapshot {
        Snapshot::from_values([
            ("quoteId".to_string(), json!(1)),
            ("color".to_string(), json!("blue")),
        ])
    }

    #[test]
    fn test_untouched_slices_keep_identity() {
        let prev = base();
        let mut draft = Draft::new(prev.clone());
        draft.set("quoteId", json!(2));
        let (next, _, _) = draft.commit();

        assert!(Arc::ptr_eq(prev.slice("color").unwrap(), next.slice("color").unwrap()));
        assert!(!Arc::ptr_eq(prev.slice("quoteId").unwrap(), next.slice("quoteId").unwrap()));
    }

    #[test]
    fn test_get_mut_materializes_from_base() {
        let mut draft = Draft::new(base());
        *draft.get_mut("quoteId") = json!(5);
        assert_eq!(draft.get("quoteId"), Some(&json!(5)));

        // A slice missing from the base materializes as null.
        assert!(draft.get_mut("quotes").is_null());
    }

    #[test]
    fn test_set_item_creates_object_slice() {
        let mut draft = Draft::new(base());
        draft.set_item("quotes", &ItemKey::from(1), json!({"title": "X"}));
        let (next, patches, _) = draft.commit();

        assert_eq!(*next.ready_value("quotes", Some(&ItemKey::from(1))).unwrap(), json!({"title": "X"}));
        assert_eq!(patches[0].op, PatchOp::Add);
        assert_eq!(patches[0].path, vec!["quotes"]);
    }

    #[test]
    fn test_set_item_extends_array_slice() {
        let snap = Snapshot::from_values([("tags".to_string(), json!(["a"]))]);
        let mut draft = Draft::new(snap);
        draft.set_item("tags", &ItemKey::from(0), json!("z"));
        draft.set_item("tags", &ItemKey::from(1), json!("b"));
        let (next, _, _) = draft.commit();
        assert_eq!(**next.slice("tags").unwrap(), json!(["z", "b"]));
    }

    #[test]
    fn test_remove_then_commit() {
        let prev = base();
        let mut draft = Draft::new(prev);
        draft.remove("color");
        let (next, patches, reverts) = draft.commit();

        assert!(next.slice("color").is_none());
        assert_eq!(patches[0].op, PatchOp::Remove);
        assert_eq!(reverts[0].op, PatchOp::Add);
        assert_eq!(reverts[0].value, Some(json!("blue")));
    }

    #[test]
    fn test_reverts_are_last_change_first() {
        let mut draft = Draft::new(base());
        draft.set("quoteId", json!(2));
        draft.set("color", json!("green"));
        let (_, patches, reverts) = draft.commit();

        assert_eq!(patches[0].path, vec!["quoteId"]);
        assert_eq!(patches[1].path, vec!["color"]);
        assert_eq!(reverts[0].path, vec!["color"]);
        assert_eq!(reverts[1].path, vec!["quoteId"]);
    }
}
