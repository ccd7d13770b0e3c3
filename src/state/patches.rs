//! Patch records for committed updates.
//!
//! Every update commit produces a forward patch list and a paired revert
//! list. A bounded history of recent updates is retained for observability
//! and undo tooling.

use crate::types::DispatchId;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Patch operation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One change to the tree: a path (slice name, optionally a shallow object
/// field), an operation, and the value written (`None` for removals).
#[derive(Clone, Debug, Serialize)]
pub struct Patch {
    pub path: Vec<String>,
    pub op: PatchOp,
    pub value: Option<Value>,
}

impl Patch {
    fn new(path: Vec<String>, op: PatchOp, value: Option<Value>) -> Self {
        Self { path, op, value }
    }
}

/// Compute forward and revert patches for one touched slice.
///
/// Object slices diff at field granularity so the patch log reads like the
/// edit that was made; every other shape is recorded as a whole-slice patch.
/// The two lists are pairwise aligned; the caller reverses the concatenated
/// revert list so reverts apply last-change-first.
pub(crate) fn diff_slice(
    name: &str,
    old: Option<&Value>,
    new: Option<&Value>,
) -> (Vec<Patch>, Vec<Patch>) {
    let mut patches = Vec::new();
    let mut reverts = Vec::new();

    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => {
            patches.push(Patch::new(vec![name.to_string()], PatchOp::Add, Some(new.clone())));
            reverts.push(Patch::new(vec![name.to_string()], PatchOp::Remove, None));
        }
        (Some(old), None) => {
            patches.push(Patch::new(vec![name.to_string()], PatchOp::Remove, None));
            reverts.push(Patch::new(vec![name.to_string()], PatchOp::Add, Some(old.clone())));
        }
        (Some(Value::Object(old_map)), Some(Value::Object(new_map))) => {
            for (key, new_value) in new_map {
                let path = vec![name.to_string(), key.clone()];
                match old_map.get(key) {
                    None => {
                        patches.push(Patch::new(path.clone(), PatchOp::Add, Some(new_value.clone())));
                        reverts.push(Patch::new(path, PatchOp::Remove, None));
                    }
                    Some(old_value) if old_value != new_value => {
                        patches.push(Patch::new(path.clone(), PatchOp::Replace, Some(new_value.clone())));
                        reverts.push(Patch::new(path, PatchOp::Replace, Some(old_value.clone())));
                    }
                    Some(_) => {}
                }
            }
            for (key, old_value) in old_map {
                if !new_map.contains_key(key) {
                    let path = vec![name.to_string(), key.clone()];
                    patches.push(Patch::new(path.clone(), PatchOp::Remove, None));
                    reverts.push(Patch::new(path, PatchOp::Add, Some(old_value.clone())));
                }
            }
        }
        (Some(old), Some(new)) => {
            if old != new {
                patches.push(Patch::new(vec![name.to_string()], PatchOp::Replace, Some(new.clone())));
                reverts.push(Patch::new(vec![name.to_string()], PatchOp::Replace, Some(old.clone())));
            }
        }
    }

    (patches, reverts)
}

/// One committed update: patches, reverts, and the dispatch that caused it.
#[derive(Clone, Debug, Serialize)]
pub struct UpdateEvent {
    /// Position in this store's commit order, starting at 1.
    pub seq: u64,
    pub dispatch_id: Option<DispatchId>,
    pub action: Option<String>,
    pub patches: Vec<Patch>,
    pub reverts: Vec<Patch>,
}

/// Bounded history of committed updates, keyed by commit sequence.
///
/// Capacity 0 disables retention; commits are still sequenced.
pub struct PatchLog {
    entries: Option<Mutex<LruCache<u64, Arc<UpdateEvent>>>>,
    next_seq: AtomicU64,
}

impl PatchLog {
    pub fn new(capacity: usize) -> Self {
        let entries = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            entries,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Record one committed update and return it.
    pub(crate) fn record(
        &self,
        dispatch_id: Option<DispatchId>,
        action: Option<String>,
        patches: Vec<Patch>,
        reverts: Vec<Patch>,
    ) -> Arc<UpdateEvent> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(UpdateEvent {
            seq,
            dispatch_id,
            action,
            patches,
            reverts,
        });
        if let Some(entries) = &self.entries {
            entries.lock().put(seq, Arc::clone(&event));
        }
        event
    }

    /// A retained update by sequence number.
    pub fn get(&self, seq: u64) -> Option<Arc<UpdateEvent>> {
        let entries = self.entries.as_ref()?;
        entries.lock().peek(&seq).cloned()
    }

    /// The most recent retained updates, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<UpdateEvent>> {
        match &self.entries {
            Some(entries) => entries
                .lock()
                .iter()
                .take(limit)
                .map(|(_, event)| Arc::clone(event))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Total updates committed over this store's lifetime.
    pub fn recorded(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed) - 1
    }
}
