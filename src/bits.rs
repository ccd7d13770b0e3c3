//! Per-slice dependency bitmasks for selective change notification.

use crate::state::Snapshot;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mask representing a dependency on every slice.
pub const ALL_BITS: u64 = u64::MAX;

/// Assigns one bit per slice name and computes change masks between
/// snapshots.
///
/// Bits are handed out in observation order. Past 64 distinct names, bits
/// wrap and names share them: notifications may then be false-positive for a
/// shared bit, never false-negative. Counters are scoped to this table (one
/// per store instance), so independent containers stay isolated.
pub struct DependencyBits {
    assigned: RwLock<HashMap<String, u64>>,
    next_bit: AtomicUsize,
}

impl DependencyBits {
    pub fn new() -> Self {
        Self {
            assigned: RwLock::new(HashMap::new()),
            next_bit: AtomicUsize::new(0),
        }
    }

    /// The bit for a slice name, assigning the next unused bit on first
    /// observation.
    pub fn mask_for(&self, name: &str) -> u64 {
        if let Some(mask) = self.assigned.read().get(name) {
            return *mask;
        }
        let mut assigned = self.assigned.write();
        // Re-check under the write lock: another reader may have assigned it.
        if let Some(mask) = assigned.get(name) {
            return *mask;
        }
        let bit = 1u64 << (self.next_bit.fetch_add(1, Ordering::Relaxed) % 64);
        assigned.insert(name.to_string(), bit);
        bit
    }

    /// Override the mask for a name.
    ///
    /// Used for derived slices: all-ones at registration (dependent on
    /// everything until first evaluated), then the union of the masks of the
    /// slices actually read during evaluation.
    pub fn set_mask(&self, name: &str, mask: u64) {
        self.assigned.write().insert(name.to_string(), mask);
    }

    /// OR of the bits of every top-level slice whose value reference differs
    /// between the two snapshots, including slices added or removed.
    pub fn changed_mask(&self, prev: &Snapshot, next: &Snapshot) -> u64 {
        let mut mask = 0u64;
        for (name, value) in next.iter() {
            match prev.slice(name) {
                Some(old) if std::sync::Arc::ptr_eq(old, value) => {}
                _ => mask |= self.mask_for(name),
            }
        }
        for (name, _) in prev.iter() {
            if next.slice(name).is_none() {
                mask |= self.mask_for(name);
            }
        }
        mask
    }

    /// OR of the masks for a subscriber's observed slice names.
    pub fn observed_mask<S: AsRef<str>>(&self, names: &[S]) -> u64 {
        names
            .iter()
            .fold(0u64, |mask, name| mask | self.mask_for(name.as_ref()))
    }
}

impl Default for DependencyBits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bits_assigned_in_observation_order() {
        let bits = DependencyBits::new();
        assert_eq!(bits.mask_for("a"), 1);
        assert_eq!(bits.mask_for("b"), 2);
        assert_eq!(bits.mask_for("c"), 4);
        // Stable on re-observation.
        assert_eq!(bits.mask_for("a"), 1);
    }

    #[test]
    fn test_bits_wrap_past_width() {
        let bits = DependencyBits::new();
        for i in 0..64 {
            bits.mask_for(&format!("slice{i}"));
        }
        // The 65th name shares the first bit.
        assert_eq!(bits.mask_for("slice64-th"), bits.mask_for("slice0"));
    }

    #[test]
    fn test_changed_mask_only_for_changed_slices() {
        let bits = DependencyBits::new();
        let prev = Snapshot::from_values([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
        ]);
        let next = prev.with_slice("b", json!(3));

        let mask = bits.changed_mask(&prev, &next);
        assert_eq!(mask, bits.mask_for("b"));
        assert_eq!(mask & bits.mask_for("a"), 0);
    }

    #[test]
    fn test_changed_mask_includes_added_and_removed() {
        let bits = DependencyBits::new();
        let prev = Snapshot::from_values([("a".to_string(), json!(1))]);
        let added = prev.with_slice("b", json!(2));
        assert_ne!(bits.changed_mask(&prev, &added) & bits.mask_for("b"), 0);
        assert_ne!(bits.changed_mask(&added, &prev) & bits.mask_for("b"), 0);
    }

    #[test]
    fn test_identical_snapshots_have_zero_mask() {
        let bits = DependencyBits::new();
        let snap = Snapshot::from_values([("a".to_string(), json!(1))]);
        assert_eq!(bits.changed_mask(&snap, &snap.clone()), 0);
    }

    #[test]
    fn test_observed_mask_is_union() {
        let bits = DependencyBits::new();
        let union = bits.observed_mask(&["a", "b"]);
        assert_eq!(union, bits.mask_for("a") | bits.mask_for("b"));
    }
}
