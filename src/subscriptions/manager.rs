//! Subscription manager broadcasting snapshot changes.

use crate::bits::{DependencyBits, ALL_BITS};
use crate::state::Snapshot;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use super::types::{DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, event: StoreEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// The bitmask of slices this subscriber observes.
    fn observed_mask(&self, bits: &DependencyBits) -> u64 {
        match &self.config.slices {
            Some(names) => bits.observed_mask(names),
            None => ALL_BITS,
        }
    }
}

/// Manages subscriptions and broadcasts committed snapshot changes to the
/// subscribers whose observed mask intersects the changed mask.
pub(crate) struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs, scoped to this manager.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription and return a handle for receiving events.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Send dropped event (best effort)
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast a committed change to subscribers whose observed mask
    /// intersects the changed mask. Subscribers that fail to receive are
    /// dropped.
    pub fn broadcast_changed(
        &self,
        prev: &Snapshot,
        next: &Snapshot,
        changed_mask: u64,
        bits: &DependencyBits,
    ) {
        if changed_mask == 0 {
            return;
        }

        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if changed_mask & sub.observed_mask(bits) == 0 {
                    continue;
                }
                let event = StoreEvent::Changed {
                    prev: prev.clone(),
                    next: next.clone(),
                    changed_mask,
                };
                if !sub.try_send(event) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, "dropping overflowing subscriber");
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}
