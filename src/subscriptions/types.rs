//! Subscription types for live snapshot-change notifications.

use crate::state::Snapshot;
use serde::Serialize;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    /// Default: 256
    pub buffer_size: usize,

    /// Slice names this subscriber depends on (`None` = everything).
    /// The observed bitmask is recomputed at broadcast time, so derived-slice
    /// masks refined by evaluation take effect without resubscribing.
    pub slices: Option<Vec<String>>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            slices: None,
        }
    }
}

impl SubscriptionConfig {
    /// Subscribe to every change.
    pub fn all() -> Self {
        Self::default()
    }

    /// Subscribe to changes of specific slices.
    pub fn slices<S: Into<String>, I: IntoIterator<Item = S>>(names: I) -> Self {
        Self {
            slices: Some(names.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }
}

/// Events delivered to subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A new snapshot was committed and intersects the subscriber's observed
    /// mask.
    Changed {
        prev: Snapshot,
        next: Snapshot,
        changed_mask: u64,
    },

    /// The subscription ended.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle for receiving a subscription's events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
