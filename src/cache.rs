//! Single-flight loader cache for lazily populated slices.

use crate::error::StoreError;
use crate::state::Snapshot;
use crate::types::ItemKey;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Cache key: a slice plus an optional item. `item: None` is the whole-slice
/// ("all items") load.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) struct CacheKey {
    pub slice: String,
    pub item: Option<ItemKey>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{}[{}]", self.slice, item),
            None => write!(f, "{}", self.slice),
        }
    }
}

/// Shared handle to one in-flight load.
///
/// Every concurrent reader of the same missing key holds a clone of the same
/// handle; awaiting it never starts a second load. The underlying dispatch is
/// deferred until the handle is first polled, so starting a load inside a
/// `read` never re-enters the read. After settlement the caller re-issues the
/// read; the outcome lives in the cache, not in the handle.
#[derive(Clone)]
pub struct Loading {
    token: u64,
    inner: Shared<BoxFuture<'static, ()>>,
}

impl Loading {
    pub(crate) fn new(token: u64, fut: BoxFuture<'static, ()>) -> Self {
        Self {
            token,
            inner: fut.shared(),
        }
    }

    /// Whether two handles observe the same underlying load.
    pub fn same_load(&self, other: &Loading) -> bool {
        self.token == other.token
    }

    /// Whether the load has settled (successfully or not).
    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }
}

impl Future for Loading {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.get_mut().inner.poll_unpin(cx)
    }
}

impl fmt::Debug for Loading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loading")
            .field("token", &self.token)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// One cache entry. Transitions exactly once from `Pending` to `Settled` or
/// `Failed`; deleted by the success sweep or an explicit clear.
#[derive(Clone)]
pub(crate) enum CacheEntry {
    Pending(Loading),
    Settled,
    Failed(Arc<StoreError>),
}

/// What a read should do, decided atomically under the cache lock.
pub(crate) enum CacheDecision {
    /// No usable entry existed; a fresh pending load was installed.
    Started(Loading),
    /// A load is already in flight; share it.
    Join(Loading),
    /// The entry settled successfully but the value is still missing and the
    /// restart policy forbids a silent reload.
    Stale,
    /// The last load failed; recoverable via retry/clear.
    Failed(Arc<StoreError>),
}

/// Per-key single-flight bookkeeping for lazy loads.
pub(crate) struct LazyCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl LazyCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decide how a read of a missing key proceeds. `make` is only invoked
    /// when a fresh load is actually installed.
    pub fn read_or_start(
        &self,
        key: &CacheKey,
        restart_stale: bool,
        make: impl FnOnce() -> Loading,
    ) -> CacheDecision {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(CacheEntry::Pending(loading)) => CacheDecision::Join(loading.clone()),
            Some(CacheEntry::Failed(error)) => CacheDecision::Failed(Arc::clone(error)),
            Some(CacheEntry::Settled) if !restart_stale => CacheDecision::Stale,
            // Absent, or settled while the value is still missing (lenient
            // restart): install a fresh load.
            _ => {
                let loading = make();
                entries.insert(key.clone(), CacheEntry::Pending(loading.clone()));
                CacheDecision::Started(loading)
            }
        }
    }

    /// Replay a load after failure: joins an in-flight load if one exists,
    /// otherwise installs a fresh one.
    pub fn restart(&self, key: &CacheKey, make: impl FnOnce() -> Loading) -> Loading {
        let mut entries = self.entries.lock();
        if let Some(CacheEntry::Pending(loading)) = entries.get(key) {
            return loading.clone();
        }
        let loading = make();
        entries.insert(key.clone(), CacheEntry::Pending(loading.clone()));
        loading
    }

    /// Record the outcome of a load.
    pub fn settle(&self, key: &CacheKey, result: Result<(), Arc<StoreError>>) {
        let entry = match result {
            Ok(()) => CacheEntry::Settled,
            Err(error) => CacheEntry::Failed(error),
        };
        self.entries.lock().insert(key.clone(), entry);
    }

    /// Delete an entry so the next read starts fresh. Returns whether an
    /// entry existed.
    pub fn clear(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Drop settled-successfully markers whose value is now ready in the
    /// snapshot. Pending and failed entries are left alone. Called after each
    /// commit to keep the cache from growing without bound.
    pub fn sweep_settled(&self, snapshot: &Snapshot) {
        self.entries.lock().retain(|key, entry| match entry {
            CacheEntry::Settled => snapshot
                .ready_value(&key.slice, key.item.as_ref())
                .is_none(),
            _ => true,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| matches!(e, CacheEntry::Pending(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| matches!(e, CacheEntry::Failed(_)))
            .count()
    }
}
