//! The state container tying all components together.

use crate::actions::{ActionHandler, ActionRegistry, HandlerFuture};
use crate::bits::DependencyBits;
use crate::cache::{CacheDecision, CacheKey, LazyCache, Loading};
use crate::context::SharedContext;
use crate::derived::{DeriveFn, DerivedRegistry, Evaluation};
use crate::error::{DispatchError, Result, StoreError};
use crate::middleware::{ActionFn, DispatchInfo, Middleware, MiddlewareChain};
use crate::state::{Draft, PatchLog, Snapshot, UpdateEvent};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::types::{DispatchId, ItemKey, StoreStats};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Policy for a cache entry that settled successfully while its slice is
/// still uninitialized (an initializer that never wrote the slice).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StaleReload {
    /// Silently start a fresh load. Lenient: a retry is often worthwhile,
    /// but a misconfigured initializer keeps reloading.
    #[default]
    Restart,
    /// Fail the read with [`StoreError::InitializerNoEffect`].
    Error,
}

/// Container configuration.
#[derive(Clone, Default)]
pub struct StoreConfig {
    /// Initial slice values. `null` values mark slices as known but
    /// uninitialized.
    pub initial_state: HashMap<String, Value>,

    /// Slice name → action dispatched to populate it on first read.
    pub initializers: HashMap<String, String>,

    /// Ordered middleware around every dispatch; first entry is outermost.
    pub middleware: Vec<Middleware>,

    /// Retained update-history capacity (0 disables retention).
    pub patch_history: usize,

    /// Policy for settled-but-still-missing cache entries.
    pub stale_reload: StaleReload,
}

impl StoreConfig {
    /// Defaults plus a patch history of 256 updates.
    pub fn with_history() -> Self {
        Self {
            patch_history: 256,
            ..Default::default()
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut slices: Vec<&str> = self.initial_state.keys().map(String::as_str).collect();
        slices.sort_unstable();
        f.debug_struct("StoreConfig")
            .field("initial_state", &slices)
            .field("initializers", &self.initializers)
            .field("middleware", &self.middleware.len())
            .field("patch_history", &self.patch_history)
            .field("stale_reload", &self.stale_reload)
            .finish()
    }
}

/// Aggregated result of one dispatch: the shallow merge of every handler's
/// partial result object, tagged with the dispatch id.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchResult {
    pub dispatch_id: DispatchId,
    pub value: Map<String, Value>,
}

impl DispatchResult {
    pub fn empty(dispatch_id: DispatchId) -> Self {
        Self {
            dispatch_id,
            value: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Outcome of a read.
///
/// The explicit form of the suspend contract: `Pending` carries the shared
/// in-flight load; the caller awaits it and re-issues the read. `Failed`
/// carries the error with retry/clear affordances.
#[derive(Debug)]
pub enum ReadOutcome {
    Ready(Arc<Value>),
    Pending(Loading),
    Failed(LoadFailure),
}

impl ReadOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadOutcome::Ready(_))
    }

    pub fn ready(&self) -> Option<&Arc<Value>> {
        match self {
            ReadOutcome::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn pending(self) -> Option<Loading> {
        match self {
            ReadOutcome::Pending(loading) => Some(loading),
            _ => None,
        }
    }
}

/// A failed lazy load, surfaced to the caller's fallback path.
///
/// The caller must `clear()` before a fresh read attempt can start a new
/// load, or `retry()` to replay the same load immediately.
pub struct LoadFailure {
    key: CacheKey,
    error: Arc<StoreError>,
    store: Weak<StoreInner>,
}

impl LoadFailure {
    pub fn error(&self) -> &StoreError {
        &self.error
    }

    pub fn slice(&self) -> &str {
        &self.key.slice
    }

    pub fn item(&self) -> Option<&ItemKey> {
        self.key.item.as_ref()
    }

    /// Delete the cache entry so the next read starts a fresh load. Returns
    /// whether an entry existed.
    pub fn clear(&self) -> bool {
        match self.store.upgrade() {
            Some(inner) => inner.cache.clear(&self.key),
            None => false,
        }
    }

    /// Replay the same load and return the new in-flight handle.
    pub fn retry(&self) -> Result<Loading> {
        let inner = self.store.upgrade().ok_or(StoreError::Closed)?;
        let action = inner
            .initializers
            .read()
            .get(&self.key.slice)
            .cloned()
            .ok_or_else(|| StoreError::MissingInitializer {
                slice: self.key.slice.clone(),
                item: self.key.item.clone(),
            })?;
        Ok(inner
            .cache
            .restart(&self.key, || StoreInner::make_load(&inner, &self.key, &action)))
    }
}

impl fmt::Debug for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadFailure")
            .field("key", &self.key)
            .field("error", &self.error)
            .finish()
    }
}

/// Scoped store interface handed to action handlers.
#[derive(Clone)]
pub struct ActionScope {
    inner: Arc<StoreInner>,
    dispatch_id: DispatchId,
    action: Arc<str>,
}

impl ActionScope {
    /// The dispatch this handler is running under.
    pub fn dispatch_id(&self) -> DispatchId {
        self.dispatch_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Apply a mutator to a copy-on-write draft and commit. Serialized with
    /// every other commit; returns once the new snapshot is visible.
    pub fn update(&self, mutator: impl FnOnce(&mut Draft)) -> Arc<UpdateEvent> {
        self.inner
            .apply_update(mutator, Some(self.dispatch_id), Some(self.action.to_string()))
    }

    /// Raw slice access, including the uninitialized sentinel.
    pub fn get(&self, name: &str, item: Option<&ItemKey>) -> Option<Arc<Value>> {
        self.inner.get(name, item)
    }

    /// Suspending read; see [`Store::read`].
    pub fn read(&self, name: &str, item: Option<&ItemKey>) -> Result<ReadOutcome> {
        StoreInner::read(&self.inner, name, item)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.read().clone()
    }

    /// Dispatch another action from inside a handler.
    pub fn dispatch(
        &self,
        action: &str,
        payload: Vec<Value>,
    ) -> BoxFuture<'static, std::result::Result<DispatchResult, DispatchError>> {
        StoreInner::dispatch(&self.inner, action, payload, false)
    }

    /// The shared mutable context (API clients and other non-state values).
    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }
}

pub(crate) struct StoreInner {
    snapshot: RwLock<Snapshot>,
    /// Serializes commits: each draft builds from the latest committed
    /// snapshot and applies fully before the next draft opens.
    commit_lock: Mutex<()>,
    registry: ActionRegistry,
    derived: DerivedRegistry,
    initializers: RwLock<HashMap<String, String>>,
    cache: LazyCache,
    bits: DependencyBits,
    middleware: MiddlewareChain,
    subscriptions: SubscriptionManager,
    patch_log: PatchLog,
    context: SharedContext,
    dispatch_seq: AtomicU64,
    load_seq: AtomicU64,
    stale_reload: StaleReload,
}

impl StoreInner {
    fn dispatch(
        self: &Arc<Self>,
        action: &str,
        payload: Vec<Value>,
        initializer: bool,
    ) -> BoxFuture<'static, std::result::Result<DispatchResult, DispatchError>> {
        let dispatch_id = DispatchId(self.dispatch_seq.fetch_add(1, Ordering::Relaxed));

        let Some(handlers) = self.registry.handlers_for(action) else {
            warn!(action, "unregistered action dispatched");
            return future::ready(Ok(DispatchResult::empty(dispatch_id))).boxed();
        };

        trace!(%dispatch_id, action, handlers = handlers.len(), initializer, "dispatch");
        let info = Arc::new(DispatchInfo {
            action: action.to_string(),
            dispatch_id,
            payload: payload.clone(),
            initializer,
        });

        let inner = Arc::clone(self);
        let action = action.to_string();
        let base: ActionFn = Box::new(move || {
            async move {
                let scope = ActionScope {
                    inner: Arc::clone(&inner),
                    dispatch_id,
                    action: Arc::from(action.as_str()),
                };
                let futures: Vec<HandlerFuture> = handlers
                    .iter()
                    .map(|handler| handler(scope.clone(), payload.clone()))
                    .collect();
                let partials = future::try_join_all(futures)
                    .await
                    .map_err(|e| DispatchError::tag(dispatch_id, &action, e))?;

                let mut merged = Map::new();
                for partial in partials.into_iter().flatten() {
                    match partial {
                        Value::Object(map) => merged.extend(map),
                        _ => warn!(%dispatch_id, action = %action, "ignoring non-object handler result"),
                    }
                }
                trace!(%dispatch_id, action = %action, result_keys = merged.len(), "executed");
                Ok(DispatchResult {
                    dispatch_id,
                    value: merged,
                })
            }
            .boxed()
        });

        let wrapped = self.middleware.wrap(base, info);
        wrapped()
    }

    fn apply_update(
        &self,
        mutator: impl FnOnce(&mut Draft),
        dispatch_id: Option<DispatchId>,
        action: Option<String>,
    ) -> Arc<UpdateEvent> {
        let _guard = self.commit_lock.lock();

        let base = self.snapshot.read().clone();
        let mut draft = Draft::new(base);
        mutator(&mut draft);
        let (next, patches, reverts) = draft.commit();

        let prev = {
            let mut snapshot = self.snapshot.write();
            std::mem::replace(&mut *snapshot, next.clone())
        };

        let changed_mask = self.bits.changed_mask(&prev, &next);
        let event = self.patch_log.record(dispatch_id, action, patches, reverts);
        trace!(seq = event.seq, changed_mask, patches = event.patches.len(), "update committed");

        // Settled markers whose value just landed are no longer needed.
        self.cache.sweep_settled(&next);
        self.subscriptions
            .broadcast_changed(&prev, &next, changed_mask, &self.bits);
        event
    }

    fn get(&self, name: &str, item: Option<&ItemKey>) -> Option<Arc<Value>> {
        let snapshot = self.snapshot.read();
        let slice = snapshot.slice(name)?;
        match item {
            None => Some(Arc::clone(slice)),
            Some(key) => crate::state::lookup_item(slice, key).map(|v| Arc::new(v.clone())),
        }
    }

    fn read(self: &Arc<Self>, name: &str, item: Option<&ItemKey>) -> Result<ReadOutcome> {
        let snapshot = self.snapshot.read().clone();

        // Fast path: already initialized.
        if let Some(value) = snapshot.ready_value(name, item) {
            return Ok(ReadOutcome::Ready(value));
        }

        let mut slice = name.to_string();
        let mut item = item.cloned();

        // Derived slices compute from other slices; an uninitialized
        // dependency redirects the read to the lazy load of that dependency.
        if let Some(result) = self.derived.evaluate(&slice, item.as_ref(), &snapshot, &self.bits) {
            match result? {
                Evaluation::Ready(value) => return Ok(ReadOutcome::Ready(value)),
                Evaluation::Unready { slice: dep, item: dep_item } => {
                    slice = dep;
                    item = dep_item;
                }
            }
        }

        let action = self
            .initializers
            .read()
            .get(&slice)
            .cloned()
            .ok_or_else(|| StoreError::MissingInitializer {
                slice: slice.clone(),
                item: item.clone(),
            })?;

        let key = CacheKey { slice, item };
        let restart = self.stale_reload == StaleReload::Restart;
        let decision = self
            .cache
            .read_or_start(&key, restart, || StoreInner::make_load(self, &key, &action));

        match decision {
            CacheDecision::Started(loading) | CacheDecision::Join(loading) => {
                Ok(ReadOutcome::Pending(loading))
            }
            CacheDecision::Stale => Err(StoreError::InitializerNoEffect {
                slice: key.slice,
                action,
            }),
            CacheDecision::Failed(error) => Ok(ReadOutcome::Failed(LoadFailure {
                key,
                error,
                store: Arc::downgrade(self),
            })),
        }
    }

    /// Build the in-flight load for a key. The initializer dispatch is
    /// deferred until the handle is first polled, so it never re-enters the
    /// read that created it.
    fn make_load(self: &Arc<Self>, key: &CacheKey, action: &str) -> Loading {
        let token = self.load_seq.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, action, "initialize");

        let payload: Vec<Value> = key.item.iter().map(ItemKey::to_value).collect();
        let weak = Arc::downgrade(self);
        let key = key.clone();
        let action = action.to_string();
        let fut = async move {
            let Some(inner) = weak.upgrade() else { return };
            let dispatched = StoreInner::dispatch(&inner, &action, payload, true);
            drop(inner);

            let result = dispatched.await;

            let Some(inner) = weak.upgrade() else { return };
            let settled = result.map(|_| ()).map_err(|e| {
                Arc::new(StoreError::Initializer {
                    slice: key.slice.clone(),
                    item: key.item.clone(),
                    action: action.clone(),
                    source: Box::new(StoreError::from(e)),
                })
            });
            inner.cache.settle(&key, settled);
        }
        .boxed();

        Loading::new(token, fut)
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let pending = self.cache.pending_count();
        if pending > 0 {
            warn!(pending, "store dropped with in-flight loads");
        }
    }
}

/// The state container.
///
/// Owns the authoritative snapshot, the action/derived registries, the lazy
/// load cache, the dependency bitmask table, and the subscription registry.
/// Cloning yields another handle to the same container.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let StoreConfig {
            initial_state,
            initializers,
            middleware,
            patch_history,
            stale_reload,
        } = config;

        Self {
            inner: Arc::new(StoreInner {
                snapshot: RwLock::new(Snapshot::from_values(initial_state)),
                commit_lock: Mutex::new(()),
                registry: ActionRegistry::new(),
                derived: DerivedRegistry::new(),
                initializers: RwLock::new(initializers),
                cache: LazyCache::new(),
                bits: DependencyBits::new(),
                middleware: MiddlewareChain::new(middleware),
                subscriptions: SubscriptionManager::new(),
                patch_log: PatchLog::new(patch_history),
                context: SharedContext::new(),
                dispatch_seq: AtomicU64::new(1),
                load_seq: AtomicU64::new(1),
                stale_reload,
            }),
        }
    }

    // --- Registration ---

    /// Register one handler for an action name. Idempotent for the same
    /// handler identity.
    pub fn register_action(&self, action: &str, handler: ActionHandler) {
        self.inner.registry.register(action, handler);
    }

    /// Merge a batch of handlers; safe to call repeatedly with overlapping
    /// names.
    pub fn register_actions<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, ActionHandler)>,
    {
        self.inner.registry.register_many(entries);
    }

    /// Register a derived slice.
    pub fn register_derived(&self, name: &str, f: DeriveFn) {
        self.inner.derived.register(name, f, &self.inner.bits);
    }

    /// Bind an initializer action to a slice name.
    pub fn register_initializer(&self, slice: impl Into<String>, action: impl Into<String>) {
        self.inner
            .initializers
            .write()
            .insert(slice.into(), action.into());
    }

    // --- Dispatch & update ---

    /// Dispatch an action to all of its handlers.
    ///
    /// Resolves to the shallow merge of the handlers' partial results, tagged
    /// with this dispatch's id. Dispatching an unregistered action resolves
    /// to an empty result and logs a warning.
    pub fn dispatch(
        &self,
        action: &str,
        payload: Vec<Value>,
    ) -> BoxFuture<'static, std::result::Result<DispatchResult, DispatchError>> {
        StoreInner::dispatch(&self.inner, action, payload, false)
    }

    /// Apply a mutator to a copy-on-write draft of the current snapshot and
    /// commit the result. Only touched slices are replaced; untouched slices
    /// keep their identity. Returns the committed update with its patches
    /// and reverts.
    pub fn update(&self, mutator: impl FnOnce(&mut Draft)) -> Arc<UpdateEvent> {
        self.inner.apply_update(mutator, None, None)
    }

    // --- Reads ---

    /// Read a slice or item.
    ///
    /// Returns `Ready` synchronously when the value (or a derived value) is
    /// available, `Pending` with the shared in-flight load when a lazy
    /// initialization is underway (await it, then re-read), or `Failed` when
    /// the last load failed (clear or retry). Reading a missing slice with no
    /// registered initializer is a configuration error.
    pub fn read(&self, name: &str, item: Option<&ItemKey>) -> Result<ReadOutcome> {
        StoreInner::read(&self.inner, name, item)
    }

    /// Raw slice access, including the uninitialized sentinel. Never
    /// triggers a load.
    pub fn get(&self, name: &str, item: Option<&ItemKey>) -> Option<Arc<Value>> {
        self.inner.get(name, item)
    }

    /// The current committed snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.read().clone()
    }

    // --- Observation ---

    /// Subscribe to committed changes intersecting the configured slices.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.inner.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.unsubscribe(id)
    }

    /// The bit this store assigned to a slice name.
    pub fn mask_for(&self, name: &str) -> u64 {
        self.inner.bits.mask_for(name)
    }

    /// Retained update history.
    pub fn patch_log(&self) -> &PatchLog {
        &self.inner.patch_log
    }

    /// The shared mutable context handed to handlers.
    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            slice_count: self.inner.snapshot.read().len(),
            pending_loads: self.inner.cache.pending_count(),
            failed_loads: self.inner.cache.failed_count(),
            subscription_count: self.inner.subscriptions.subscription_count(),
            registered_actions: self.inner.registry.len(),
            derived_slices: self.inner.derived.len(),
            dispatch_count: self.inner.dispatch_seq.load(Ordering::Relaxed) - 1,
            update_count: self.inner.patch_log.recorded(),
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("snapshot", &*self.inner.snapshot.read())
            .finish()
    }
}
