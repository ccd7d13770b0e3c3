//! Shared mutable context handed to action handlers.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Keyed bag of shared values that are not part of the state tree: API
/// clients, clocks, test fakes.
///
/// Unlike slices, entries are mutable in place and carry no change
/// notification. Handlers never run truly in parallel, so treating the
/// context as single-writer-at-a-time is sound.
#[derive(Default)]
pub struct SharedContext {
    values: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.write().insert(key.into(), Arc::new(value));
    }

    /// Fetch a value by key and concrete type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.values.read().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.values.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort_unstable();
        f.debug_struct("SharedContext").field("keys", &keys).finish()
    }
}
