//! Action handler registry.

use crate::error::StoreError;
use crate::store::ActionScope;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Future returned by an action handler: an optional partial result object
/// to be shallow-merged into the dispatch result.
pub type HandlerFuture = BoxFuture<'static, Result<Option<Value>, StoreError>>;

/// An action handler. Receives a scoped store interface and the dispatch
/// payload. Handlers for one dispatch are driven concurrently (interleaved at
/// await points, never in parallel).
pub type ActionHandler = Arc<dyn Fn(ActionScope, Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as an [`ActionHandler`].
pub fn handler<F, Fut>(f: F) -> ActionHandler
where
    F: Fn(ActionScope, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, StoreError>> + Send + 'static,
{
    Arc::new(move |scope, payload| f(scope, payload).boxed())
}

/// Name → ordered set of handlers.
///
/// Registration is an idempotent merge: the same handler (by `Arc` identity)
/// registered twice under one name is kept once, and repeated registration
/// calls with overlapping names are safe.
pub(crate) struct ActionRegistry {
    handlers: RwLock<HashMap<String, Vec<ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, action: &str, handler: ActionHandler) {
        let mut handlers = self.handlers.write();
        let entry = handlers.entry(action.to_string()).or_default();
        if !entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            entry.push(handler);
        }
    }

    pub fn register_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, ActionHandler)>,
    {
        for (action, handler) in entries {
            self.register(&action, handler);
        }
    }

    /// The handlers for an action, in registration order. `None` when the
    /// action is unregistered.
    pub fn handlers_for(&self, action: &str) -> Option<Vec<ActionHandler>> {
        let handlers = self.handlers.read();
        let entry = handlers.get(action)?;
        Some(entry.clone())
    }

    pub fn is_registered(&self, action: &str) -> bool {
        self.handlers.read().contains_key(action)
    }

    /// Number of registered action names.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ActionHandler {
        handler(|_scope, _payload| async { Ok(None) })
    }

    #[test]
    fn test_same_handler_identity_is_deduplicated() {
        let registry = ActionRegistry::new();
        let h = noop();
        registry.register("loadQuote", h.clone());
        registry.register("loadQuote", h);
        assert_eq!(registry.handlers_for("loadQuote").unwrap().len(), 1);
    }

    #[test]
    fn test_distinct_handlers_accumulate_in_order() {
        let registry = ActionRegistry::new();
        registry.register("loadQuote", noop());
        registry.register("loadQuote", noop());
        assert_eq!(registry.handlers_for("loadQuote").unwrap().len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_action() {
        let registry = ActionRegistry::new();
        assert!(registry.handlers_for("nope").is_none());
        assert!(!registry.is_registered("nope"));
    }
}
