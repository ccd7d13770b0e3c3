//! Error types for the state container.

use crate::types::{DispatchId, ItemKey};
use thiserror::Error;

/// Main error type for container operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A slice was read with no value and no registered initializer.
    /// This is a wiring mistake, not a runtime failure.
    #[error("cannot read uninitialized slice {} without a registered initializer", key_display(.slice, .item.as_ref()))]
    MissingInitializer {
        slice: String,
        item: Option<ItemKey>,
    },

    /// The initializer action for a slice was dispatched and failed.
    /// Recoverable: surfaced through `ReadOutcome::Failed` with retry/clear.
    #[error("initializer {action} for slice {} failed: {source}", key_display(.slice, .item.as_ref()))]
    Initializer {
        slice: String,
        item: Option<ItemKey>,
        action: String,
        #[source]
        source: Box<StoreError>,
    },

    /// An initializer settled successfully but the slice is still
    /// uninitialized. Only raised under `StaleReload::Error`.
    #[error("initializer {action} for slice {slice} completed without populating it")]
    InitializerNoEffect { slice: String, action: String },

    /// An action handler failed with an application-level error.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A dispatch failed; carries the tagged dispatch error.
    #[error(transparent)]
    Dispatch(Box<DispatchError>),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store was dropped while a retry or clear was attempted.
    #[error("store closed")]
    Closed,
}

impl StoreError {
    /// Convenience constructor for application handler errors.
    pub fn handler(message: impl Into<String>) -> Self {
        StoreError::Handler(message.into())
    }

    /// The dispatch id already attached to this error, if any.
    pub fn dispatch_id(&self) -> Option<DispatchId> {
        match self {
            StoreError::Dispatch(inner) => Some(inner.dispatch_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<DispatchError> for StoreError {
    fn from(e: DispatchError) -> Self {
        StoreError::Dispatch(Box::new(e))
    }
}

/// A failed dispatch, tagged with the dispatch identifier for correlation
/// in logs and middleware.
#[derive(Debug, Error)]
#[error("dispatch {dispatch_id} of action {action} failed: {source}")]
pub struct DispatchError {
    pub dispatch_id: DispatchId,
    pub action: String,
    #[source]
    pub source: StoreError,
}

impl DispatchError {
    /// Tag a handler error with a dispatch id. An error that already carries
    /// a dispatch id keeps the id it has (the innermost dispatch wins).
    pub(crate) fn tag(dispatch_id: DispatchId, action: &str, source: StoreError) -> Self {
        let dispatch_id = source.dispatch_id().unwrap_or(dispatch_id);
        DispatchError {
            dispatch_id,
            action: action.to_string(),
            source,
        }
    }
}

fn key_display(slice: &str, item: Option<&ItemKey>) -> String {
    match item {
        Some(item) => format!("{slice}[{item}]"),
        None => slice.to_string(),
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_initializer_message_includes_item() {
        let err = StoreError::MissingInitializer {
            slice: "quotes".to_string(),
            item: Some(ItemKey::from(7)),
        };
        assert!(err.to_string().contains("quotes[7]"));
    }

    #[test]
    fn test_inner_dispatch_id_sticks() {
        let inner = DispatchError {
            dispatch_id: DispatchId(3),
            action: "loadQuote".to_string(),
            source: StoreError::handler("network down"),
        };
        let tagged = DispatchError::tag(DispatchId(9), "outer", inner.into());
        assert_eq!(tagged.dispatch_id, DispatchId(3));
    }
}
