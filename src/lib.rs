//! # Lodestore
//!
//! A reactive state container with lazy single-flight loading and bitmask
//! change notification.
//!
//! ## Core Concepts
//!
//! - **Slices**: Named partitions of one authoritative state tree, held in
//!   immutable, structurally shared snapshots
//! - **Actions**: The only write path; named handlers mutate state through
//!   copy-on-write drafts, wrapped by a middleware chain
//! - **Lazy loads**: Reading an uninitialized slice starts its initializer
//!   action exactly once and hands every concurrent reader the same
//!   in-flight load
//! - **Derived slices**: Pure, memoized computations over other slices with
//!   automatic dependency discovery
//! - **Masked notification**: Subscribers observe per-slice bitmasks and are
//!   only notified when the slices they depend on change
//!
//! ## Example
//!
//! ```ignore
//! use lodestore::{handler, ReadOutcome, Store, StoreConfig};
//! use serde_json::json;
//!
//! let store = Store::new(StoreConfig {
//!     initial_state: [("quoteId".to_string(), json!(1))].into(),
//!     initializers: [("quotes".to_string(), "loadQuote".to_string())].into(),
//!     ..Default::default()
//! });
//!
//! store.register_action("loadQuote", handler(|scope, payload| async move {
//!     let id = payload[0].as_i64().unwrap_or(1);
//!     let quote = fetch_quote(id).await?;
//!     scope.update(|draft| draft.set_item("quotes", &id.into(), quote));
//!     Ok(Some(json!({ "quoteId": id })))
//! }));
//!
//! match store.read("quotes", Some(&1.into()))? {
//!     ReadOutcome::Ready(quote) => render(&quote),
//!     ReadOutcome::Pending(loading) => {
//!         loading.await; // then re-read
//!     }
//!     ReadOutcome::Failed(failure) => {
//!         failure.clear();
//!     }
//! }
//! ```

pub mod actions;
pub mod bits;
pub mod cache;
pub mod context;
pub mod derived;
pub mod error;
pub mod middleware;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use actions::{handler, ActionHandler, HandlerFuture};
pub use bits::{DependencyBits, ALL_BITS};
pub use cache::Loading;
pub use context::SharedContext;
pub use derived::{derive, DeriveCtx, DeriveFn, DeriveSignal};
pub use error::{DispatchError, Result, StoreError};
pub use middleware::{ActionFn, DispatchInfo, Middleware};
pub use state::{Draft, Patch, PatchLog, PatchOp, Snapshot, UpdateEvent};
pub use store::{
    ActionScope, DispatchResult, LoadFailure, ReadOutcome, StaleReload, Store, StoreConfig,
};
pub use subscriptions::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};
pub use types::{DispatchId, ItemKey, StoreStats};
