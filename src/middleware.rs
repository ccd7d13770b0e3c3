//! Middleware interception around action dispatch.

use crate::error::DispatchError;
use crate::store::DispatchResult;
use crate::types::DispatchId;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Metadata describing one dispatch, shared with every middleware layer.
#[derive(Clone, Debug)]
pub struct DispatchInfo {
    pub action: String,
    pub dispatch_id: DispatchId,
    pub payload: Vec<Value>,
    /// Whether this dispatch was triggered by lazy initialization rather
    /// than an explicit caller.
    pub initializer: bool,
}

/// The wrapped action: invoking it consumes it, so every layer can call the
/// inner action at most once.
pub type ActionFn =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<DispatchResult, DispatchError>> + Send>;

/// One middleware layer: receives the next-inner action and the dispatch
/// metadata, returns a function of the same shape. Results and errors must
/// pass through unchanged in shape.
pub type Middleware = Arc<dyn Fn(ActionFn, Arc<DispatchInfo>) -> ActionFn + Send + Sync>;

/// Ordered middleware list, composed right-to-left so the first configured
/// layer is outermost.
pub(crate) struct MiddlewareChain {
    layers: Vec<Middleware>,
}

impl MiddlewareChain {
    pub fn new(layers: Vec<Middleware>) -> Self {
        Self { layers }
    }

    pub fn wrap(&self, action: ActionFn, info: Arc<DispatchInfo>) -> ActionFn {
        self.layers
            .iter()
            .rev()
            .fold(action, |inner, layer| layer(inner, Arc::clone(&info)))
    }
}

/// Built-in middleware logging dispatch begin, completion, and failure.
pub fn logging() -> Middleware {
    Arc::new(|next, info| {
        Box::new(move || {
            async move {
                debug!(
                    dispatch_id = %info.dispatch_id,
                    action = %info.action,
                    initializer = info.initializer,
                    "dispatch"
                );
                let started = Instant::now();
                let result = next().await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(result) => debug!(
                        dispatch_id = %result.dispatch_id,
                        action = %info.action,
                        elapsed_ms,
                        "executed"
                    ),
                    Err(error) => debug!(
                        dispatch_id = %error.dispatch_id,
                        action = %info.action,
                        elapsed_ms,
                        error = %error.source,
                        "dispatch failed"
                    ),
                }
                result
            }
            .boxed()
        })
    })
}
