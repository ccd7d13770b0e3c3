//! Derived slices: pure, memoized computations over other slices.

use crate::bits::{DependencyBits, ALL_BITS};
use crate::error::StoreError;
use crate::state::{lookup_item, Snapshot};
use crate::types::ItemKey;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Control-flow signal raised inside a derivation.
///
/// Derive functions propagate it with `?`; it is consumed by the evaluator
/// and never surfaces to readers. An unready signal redirects the read to the
/// lazy-load path for the specific missing dependency.
pub struct DeriveSignal(Signal);

enum Signal {
    Unready {
        slice: String,
        item: Option<ItemKey>,
    },
    Failed(StoreError),
}

impl From<StoreError> for DeriveSignal {
    fn from(e: StoreError) -> Self {
        DeriveSignal(Signal::Failed(e))
    }
}

impl fmt::Debug for DeriveSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Signal::Unready { slice, item } => match item {
                Some(item) => write!(f, "DeriveSignal::Unready({slice}[{item}])"),
                None => write!(f, "DeriveSignal::Unready({slice})"),
            },
            Signal::Failed(e) => write!(f, "DeriveSignal::Failed({e})"),
        }
    }
}

/// A derived-state function: pure and synchronous by construction.
///
/// Receives the tracking accessor and the item key the read asked for, and
/// returns the derived value. Asynchronous derivation is unrepresentable in
/// this signature; async work belongs in actions.
pub type DeriveFn =
    Arc<dyn Fn(&mut DeriveCtx<'_>, Option<&ItemKey>) -> Result<Value, DeriveSignal> + Send + Sync>;

/// Wrap a closure as a [`DeriveFn`].
pub fn derive<F>(f: F) -> DeriveFn
where
    F: Fn(&mut DeriveCtx<'_>, Option<&ItemKey>) -> Result<Value, DeriveSignal>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Tracking accessor handed to derive functions.
///
/// Records every slice touched, both for the derived slice's dependency mask
/// and for memoization (slice-level `Arc` identity; snapshots are immutable,
/// so an unchanged slice implies unchanged items).
pub struct DeriveCtx<'a> {
    snapshot: &'a Snapshot,
    bits: &'a DependencyBits,
    touched: Vec<(String, Arc<Value>)>,
    mask: u64,
}

impl DeriveCtx<'_> {
    /// Read a slice or item, recording the dependency. Raises the unready
    /// signal when the slice or item is uninitialized.
    pub fn get(&mut self, slice: &str, item: Option<&ItemKey>) -> Result<Value, DeriveSignal> {
        self.mask |= self.bits.mask_for(slice);
        let current = match self.snapshot.slice(slice) {
            Some(v) if !v.is_null() => Arc::clone(v),
            _ => {
                return Err(DeriveSignal(Signal::Unready {
                    slice: slice.to_string(),
                    item: item.cloned(),
                }))
            }
        };
        if !self.touched.iter().any(|(name, _)| name == slice) {
            self.touched.push((slice.to_string(), Arc::clone(&current)));
        }
        match item {
            None => Ok((*current).clone()),
            Some(key) => match lookup_item(&current, key) {
                Some(v) if !v.is_null() => Ok(v.clone()),
                _ => Err(DeriveSignal(Signal::Unready {
                    slice: slice.to_string(),
                    item: item.cloned(),
                })),
            },
        }
    }
}

/// Result of evaluating a derived slice.
pub(crate) enum Evaluation {
    Ready(Arc<Value>),
    /// A dependency was uninitialized; the read falls through to the lazy
    /// load of that dependency, not of the derived name.
    Unready {
        slice: String,
        item: Option<ItemKey>,
    },
}

struct Memo {
    inputs: Vec<(String, Arc<Value>)>,
    value: Arc<Value>,
}

struct DerivedSlice {
    f: DeriveFn,
    // One memo per item key: item-parameterized derivations don't evict each
    // other.
    memos: Mutex<HashMap<Option<ItemKey>, Memo>>,
}

/// Registry of derived slices.
pub(crate) struct DerivedRegistry {
    derivers: RwLock<HashMap<String, Arc<DerivedSlice>>>,
}

impl DerivedRegistry {
    pub fn new() -> Self {
        Self {
            derivers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a derived slice. Its mask starts all-ones (dependent on
    /// everything) until the first evaluation discovers the real set.
    pub fn register(&self, name: &str, f: DeriveFn, bits: &DependencyBits) {
        self.derivers.write().insert(
            name.to_string(),
            Arc::new(DerivedSlice {
                f,
                memos: Mutex::new(HashMap::new()),
            }),
        );
        bits.set_mask(name, ALL_BITS);
    }

    pub fn len(&self) -> usize {
        self.derivers.read().len()
    }

    /// Evaluate a derived slice against a snapshot. `None` when no deriver is
    /// registered under the name.
    pub fn evaluate(
        &self,
        name: &str,
        item: Option<&ItemKey>,
        snapshot: &Snapshot,
        bits: &DependencyBits,
    ) -> Option<Result<Evaluation, StoreError>> {
        let deriver = self.derivers.read().get(name).cloned()?;
        let mut memos = deriver.memos.lock();

        if let Some(memo) = memos.get(&item.cloned()) {
            let inputs_unchanged = memo.inputs.iter().all(|(slice, recorded)| {
                snapshot
                    .slice(slice)
                    .map_or(false, |current| Arc::ptr_eq(current, recorded))
            });
            if inputs_unchanged {
                return Some(Ok(Evaluation::Ready(Arc::clone(&memo.value))));
            }
        }

        let mut ctx = DeriveCtx {
            snapshot,
            bits,
            touched: Vec::new(),
            mask: 0,
        };
        match (deriver.f)(&mut ctx, item) {
            Ok(value) => {
                let value = Arc::new(value);
                bits.set_mask(name, ctx.mask);
                memos.insert(
                    item.cloned(),
                    Memo {
                        inputs: ctx.touched,
                        value: Arc::clone(&value),
                    },
                );
                Some(Ok(Evaluation::Ready(value)))
            }
            Err(DeriveSignal(Signal::Unready { slice, item })) => {
                Some(Ok(Evaluation::Unready { slice, item }))
            }
            Err(DeriveSignal(Signal::Failed(e))) => Some(Err(e)),
        }
    }
}
