//! Immutable snapshots, copy-on-write drafts, and patch records.

mod draft;
mod patches;
mod snapshot;

pub use draft::Draft;
pub use patches::{Patch, PatchLog, PatchOp, UpdateEvent};
pub use snapshot::Snapshot;

pub(crate) use snapshot::lookup_item;
