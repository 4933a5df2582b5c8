/// Task Context
///
/// A per-task shared document that nodes read and write alongside the direct
/// dataflow the scheduler manages. Writes are versioned patches; the journal
/// is append-only and snapshots are taken periodically or on demand.

// Dotted-path set/unset diffs and path resolution
pub mod diff;

// State, patch and snapshot records
pub mod types;

// Optimistic-concurrency store over the unit of work
pub mod store;

pub use diff::{resolve_path, ContextDiff};
pub use store::TaskContextStore;
pub use types::{PatchPage, SnapshotTrigger, TaskContextPatch, TaskContextSnapshot, TaskContextState};
