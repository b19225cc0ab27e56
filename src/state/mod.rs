//! Versioned state: entries, snapshots, diffs, conflicts, and the store.

mod conflict;
mod diff;
mod entry;
mod store;

pub use conflict::ConflictRecord;
pub use diff::{apply_diffs, diff_snapshots, DiffKind, StateDiff};
pub use entry::{SnapshotId, StateEntry, StateSnapshot};
pub use store::{StateStore, WriteOutcome};
