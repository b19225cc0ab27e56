//! Snapshot diffing.
//!
//! Key invariants:
//! - `diff_snapshots(a, a)` is empty.
//! - Applying `diff_snapshots(a, b)` onto `a`'s entries reproduces `b`'s.
//! - Output order is ascending by key, so identical inputs always produce
//!   identical output for audit consumers.

use serde::{Deserialize, Serialize};

use super::entry::{StateEntry, StateSnapshot};

/// Kind of change a diff entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Key present only in the `after` snapshot.
    Create,
    /// Key present in both with differing version or value.
    Update,
    /// Key present only in the `before` snapshot.
    Delete,
}

/// One per-key change between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    /// What happened to the key.
    pub kind: DiffKind,

    /// The affected key.
    pub key: String,

    /// Entry before the change; absent for creates.
    pub before: Option<StateEntry>,

    /// Entry after the change; absent for deletes.
    pub after: Option<StateEntry>,
}

impl StateDiff {
    /// Diff entry for a newly created key.
    #[must_use]
    pub fn create(after: StateEntry) -> Self {
        Self {
            kind: DiffKind::Create,
            key: after.key.clone(),
            before: None,
            after: Some(after),
        }
    }

    /// Diff entry for an updated key.
    #[must_use]
    pub fn update(before: StateEntry, after: StateEntry) -> Self {
        Self {
            kind: DiffKind::Update,
            key: after.key.clone(),
            before: Some(before),
            after: Some(after),
        }
    }

    /// Diff entry for a deleted key.
    #[must_use]
    pub fn delete(before: StateEntry) -> Self {
        Self {
            kind: DiffKind::Delete,
            key: before.key.clone(),
            before: Some(before),
            after: None,
        }
    }
}

/// Compares two snapshots and returns the changes from `before` to `after`.
///
/// Unchanged keys are omitted. Results are ordered ascending by key.
#[must_use]
pub fn diff_snapshots(before: &StateSnapshot, after: &StateSnapshot) -> Vec<StateDiff> {
    let mut diffs = Vec::new();

    // BTreeMap iteration is key-ascending on both sides, and every key falls
    // into exactly one of the three cases, so a simple union walk suffices.
    for (key, b) in &before.entries {
        match after.entries.get(key) {
            None => diffs.push(StateDiff::delete(b.clone())),
            Some(a) if a.version != b.version || a.value != b.value => {
                diffs.push(StateDiff::update(b.clone(), a.clone()));
            }
            Some(_) => {}
        }
    }
    for (key, a) in &after.entries {
        if !before.entries.contains_key(key) {
            diffs.push(StateDiff::create(a.clone()));
        }
    }

    diffs.sort_by(|x, y| x.key.cmp(&y.key));
    diffs
}

/// Applies a diff list onto a snapshot's entries, producing the entry map of
/// the target snapshot. Used by tests to verify replay and by prediction
/// consumers to materialize a projected state.
#[must_use]
pub fn apply_diffs(
    base: &StateSnapshot,
    diffs: &[StateDiff],
) -> std::collections::BTreeMap<String, StateEntry> {
    let mut entries = base.entries.clone();
    for d in diffs {
        match d.kind {
            DiffKind::Create | DiffKind::Update => {
                if let Some(after) = &d.after {
                    entries.insert(d.key.clone(), after.clone());
                }
            }
            DiffKind::Delete => {
                entries.remove(&d.key);
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::entry::SnapshotId;
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn snap(id: u64, entries: Vec<StateEntry>) -> StateSnapshot {
        let map: BTreeMap<String, StateEntry> =
            entries.into_iter().map(|e| (e.key.clone(), e)).collect();
        StateSnapshot::new(SnapshotId::from_seq(id), map)
    }

    #[test]
    fn identical_snapshots_diff_empty() {
        let s = snap(1, vec![StateEntry::new("a", Value::Int(1), 1, None)]);
        assert!(diff_snapshots(&s, &s).is_empty());
    }

    #[test]
    fn create_update_delete_are_classified() {
        let before = snap(
            1,
            vec![
                StateEntry::new("kept", Value::Int(1), 1, None),
                StateEntry::new("changed", Value::Int(1), 1, None),
                StateEntry::new("dropped", Value::Int(1), 1, None),
            ],
        );
        let after = snap(
            2,
            vec![
                StateEntry::new("kept", Value::Int(1), 1, None),
                StateEntry::new("changed", Value::Int(2), 2, None),
                StateEntry::new("added", Value::Int(9), 1, None),
            ],
        );

        let diffs = diff_snapshots(&before, &after);
        assert_eq!(diffs.len(), 3);

        // Ascending key order: added, changed, dropped.
        assert_eq!(diffs[0].key, "added");
        assert_eq!(diffs[0].kind, DiffKind::Create);
        assert!(diffs[0].before.is_none());

        assert_eq!(diffs[1].key, "changed");
        assert_eq!(diffs[1].kind, DiffKind::Update);
        assert_eq!(diffs[1].before.as_ref().unwrap().version, 1);
        assert_eq!(diffs[1].after.as_ref().unwrap().version, 2);

        assert_eq!(diffs[2].key, "dropped");
        assert_eq!(diffs[2].kind, DiffKind::Delete);
        assert!(diffs[2].after.is_none());
    }

    #[test]
    fn applying_diff_reproduces_target() {
        let before = snap(
            1,
            vec![
                StateEntry::new("a", Value::Int(1), 1, None),
                StateEntry::new("b", Value::Int(2), 1, None),
            ],
        );
        let after = snap(
            2,
            vec![
                StateEntry::new("a", Value::Int(10), 2, None),
                StateEntry::new("c", Value::Int(3), 1, None),
            ],
        );

        let diffs = diff_snapshots(&before, &after);
        let rebuilt = apply_diffs(&before, &diffs);
        assert_eq!(rebuilt, after.entries);
    }

    #[test]
    fn diff_is_deterministic() {
        let before = snap(1, vec![StateEntry::new("x", Value::Int(1), 1, None)]);
        let after = snap(
            2,
            vec![
                StateEntry::new("y", Value::Int(2), 1, None),
                StateEntry::new("z", Value::Int(3), 1, None),
            ],
        );
        let d1 = diff_snapshots(&before, &after);
        let d2 = diff_snapshots(&before, &after);
        assert_eq!(d1, d2);
    }
}
