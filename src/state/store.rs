//! Versioned key-indexed store with optimistic concurrency.
//!
//! This is the substrate's source of truth. Thread-safe, in-memory, and
//! lock-free from the caller's point of view: safety comes from per-key
//! version checks at commit time, not from blocking. Concurrent writers may
//! race; at most one wins per key per version, and every loser receives a
//! `Conflict` carrying both versions so it can re-read and retry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, WorldError, WorldResult};
use crate::hook::HookFailure;
use crate::latent::LatentStateStore;
use crate::value::Value;

use super::conflict::ConflictRecord;
use super::diff::{diff_snapshots, StateDiff};
use super::entry::{SnapshotId, StateEntry, StateSnapshot};

fn lock_err(context: &'static str) -> WorldError {
    WorldError::internal(format!("poisoned lock: {context}"))
}

/// Result of a committed mutation.
///
/// `entry` is the committed entry — for deletes, the entry that was removed.
/// `hook_failures` carries every observer callback that errored while being
/// notified about this mutation; the commit itself is unaffected by them.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// The entry the mutation committed (or removed, for deletes).
    pub entry: StateEntry,

    /// Non-fatal observer failures collected during notification.
    pub hook_failures: Vec<HookFailure>,
}

#[derive(Debug, Default)]
struct StoreState {
    live: BTreeMap<String, StateEntry>,
    history: HashMap<String, BTreeMap<u64, StateEntry>>,
    conflicts: HashMap<String, Vec<ConflictRecord>>,
    snapshot_seq: u64,
}

impl StoreState {
    fn take_snapshot(&mut self) -> StateSnapshot {
        self.snapshot_seq += 1;
        StateSnapshot::new(SnapshotId::from_seq(self.snapshot_seq), self.live.clone())
    }

    fn record_version(&mut self, entry: &StateEntry) {
        self.history
            .entry(entry.key.clone())
            .or_default()
            .insert(entry.version, entry.clone());
    }

    // Next version for a key: 1 for a fresh key, prior max + 1 after a
    // delete, so the per-key lineage stays a single total order.
    fn next_version(&self, key: &str) -> u64 {
        self.history
            .get(key)
            .and_then(|versions| versions.keys().next_back().copied())
            .map_or(1, |max| max + 1)
    }
}

// Snapshots surrounding a committed mutation, captured under the write lock
// and dispatched to the observer after it is released.
struct Notification {
    before: StateSnapshot,
    after: StateSnapshot,
    diffs: Vec<StateDiff>,
}

/// Versioned, snapshot-capable state store with a per-task conflict ledger.
///
/// Every registry is per-instance; independent stores never share state.
#[derive(Default)]
pub struct StateStore {
    state: RwLock<StoreState>,
    observer: RwLock<Option<Arc<LatentStateStore>>>,
}

impl StateStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires a latent store as the observer of this store's mutations.
    ///
    /// Once attached, every committed create/update/delete notifies the
    /// observer: `notify_before_update` with the pre-state snapshot and the
    /// planned changes, then `notify_after_update` with both snapshots and
    /// the realized diff. Failed mutations notify nothing.
    ///
    /// Both callbacks run after the mutation has committed. The snapshots
    /// they receive are captured atomically with the commit, but a hook that
    /// reads the store directly from `on_before_update` observes the
    /// post-mutation state.
    pub fn attach_observer(&self, observer: Arc<LatentStateStore>) -> WorldResult<()> {
        let mut slot = self
            .observer
            .write()
            .map_err(|_| lock_err("store.attach_observer"))?;
        *slot = Some(observer);
        Ok(())
    }

    /// Creates a new entry.
    ///
    /// Fails `AlreadyExists` if the key is live. Re-creating a previously
    /// deleted key continues its version lineage from the prior maximum.
    pub fn create(
        &self,
        key: &str,
        value: Value,
        metadata: Option<serde_json::Value>,
    ) -> WorldResult<WriteOutcome> {
        let (entry, notification) = {
            let mut state = self.state.write().map_err(|_| lock_err("store.create"))?;
            if state.live.contains_key(key) {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                }
                .into());
            }

            let entry = StateEntry::new(key, value, state.next_version(key), metadata);
            let notification = self.observed(|| {
                let before = state.take_snapshot();
                (before, vec![StateDiff::create(entry.clone())])
            })?;

            state.record_version(&entry);
            state.live.insert(key.to_string(), entry.clone());

            let notification = notification.map(|(before, diffs)| Notification {
                before,
                after: state.take_snapshot(),
                diffs,
            });
            (entry, notification)
        };

        let hook_failures = self.dispatch(notification)?;
        Ok(WriteOutcome {
            entry,
            hook_failures,
        })
    }

    /// Returns the current entry for a key, or `None` if not live.
    pub fn read(&self, key: &str) -> WorldResult<Option<StateEntry>> {
        let state = self.state.read().map_err(|_| lock_err("store.read"))?;
        Ok(state.live.get(key).cloned())
    }

    /// Returns the historical entry at an exact version, or `None` if that
    /// version was never committed. A miss is not an error.
    pub fn read_version(&self, key: &str, version: u64) -> WorldResult<Option<StateEntry>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("store.read_version"))?;
        Ok(state
            .history
            .get(key)
            .and_then(|versions| versions.get(&version))
            .cloned())
    }

    /// Replaces the value under optimistic concurrency.
    ///
    /// Fails `NotFound` if the key is not live and `Conflict` if
    /// `expected_version` does not match the current version. A rejected
    /// write is never partially applied.
    pub fn update(
        &self,
        key: &str,
        value: Value,
        expected_version: u64,
        metadata: Option<serde_json::Value>,
    ) -> WorldResult<WriteOutcome> {
        let (entry, notification) = {
            let mut state = self.state.write().map_err(|_| lock_err("store.update"))?;
            let current = state.live.get(key).cloned().ok_or(StoreError::NotFound {
                key: key.to_string(),
            })?;
            if current.version != expected_version {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    expected: expected_version,
                    actual: current.version,
                }
                .into());
            }

            let entry = StateEntry::new(key, value, current.version + 1, metadata);
            let notification = self.observed(|| {
                let before = state.take_snapshot();
                (
                    before,
                    vec![StateDiff::update(current.clone(), entry.clone())],
                )
            })?;

            state.record_version(&entry);
            state.live.insert(key.to_string(), entry.clone());

            let notification = notification.map(|(before, diffs)| Notification {
                before,
                after: state.take_snapshot(),
                diffs,
            });
            (entry, notification)
        };

        let hook_failures = self.dispatch(notification)?;
        Ok(WriteOutcome {
            entry,
            hook_failures,
        })
    }

    /// Removes the live value under optimistic concurrency.
    ///
    /// History is retained: every previously committed version remains
    /// readable via [`read_version`](Self::read_version). Same
    /// `NotFound`/`Conflict` semantics as [`update`](Self::update).
    pub fn delete(&self, key: &str, expected_version: u64) -> WorldResult<WriteOutcome> {
        let (entry, notification) = {
            let mut state = self.state.write().map_err(|_| lock_err("store.delete"))?;
            let current = state.live.get(key).cloned().ok_or(StoreError::NotFound {
                key: key.to_string(),
            })?;
            if current.version != expected_version {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    expected: expected_version,
                    actual: current.version,
                }
                .into());
            }

            let notification = self.observed(|| {
                let before = state.take_snapshot();
                (before, vec![StateDiff::delete(current.clone())])
            })?;

            state.live.remove(key);

            let notification = notification.map(|(before, diffs)| Notification {
                before,
                after: state.take_snapshot(),
                diffs,
            });
            (current, notification)
        };

        let hook_failures = self.dispatch(notification)?;
        Ok(WriteOutcome {
            entry,
            hook_failures,
        })
    }

    /// All live keys in ascending order.
    pub fn keys(&self) -> WorldResult<Vec<String>> {
        let state = self.state.read().map_err(|_| lock_err("store.keys"))?;
        Ok(state.live.keys().cloned().collect())
    }

    /// Takes an immutable point-in-time snapshot of every live entry.
    ///
    /// Each call gets an independent, strictly increasing id. Later store
    /// writes never affect a snapshot already taken.
    pub fn snapshot(&self) -> WorldResult<StateSnapshot> {
        let mut state = self.state.write().map_err(|_| lock_err("store.snapshot"))?;
        Ok(state.take_snapshot())
    }

    /// Compares two snapshots; see [`diff_snapshots`] for ordering.
    #[must_use]
    pub fn diff(&self, before: &StateSnapshot, after: &StateSnapshot) -> Vec<StateDiff> {
        diff_snapshots(before, after)
    }

    /// Number of versions retained for a key (across delete/recreate).
    ///
    /// Retention is unbounded; callers owning a compaction policy can use
    /// this to decide when to act.
    pub fn history_len(&self, key: &str) -> WorldResult<usize> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("store.history_len"))?;
        Ok(state.history.get(key).map_or(0, BTreeMap::len))
    }

    /// Appends a conflict record to a task's ledger.
    ///
    /// Never invoked automatically — the caller attributes the conflict to
    /// the task that attempted the write.
    pub fn record_conflict(&self, task_id: &str, record: ConflictRecord) -> WorldResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("store.record_conflict"))?;
        state
            .conflicts
            .entry(task_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    /// Returns a task's conflict records in recording order.
    pub fn get_conflicts(&self, task_id: &str) -> WorldResult<Vec<ConflictRecord>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("store.get_conflicts"))?;
        Ok(state.conflicts.get(task_id).cloned().unwrap_or_default())
    }

    /// Drops a task's conflict ledger.
    pub fn clear_conflicts(&self, task_id: &str) -> WorldResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("store.clear_conflicts"))?;
        state.conflicts.remove(task_id);
        Ok(())
    }

    // Runs `prepare` only when an observer is attached, so unobserved
    // mutations skip snapshot construction entirely.
    fn observed<T>(&self, prepare: impl FnOnce() -> T) -> WorldResult<Option<T>> {
        let slot = self.observer.read().map_err(|_| lock_err("store.observer"))?;
        Ok(slot.as_ref().map(|_| prepare()))
    }

    // Dispatches both lifecycle notifications outside the state lock, so a
    // hook may freely read the store. The before callback still receives the
    // pre-state snapshot captured atomically with the commit.
    fn dispatch(&self, notification: Option<Notification>) -> WorldResult<Vec<HookFailure>> {
        let Some(n) = notification else {
            return Ok(Vec::new());
        };
        let observer = {
            let slot = self.observer.read().map_err(|_| lock_err("store.observer"))?;
            slot.clone()
        };
        let Some(observer) = observer else {
            return Ok(Vec::new());
        };

        let mut failures = observer.notify_before_update(&n.before, &n.diffs)?;
        failures.extend(observer.notify_after_update(&n.before, &n.after, &n.diffs)?);
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::diff::DiffKind;

    #[test]
    fn create_starts_at_version_one() {
        let store = StateStore::new();
        let out = store.create("a", Value::Int(1), None).unwrap();
        assert_eq!(out.entry.version, 1);
        assert!(out.hook_failures.is_empty());
        assert_eq!(store.read("a").unwrap().unwrap().value, Value::Int(1));
    }

    #[test]
    fn create_duplicate_fails_already_exists() {
        let store = StateStore::new();
        store.create("a", Value::Int(1), None).unwrap();
        let err = store.create("a", Value::Int(2), None).unwrap_err();
        assert!(matches!(
            err,
            WorldError::Store(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn update_requires_live_key() {
        let store = StateStore::new();
        let err = store.update("ghost", Value::Int(1), 1, None).unwrap_err();
        assert!(matches!(err, WorldError::Store(StoreError::NotFound { .. })));
    }

    #[test]
    fn conflict_carries_true_current_version_and_leaves_state_untouched() {
        let store = StateStore::new();
        store.create("c", Value::Int(0), None).unwrap();
        store.update("c", Value::Int(1), 1, None).unwrap();

        let err = store.update("c", Value::Int(2), 1, None).unwrap_err();
        match err {
            WorldError::Store(StoreError::Conflict {
                key,
                expected,
                actual,
            }) => {
                assert_eq!(key, "c");
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        // The losing write must not have mutated anything.
        let current = store.read("c").unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.value, Value::Int(1));
    }

    #[test]
    fn read_version_replays_every_committed_version() {
        let store = StateStore::new();
        store.create("k", Value::Int(10), None).unwrap();
        store.update("k", Value::Int(20), 1, None).unwrap();
        store.update("k", Value::Int(30), 2, None).unwrap();

        for (v, expected) in [(1, 10), (2, 20), (3, 30)] {
            let entry = store.read_version("k", v).unwrap().unwrap();
            assert_eq!(entry.value, Value::Int(expected));
            assert_eq!(entry.version, v);
        }
        assert!(store.read_version("k", 4).unwrap().is_none());
        assert!(store.read_version("other", 1).unwrap().is_none());
    }

    #[test]
    fn delete_retains_history_and_recreate_continues_lineage() {
        let store = StateStore::new();
        store.create("k", Value::Int(1), None).unwrap();
        store.update("k", Value::Int(2), 1, None).unwrap();
        let removed = store.delete("k", 2).unwrap();
        assert_eq!(removed.entry.version, 2);

        assert!(store.read("k").unwrap().is_none());
        assert_eq!(
            store.read_version("k", 1).unwrap().unwrap().value,
            Value::Int(1)
        );

        // Lineage continues past the deleted maximum.
        let recreated = store.create("k", Value::Int(9), None).unwrap();
        assert_eq!(recreated.entry.version, 3);
        assert_eq!(store.history_len("k").unwrap(), 3);
        assert_eq!(
            store.read_version("k", 2).unwrap().unwrap().value,
            Value::Int(2)
        );
    }

    #[test]
    fn delete_checks_expected_version() {
        let store = StateStore::new();
        store.create("k", Value::Int(1), None).unwrap();
        let err = store.delete("k", 7).unwrap_err();
        assert!(err.is_conflict());
        assert!(store.read("k").unwrap().is_some());
    }

    #[test]
    fn keys_are_sorted_and_live_only() {
        let store = StateStore::new();
        store.create("b", Value::Int(1), None).unwrap();
        store.create("a", Value::Int(1), None).unwrap();
        store.create("c", Value::Int(1), None).unwrap();
        store.delete("b", 1).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a", "c"]);
    }

    #[test]
    fn snapshots_are_immutable_and_independently_numbered() {
        let store = StateStore::new();
        store.create("a", Value::Int(1), None).unwrap();

        let s1 = store.snapshot().unwrap();
        let s2 = store.snapshot().unwrap();
        assert!(s1.id < s2.id);

        store.update("a", Value::Int(99), 1, None).unwrap();
        store.create("b", Value::Int(2), None).unwrap();

        // Already-taken snapshots never change.
        assert_eq!(s1.get("a").unwrap().value, Value::Int(1));
        assert!(s1.get("b").is_none());
        assert_eq!(s1.entries, s2.entries);
    }

    #[test]
    fn diff_between_store_snapshots() {
        let store = StateStore::new();
        store.create("user:1", Value::Int(1), None).unwrap();
        store.create("user:2", Value::Int(2), None).unwrap();
        let s1 = store.snapshot().unwrap();

        store.create("user:3", Value::Int(3), None).unwrap();
        store.update("user:1", Value::Int(11), 1, None).unwrap();
        store.delete("user:2", 1).unwrap();
        let s2 = store.snapshot().unwrap();

        let diffs = store.diff(&s1, &s2);
        assert_eq!(diffs.len(), 3);
        assert_eq!(diffs[0].key, "user:1");
        assert_eq!(diffs[0].kind, DiffKind::Update);
        assert_eq!(diffs[1].key, "user:2");
        assert_eq!(diffs[1].kind, DiffKind::Delete);
        assert_eq!(diffs[2].key, "user:3");
        assert_eq!(diffs[2].kind, DiffKind::Create);
    }

    #[test]
    fn conflict_ledger_is_caller_driven() {
        let store = StateStore::new();
        store.create("k", Value::Int(0), None).unwrap();

        // A rejected write records nothing by itself.
        let _ = store.update("k", Value::Int(1), 9, None).unwrap_err();
        assert!(store.get_conflicts("task-1").unwrap().is_empty());

        store
            .record_conflict("task-1", ConflictRecord::new("k", 9, 1, Value::Int(1)))
            .unwrap();
        store
            .record_conflict("task-1", ConflictRecord::new("k", 9, 1, Value::Int(2)))
            .unwrap();

        let records = store.get_conflicts("task-1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attempted_value, Value::Int(1));
        assert!(store.get_conflicts("task-2").unwrap().is_empty());

        store.clear_conflicts("task-1").unwrap();
        assert!(store.get_conflicts("task-1").unwrap().is_empty());
    }
}
