//! State entries and snapshots.
//!
//! The entry layer is the prerequisite for everything else: stable keys with
//! strictly increasing per-key versions are what make optimistic concurrency,
//! diffing, and replay possible.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Monotonic, per-store snapshot identifier.
///
/// Snapshot ids are assigned by the store that took the snapshot and are
/// strictly increasing within that store. They are not globally unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Creates a snapshot id from a raw sequence number.
    #[must_use]
    pub const fn from_seq(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot-{}", self.0)
    }
}

/// A single versioned key/value record.
///
/// Versions start at 1 and increase by exactly 1 per successful mutation.
/// On delete-then-recreate the lineage continues from the prior maximum, so
/// every historical version stays addressable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Unique key within the store.
    pub key: String,

    /// Opaque structured payload.
    pub value: Value,

    /// Strictly increasing per-key version.
    pub version: u64,

    /// When this version was committed.
    pub updated_at: DateTime<Utc>,

    /// Optional caller-supplied metadata.
    pub metadata: Option<serde_json::Value>,
}

impl StateEntry {
    /// Creates an entry at an explicit version, stamped now.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value: Value,
        version: u64,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            version,
            updated_at: Utc::now(),
            metadata,
        }
    }
}

/// Immutable point-in-time copy of every live entry in a store.
///
/// Snapshots are owned by the caller: later store writes never affect a
/// snapshot that has already been taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Store-assigned monotonic id.
    pub id: SnapshotId,

    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,

    /// Live entries at the moment of the snapshot, keyed ascending.
    pub entries: BTreeMap<String, StateEntry>,
}

impl StateSnapshot {
    /// Builds a snapshot from an id and a set of entries.
    #[must_use]
    pub fn new(id: SnapshotId, entries: BTreeMap<String, StateEntry>) -> Self {
        Self {
            id,
            taken_at: Utc::now(),
            entries,
        }
    }

    /// Returns the entry for a key, if live at snapshot time.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    /// Number of live entries captured.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries were live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
