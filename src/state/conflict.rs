//! Per-task conflict ledger records.
//!
//! A `ConflictRecord` is written by the *caller* after it catches a version
//! conflict — never by the store itself. Only the caller knows which logical
//! task attempted the write and whether it intends to retry, so the store
//! cannot attribute conflicts automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One rejected optimistic write, attributed to a task by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Key the write targeted.
    pub key: String,

    /// Version the writer expected.
    pub expected_version: u64,

    /// Version the store actually held at rejection time.
    pub actual_version: u64,

    /// The value the writer tried to commit.
    pub attempted_value: Value,

    /// When the record was created.
    pub recorded_at: DateTime<Utc>,
}

impl ConflictRecord {
    /// Creates a record stamped now.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        expected_version: u64,
        actual_version: u64,
        attempted_value: Value,
    ) -> Self {
        Self {
            key: key.into(),
            expected_version,
            actual_version,
            attempted_value,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_captures_both_versions() {
        let rec = ConflictRecord::new("job:7", 2, 4, Value::Int(99));
        assert_eq!(rec.key, "job:7");
        assert_eq!(rec.expected_version, 2);
        assert_eq!(rec.actual_version, 4);
        assert_eq!(rec.attempted_value, Value::Int(99));
    }
}
