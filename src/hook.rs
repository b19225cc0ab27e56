//! Predictive update hooks.
//!
//! Hooks are observers wired into the store's mutation lifecycle, not
//! transaction participants: a failing hook never blocks other hooks and
//! never rolls back a mutation that already committed. Failures are
//! collected into [`HookFailure`] records and surfaced to the caller as a
//! secondary, non-fatal result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorldResult;
use crate::model::StatePrediction;
use crate::state::{StateDiff, StateSnapshot};

/// Which callback a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// `on_before_update`, fired with the pre-state and planned changes.
    BeforeUpdate,
    /// `on_after_update`, fired once a mutation has committed.
    AfterUpdate,
    /// `on_prediction`, fired when a prediction has been stored.
    Prediction,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeUpdate => write!(f, "before_update"),
            Self::AfterUpdate => write!(f, "after_update"),
            Self::Prediction => write!(f, "prediction"),
        }
    }
}

/// A single hook callback that returned an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    /// Id of the hook that failed.
    pub hook_id: String,

    /// Callback phase the failure came from.
    pub phase: HookPhase,

    /// Rendered error message.
    pub message: String,
}

impl HookFailure {
    pub(crate) fn new(hook_id: &str, phase: HookPhase, err: &crate::error::WorldError) -> Self {
        Self {
            hook_id: hook_id.to_string(),
            phase,
            message: err.to_string(),
        }
    }
}

/// Observer over the store's mutation lifecycle and the prediction path.
///
/// Every callback has a no-op default, so implementors override only the
/// subset they care about. Hooks fire in registration order.
pub trait PredictiveUpdateHook: Send + Sync {
    /// Stable identifier, used for unregistration and failure attribution.
    fn id(&self) -> &str;

    /// Called before a mutation is applied, with the pre-state snapshot and
    /// the planned changes.
    fn on_before_update(
        &self,
        before: &StateSnapshot,
        planned: &[StateDiff],
    ) -> WorldResult<()> {
        let _ = (before, planned);
        Ok(())
    }

    /// Called after a mutation committed, with both snapshots and the
    /// realized diff.
    fn on_after_update(
        &self,
        before: &StateSnapshot,
        after: &StateSnapshot,
        diffs: &[StateDiff],
    ) -> WorldResult<()> {
        let _ = (before, after, diffs);
        Ok(())
    }

    /// Called when a prediction has been computed and stored.
    fn on_prediction(&self, prediction: &StatePrediction) -> WorldResult<()> {
        let _ = prediction;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: the hook trait must stay object-safe.
    fn _assert_hook_object_safe(_: &dyn PredictiveUpdateHook) {}

    struct IdOnly;

    impl PredictiveUpdateHook for IdOnly {
        fn id(&self) -> &str {
            "id-only"
        }
    }

    #[test]
    fn default_callbacks_are_no_ops() {
        use crate::state::{SnapshotId, StateSnapshot};
        use std::collections::BTreeMap;

        let hook = IdOnly;
        let snap = StateSnapshot::new(SnapshotId::from_seq(0), BTreeMap::new());
        assert!(hook.on_before_update(&snap, &[]).is_ok());
        assert!(hook.on_after_update(&snap, &snap, &[]).is_ok());
    }

    #[test]
    fn phase_display() {
        assert_eq!(format!("{}", HookPhase::BeforeUpdate), "before_update");
        assert_eq!(format!("{}", HookPhase::AfterUpdate), "after_update");
        assert_eq!(format!("{}", HookPhase::Prediction), "prediction");
    }
}
