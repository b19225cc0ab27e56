//! Pluggable model strategies.
//!
//! Strategies are small fixed-method capability traits selected at
//! construction time, never via runtime type inspection. The reference
//! implementations complete synchronously; heavier out-of-process models can
//! implement the same traits behind whatever wrapper owns their timeout and
//! cancellation policy.

mod causal;
mod simple;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorldResult;
use crate::graph::DoGraph;
use crate::state::{SnapshotId, StateDiff, StateSnapshot};

pub use causal::CausalPredictionModel;
pub use simple::SimpleEmbeddingModel;

/// Globally unique embedding identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingId(Uuid);

impl EmbeddingId {
    /// Creates a new random embedding ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EmbeddingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EmbeddingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique prediction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionId(Uuid);

impl PredictionId {
    /// Creates a new random prediction ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PredictionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-length vector representation of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEmbedding {
    /// Unique id of this embedding.
    pub id: EmbeddingId,

    /// The snapshot the vector represents.
    pub snapshot_id: SnapshotId,

    /// The vector itself (L2-normalized by the reference model).
    pub vector: Vec<f32>,

    /// When the embedding was computed.
    pub computed_at: DateTime<Utc>,
}

/// Projected future effects from a snapshot plus causal history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePrediction {
    /// Unique id of this prediction.
    pub id: PredictionId,

    /// The snapshot the projection started from.
    pub source_snapshot_id: SnapshotId,

    /// State changes expected to recur within the horizon.
    pub predicted_diffs: Vec<StateDiff>,

    /// Names of actions expected to drive those changes.
    pub predicted_actions: Vec<String>,

    /// Model-reported trust in [0, 1], recalibrated via `learn`.
    pub confidence: f32,

    /// Horizon the projection covers, in milliseconds.
    pub horizon_ms: u64,

    /// When the prediction was computed.
    pub predicted_at: DateTime<Utc>,
}

/// Strategy that turns a state snapshot into a fixed-length vector.
pub trait EmbeddingModel: Send + Sync {
    /// The fixed output dimension of this model.
    fn dimension(&self) -> usize;

    /// Embeds a snapshot. Equal snapshot content must yield equal vectors.
    fn embed(&self, snapshot: &StateSnapshot) -> WorldResult<Vec<f32>>;
}

/// Strategy that projects future effects from a snapshot plus causal
/// history, and recalibrates itself from observed outcomes.
pub trait PredictionModel: Send + Sync {
    /// Projects likely effects within `horizon_ms` of the snapshot.
    fn predict(
        &self,
        snapshot: &StateSnapshot,
        graph: &DoGraph,
        horizon_ms: u64,
    ) -> WorldResult<StatePrediction>;

    /// Feeds an observed outcome back into the model so later confidences
    /// track reality.
    fn learn(
        &self,
        prediction: &StatePrediction,
        actual: &StateSnapshot,
        actual_diffs: &[StateDiff],
    ) -> WorldResult<()>;
}
