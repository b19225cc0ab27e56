//! Reference embedding model.

use crate::embedding::{project_snapshot, DEFAULT_EMBEDDING_DIM};
use crate::error::WorldResult;
use crate::state::StateSnapshot;

use super::EmbeddingModel;

/// Deterministic feature-hash embedding of a snapshot's serialized entries.
///
/// Offline and dependency-free beyond blake3; sufficient for similarity
/// search over state histories, not a semantic model.
#[derive(Debug, Clone)]
pub struct SimpleEmbeddingModel {
    dim: usize,
}

impl SimpleEmbeddingModel {
    /// Creates a model with the default dimension (128).
    #[must_use]
    pub fn new() -> Self {
        Self {
            dim: DEFAULT_EMBEDDING_DIM,
        }
    }

    /// Creates a model with a custom dimension.
    #[must_use]
    pub fn with_dimension(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for SimpleEmbeddingModel {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for SimpleEmbeddingModel {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, snapshot: &StateSnapshot) -> WorldResult<Vec<f32>> {
        Ok(project_snapshot(snapshot, self.dim))
    }
}
