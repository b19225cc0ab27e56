//! Latent state layer.
//!
//! `LatentStateStore` composes the versioned store, the causal graph, and
//! the two model strategies: it computes and indexes embeddings, runs
//! predictions, answers similarity queries, and owns the observer-hook
//! registry wired into the store's mutation lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::embedding::cosine_similarity;
use crate::error::{ModelError, StoreError, WorldError, WorldResult};
use crate::graph::DoGraph;
use crate::hook::{HookFailure, HookPhase, PredictiveUpdateHook};
use crate::model::{
    EmbeddingId, EmbeddingModel, PredictionModel, StateEmbedding, StatePrediction,
};
use crate::state::{SnapshotId, StateDiff, StateSnapshot};

fn lock_err(context: &'static str) -> WorldError {
    WorldError::internal(format!("poisoned lock: {context}"))
}

// Failure attribution id for the automatic post-mutation embedding, which
// runs alongside the hooks but is not itself a registered hook.
const AUTO_EMBED_ID: &str = "auto-embed";

#[derive(Default)]
struct LatentState {
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
    prediction_model: Option<Arc<dyn PredictionModel>>,
    embeddings: HashMap<SnapshotId, StateEmbedding>,
    predictions: HashMap<SnapshotId, StatePrediction>,
    hooks: Vec<Arc<dyn PredictiveUpdateHook>>,
}

/// Embedding/prediction layer over snapshots, with an observer registry.
///
/// Per-instance like every other registry; wire one to a [`StateStore`]
/// via [`StateStore::attach_observer`](crate::StateStore::attach_observer).
#[derive(Default)]
pub struct LatentStateStore {
    state: RwLock<LatentState>,
}

impl LatentStateStore {
    /// Creates an empty latent store with no models configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects the embedding strategy.
    pub fn set_embedding_model(&self, model: Arc<dyn EmbeddingModel>) -> WorldResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("latent.set_embedding_model"))?;
        state.embedding_model = Some(model);
        Ok(())
    }

    /// Injects the prediction strategy.
    pub fn set_prediction_model(&self, model: Arc<dyn PredictionModel>) -> WorldResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("latent.set_prediction_model"))?;
        state.prediction_model = Some(model);
        Ok(())
    }

    /// Computes and stores the embedding of a snapshot, keyed by its id.
    ///
    /// Recomputing for the same snapshot id overwrites the stored vector.
    /// Fails `NoModelConfigured` when no embedding strategy is set.
    pub fn compute_embedding(&self, snapshot: &StateSnapshot) -> WorldResult<StateEmbedding> {
        let model = self.embedding_model()?.ok_or(ModelError::NoModelConfigured {
            role: "embedding",
        })?;

        // The model runs outside the registry lock; reference strategies are
        // cheap but injected ones may not be.
        let vector = model.embed(snapshot)?;
        let embedding = StateEmbedding {
            id: EmbeddingId::new(),
            snapshot_id: snapshot.id,
            vector,
            computed_at: chrono::Utc::now(),
        };

        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("latent.compute_embedding"))?;
        state.embeddings.insert(snapshot.id, embedding.clone());
        Ok(embedding)
    }

    /// Returns the stored embedding for a snapshot, if any.
    pub fn embedding_for(&self, snapshot_id: SnapshotId) -> WorldResult<Option<StateEmbedding>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("latent.embedding_for"))?;
        Ok(state.embeddings.get(&snapshot_id).cloned())
    }

    /// Up to `top_k` other embedded snapshots ranked by descending cosine
    /// similarity to the query snapshot, excluding the query itself and
    /// anything below `min_similarity`.
    ///
    /// Similarities are clamped to [0, 1]. Fails `NotFound` when the query
    /// snapshot was never embedded; mismatched stored dimensions fail
    /// `DimensionMismatch`.
    pub fn find_similar_states(
        &self,
        snapshot_id: SnapshotId,
        top_k: usize,
        min_similarity: f32,
    ) -> WorldResult<Vec<(StateEmbedding, f32)>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("latent.find_similar"))?;
        let query = state
            .embeddings
            .get(&snapshot_id)
            .ok_or(StoreError::NotFound {
                key: snapshot_id.to_string(),
            })?;

        let mut ranked = Vec::new();
        for (id, candidate) in &state.embeddings {
            if *id == snapshot_id {
                continue;
            }
            let sim = cosine_similarity(&query.vector, &candidate.vector)?.clamp(0.0, 1.0);
            if sim >= min_similarity {
                ranked.push((candidate.clone(), sim));
            }
        }

        // Descending similarity; snapshot id breaks ties deterministically.
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.snapshot_id.cmp(&b.0.snapshot_id))
        });
        ranked.truncate(top_k);
        Ok(ranked)
    }

    /// Runs the configured prediction model from a snapshot and the causal
    /// graph, stores the result keyed by the source snapshot id, and fires
    /// every hook's `on_prediction`.
    ///
    /// Prediction is caller-initiated, never auto-triggered by mutations:
    /// it is comparatively expensive and graph-shaped. Hook failures come
    /// back as the secondary, non-fatal element of the pair.
    pub fn predict(
        &self,
        snapshot: &StateSnapshot,
        graph: &DoGraph,
        horizon_ms: u64,
    ) -> WorldResult<(StatePrediction, Vec<HookFailure>)> {
        let model = self
            .prediction_model()?
            .ok_or(ModelError::NoModelConfigured { role: "prediction" })?;

        let prediction = model.predict(snapshot, graph, horizon_ms)?;
        {
            let mut state = self.state.write().map_err(|_| lock_err("latent.predict"))?;
            state
                .predictions
                .insert(snapshot.id, prediction.clone());
        }

        let failures = self.notify_prediction(&prediction)?;
        Ok((prediction, failures))
    }

    /// Returns the stored prediction for a source snapshot, if any.
    pub fn prediction_for(&self, snapshot_id: SnapshotId) -> WorldResult<Option<StatePrediction>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("latent.prediction_for"))?;
        Ok(state.predictions.get(&snapshot_id).cloned())
    }

    /// Feeds an observed outcome back into the prediction model.
    pub fn learn(
        &self,
        prediction: &StatePrediction,
        actual: &StateSnapshot,
        actual_diffs: &[StateDiff],
    ) -> WorldResult<()> {
        let model = self
            .prediction_model()?
            .ok_or(ModelError::NoModelConfigured { role: "prediction" })?;
        model.learn(prediction, actual, actual_diffs)
    }

    /// Registers a hook at the end of the notification order.
    ///
    /// Hook ids are unique; re-registering an id fails `AlreadyExists`.
    pub fn register_hook(&self, hook: Arc<dyn PredictiveUpdateHook>) -> WorldResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("latent.register_hook"))?;
        if state.hooks.iter().any(|h| h.id() == hook.id()) {
            return Err(StoreError::AlreadyExists {
                key: hook.id().to_string(),
            }
            .into());
        }
        state.hooks.push(hook);
        Ok(())
    }

    /// Removes a hook by id. Returns whether anything was removed.
    pub fn unregister_hook(&self, id: &str) -> WorldResult<bool> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("latent.unregister_hook"))?;
        let before = state.hooks.len();
        state.hooks.retain(|h| h.id() != id);
        Ok(state.hooks.len() != before)
    }

    /// Fires every hook's `on_before_update` in registration order.
    ///
    /// A failing hook never blocks the rest; its failure is collected and
    /// returned.
    pub fn notify_before_update(
        &self,
        snapshot: &StateSnapshot,
        planned: &[StateDiff],
    ) -> WorldResult<Vec<HookFailure>> {
        let hooks = self.hooks_snapshot()?;
        let mut failures = Vec::new();
        for hook in &hooks {
            if let Err(err) = hook.on_before_update(snapshot, planned) {
                failures.push(HookFailure::new(hook.id(), HookPhase::BeforeUpdate, &err));
            }
        }
        Ok(failures)
    }

    /// Fires every hook's `on_after_update` in registration order, then —
    /// when an embedding model is configured — computes and stores the
    /// embedding of `after`, so every committed mutation gets embedded
    /// without an explicit caller request.
    pub fn notify_after_update(
        &self,
        before: &StateSnapshot,
        after: &StateSnapshot,
        diffs: &[StateDiff],
    ) -> WorldResult<Vec<HookFailure>> {
        let hooks = self.hooks_snapshot()?;
        let mut failures = Vec::new();
        for hook in &hooks {
            if let Err(err) = hook.on_after_update(before, after, diffs) {
                failures.push(HookFailure::new(hook.id(), HookPhase::AfterUpdate, &err));
            }
        }

        if self.embedding_model()?.is_some() {
            if let Err(err) = self.compute_embedding(after) {
                failures.push(HookFailure::new(AUTO_EMBED_ID, HookPhase::AfterUpdate, &err));
            }
        }
        Ok(failures)
    }

    /// Fires every hook's `on_prediction` in registration order.
    pub fn notify_prediction(
        &self,
        prediction: &StatePrediction,
    ) -> WorldResult<Vec<HookFailure>> {
        let hooks = self.hooks_snapshot()?;
        let mut failures = Vec::new();
        for hook in &hooks {
            if let Err(err) = hook.on_prediction(prediction) {
                failures.push(HookFailure::new(hook.id(), HookPhase::Prediction, &err));
            }
        }
        Ok(failures)
    }

    /// Drops all stored embeddings and predictions. Models and hooks stay.
    pub fn clear(&self) -> WorldResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("latent.clear"))?;
        state.embeddings.clear();
        state.predictions.clear();
        Ok(())
    }

    /// Number of stored embeddings.
    pub fn embedding_count(&self) -> WorldResult<usize> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("latent.embedding_count"))?;
        Ok(state.embeddings.len())
    }

    fn embedding_model(&self) -> WorldResult<Option<Arc<dyn EmbeddingModel>>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("latent.embedding_model"))?;
        Ok(state.embedding_model.clone())
    }

    fn prediction_model(&self) -> WorldResult<Option<Arc<dyn PredictionModel>>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("latent.prediction_model"))?;
        Ok(state.prediction_model.clone())
    }

    // Hooks are dispatched on a cloned registry so callbacks never run under
    // the registry lock and may re-enter this store.
    fn hooks_snapshot(&self) -> WorldResult<Vec<Arc<dyn PredictiveUpdateHook>>> {
        let state = self.state.read().map_err(|_| lock_err("latent.hooks"))?;
        Ok(state.hooks.clone())
    }
}
