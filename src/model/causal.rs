//! Reference prediction model.
//!
//! Projects future effects by walking the causal graph from recently
//! recorded actions: effects those actions have produced before are the
//! effects most likely to recur within the horizon. Effects recorded
//! further back than the horizon window are treated as stale and never
//! projected. Confidence combines the
//! amount of supporting causal evidence with a calibration factor that
//! `learn` moves toward the observed hit ratio over repeated cycles.

use std::collections::HashSet;
use std::sync::RwLock;

use chrono::Utc;

use crate::error::{WorldError, WorldResult};
use crate::graph::DoGraph;
use crate::state::{StateDiff, StateSnapshot};

use super::{PredictionId, PredictionModel, StatePrediction};

/// Confidence floor reported even with no causal evidence.
const CONFIDENCE_FLOOR: f32 = 0.05;

/// How many of the most recent actions to walk.
const RECENT_ACTION_WINDOW: usize = 16;

/// Evidence count at which saturation reaches one half.
const EVIDENCE_HALF_POINT: f32 = 4.0;

/// Weight of each observed outcome in the calibration moving average.
const LEARN_RATE: f32 = 0.3;

fn lock_err(context: &'static str) -> WorldError {
    WorldError::internal(format!("poisoned lock: {context}"))
}

/// Graph-walking prediction model with a feedback-calibrated confidence.
#[derive(Debug)]
pub struct CausalPredictionModel {
    // Calibration in [CONFIDENCE_FLOOR, 1]; moved toward the observed hit
    // ratio by `learn`.
    calibration: RwLock<f32>,
}

impl CausalPredictionModel {
    /// Creates a model with a neutral initial calibration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calibration: RwLock::new(0.5),
        }
    }

    /// Current calibration factor.
    pub fn calibration(&self) -> WorldResult<f32> {
        let cal = self
            .calibration
            .read()
            .map_err(|_| lock_err("causal.calibration"))?;
        Ok(*cal)
    }
}

impl Default for CausalPredictionModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionModel for CausalPredictionModel {
    fn predict(
        &self,
        snapshot: &StateSnapshot,
        graph: &DoGraph,
        horizon_ms: u64,
    ) -> WorldResult<StatePrediction> {
        let recent = graph.recent_actions(RECENT_ACTION_WINDOW)?;
        let now = Utc::now();
        let horizon = i64::try_from(horizon_ms).unwrap_or(i64::MAX);

        let mut predicted_actions = Vec::new();
        let mut predicted_diffs: Vec<StateDiff> = Vec::new();
        let mut seen_effects = HashSet::new();
        let mut seen_keys = HashSet::new();
        let mut evidence: u32 = 0;

        for action in &recent {
            // Only effects recorded within the horizon window count as
            // evidence; older outcomes are stale for this projection.
            let effects: Vec<_> = graph
                .effects_of(action.id)?
                .into_iter()
                .filter(|effect| {
                    let age_ms = now
                        .signed_duration_since(effect.recorded_at)
                        .num_milliseconds();
                    (0..=horizon).contains(&age_ms)
                })
                .collect();
            if effects.is_empty() {
                continue;
            }
            evidence += u32::try_from(effects.len()).unwrap_or(u32::MAX);
            if !predicted_actions.contains(&action.name) {
                predicted_actions.push(action.name.clone());
            }
            for effect in effects {
                if !seen_effects.insert(effect.id) {
                    continue;
                }
                for diff in effect.state_diff {
                    // One projected change per key; the most recent linked
                    // effect wins.
                    if seen_keys.insert(diff.key.clone()) {
                        predicted_diffs.push(diff);
                    }
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let evidence_f = evidence as f32;
        let saturation = evidence_f / (evidence_f + EVIDENCE_HALF_POINT);
        let confidence = (self.calibration()? * saturation)
            .max(CONFIDENCE_FLOOR)
            .min(1.0);

        Ok(StatePrediction {
            id: PredictionId::new(),
            source_snapshot_id: snapshot.id,
            predicted_diffs,
            predicted_actions,
            confidence,
            horizon_ms,
            predicted_at: Utc::now(),
        })
    }

    fn learn(
        &self,
        prediction: &StatePrediction,
        _actual: &StateSnapshot,
        actual_diffs: &[StateDiff],
    ) -> WorldResult<()> {
        let predicted_keys: HashSet<&str> = prediction
            .predicted_diffs
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        let actual_keys: HashSet<&str> = actual_diffs.iter().map(|d| d.key.as_str()).collect();

        let hit_ratio = if predicted_keys.is_empty() {
            // Predicting nothing was right exactly when nothing changed.
            if actual_keys.is_empty() {
                1.0
            } else {
                0.0
            }
        } else {
            let hits = predicted_keys.intersection(&actual_keys).count();
            #[allow(clippy::cast_precision_loss)]
            {
                hits as f32 / predicted_keys.len() as f32
            }
        };

        let mut cal = self
            .calibration
            .write()
            .map_err(|_| lock_err("causal.learn"))?;
        *cal = ((1.0 - LEARN_RATE) * *cal + LEARN_RATE * hit_ratio)
            .max(CONFIDENCE_FLOOR)
            .min(1.0);
        Ok(())
    }
}
