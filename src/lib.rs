//! # Veristate - Versioned Causal World-Model Substrate
//!
//! Veristate is the state substrate beneath an autonomous-agent
//! orchestration platform: a versioned store with optimistic concurrency, a
//! multi-tier constraint evaluator, a causal action/effect graph, and a
//! pluggable embedding/prediction layer that together let the platform
//! ground decisions in verifiable, replayable state.
//!
//! ## Core Concepts
//!
//! - **StateStore**: versioned key-indexed store; concurrent writers race
//!   optimistically and losers get a retryable `Conflict`
//! - **ConstraintEngine**: hard (boolean) and soft (weighted-score)
//!   constraints answering "is this legal" and "is this a good idea"
//! - **DoGraph**: causal graph of recorded actions, effects, and links
//! - **LatentStateStore**: embeddings, similarity search, and
//!   feedback-calibrated predictions over snapshots
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use veristate::{
//!     LatentStateStore, SimpleEmbeddingModel, StateStore, Value,
//! };
//!
//! let store = StateStore::new();
//! let latent = Arc::new(LatentStateStore::new());
//! latent.set_embedding_model(Arc::new(SimpleEmbeddingModel::new()))?;
//! store.attach_observer(latent.clone())?;
//!
//! let created = store.create("task:1", Value::Int(0), None)?;
//! let updated = store.update("task:1", Value::Int(1), created.entry.version, None)?;
//! assert_eq!(updated.entry.version, 2);
//! ```
//!
//! This crate performs no I/O: persistence, transport, signing, and
//! governance decisions belong to its consumers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod state;
pub mod value;

// Constraint evaluation
pub mod constraint;

// Causal graph
pub mod graph;

// Latent layer: embeddings, predictions, hooks
pub mod embedding;
pub mod hook;
pub mod latent;
pub mod model;

// Re-export primary types at crate root for convenience
pub use constraint::{
    ConstraintCategory, ConstraintContext, ConstraintDescriptor, ConstraintEngine,
    ConstraintOutcome, ConstraintSeverity, ConstraintValidationResult, ConstraintViolation,
    HardConstraint, SoftConstraint, DEFAULT_SOFT_WEIGHT,
};
pub use error::{GraphError, ModelError, StoreError, WorldError, WorldResult};
pub use graph::{Action, ActionId, CausalLink, DoGraph, Effect, EffectId};
pub use hook::{HookFailure, HookPhase, PredictiveUpdateHook};
pub use latent::LatentStateStore;
pub use model::{
    CausalPredictionModel, EmbeddingId, EmbeddingModel, PredictionId, PredictionModel,
    SimpleEmbeddingModel, StateEmbedding, StatePrediction,
};
pub use state::{
    ConflictRecord, DiffKind, SnapshotId, StateDiff, StateEntry, StateSnapshot, StateStore,
    WriteOutcome,
};
pub use value::Value;
