//! Error types for veristate.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific failure kinds — in particular optimistic-concurrency
//! conflicts, which callers are expected to catch and retry.

use thiserror::Error;

/// Errors raised by the versioned state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A create hit a key that is already live.
    #[error("Key already exists: {key}")]
    AlreadyExists {
        /// The key that already holds a live entry.
        key: String,
    },

    /// A mutation targeted a key with no live entry.
    ///
    /// Note that `read`/`read_version` misses are `None`, not this error;
    /// only mutations against an unknown key fail.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key with no live entry.
        key: String,
    },

    /// Optimistic concurrency failure: the caller's expected version did not
    /// match the store's current version. The write was rejected atomically.
    #[error("Version conflict on '{key}': expected {expected}, actual {actual}")]
    Conflict {
        /// The contended key.
        key: String,
        /// The version the caller based its write on.
        expected: u64,
        /// The version the store actually held.
        actual: u64,
    },
}

/// Errors raised by the causal action/effect graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An action or effect was registered twice under the same id.
    #[error("Graph node already exists: {id}")]
    DuplicateNode {
        /// Rendered id of the duplicated node.
        id: String,
    },

    /// A link or traversal referenced an unknown node id.
    #[error("Graph node not found: {id}")]
    NodeNotFound {
        /// Rendered id of the missing node.
        id: String,
    },
}

/// Errors raised by the embedding/prediction model layer.
#[derive(Debug, Error)]
pub enum ModelError {
    /// An operation needed a model strategy that was never injected.
    #[error("No {role} model configured")]
    NoModelConfigured {
        /// Which model slot was empty, `"embedding"` or `"prediction"`.
        role: &'static str,
    },

    /// Two vectors with different dimensions were compared.
    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Dimension the operation expected.
        expected: usize,
        /// Dimension the offending vector actually had.
        actual: usize,
    },
}

/// Top-level error type for veristate.
///
/// This enum encompasses all possible errors that can occur when using the
/// world-model substrate.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Error from the versioned state store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the causal graph.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Error from the embedding/prediction model layer.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Unexpected internal failure, such as a poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        /// Rendered description of what went wrong.
        message: String,
    },
}

impl WorldError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if this is a graph error.
    #[must_use]
    pub const fn is_graph(&self) -> bool {
        matches!(self, Self::Graph(_))
    }

    /// Returns true if this is a model error.
    #[must_use]
    pub const fn is_model(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// Returns true if this error is recoverable by re-read-and-retry.
    ///
    /// Only version conflicts qualify: the caller re-reads the current entry
    /// and decides whether to retry, merge, or abort. Nothing is ever
    /// retried internally.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_conflict()
    }
}

/// Result type alias for veristate operations.
pub type WorldResult<T> = Result<T, WorldError>;
