//! Constraint types.
//!
//! Hard constraints encode non-negotiable boundaries as boolean predicates;
//! soft constraints encode tunable preferences as weighted scores in [0, 1].
//! Both evaluate against a state/action/params triple and both feed the
//! audit trail in [`ConstraintValidationResult::details`].

mod engine;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::state::StateSnapshot;
use crate::value::Value;

pub use engine::ConstraintEngine;

/// Default weight applied to soft constraints when none is given.
pub const DEFAULT_SOFT_WEIGHT: f64 = 1.0;

/// What a constraint governs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConstraintCategory {
    /// Organizational or regulatory policy.
    Policy,
    /// Monetary or resource cost.
    Cost,
    /// Operational or safety risk.
    Risk,
    /// Latency or deadline pressure.
    Time,
    /// Data residency / placement boundaries.
    DataZone,
    /// A custom category.
    Custom(String),
}

impl TryFrom<String> for ConstraintCategory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.is_empty() {
            return Err("constraint category cannot be empty".to_string());
        }

        let bytes = value.as_bytes();
        if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"custom:") {
            let rest = value[7..].trim();
            if rest.is_empty() {
                return Err("custom constraint category cannot be empty".to_string());
            }
            return Ok(Self::Custom(rest.to_string()));
        }

        Ok(if value.eq_ignore_ascii_case("policy") {
            Self::Policy
        } else if value.eq_ignore_ascii_case("cost") {
            Self::Cost
        } else if value.eq_ignore_ascii_case("risk") {
            Self::Risk
        } else if value.eq_ignore_ascii_case("time") {
            Self::Time
        } else if value.eq_ignore_ascii_case("data_zone") {
            Self::DataZone
        } else {
            return Err(format!(
                "unknown constraint category: {value}. Use a built-in category (policy, cost, risk, time, data_zone) or prefix custom categories with custom:<name>"
            ));
        })
    }
}

impl From<ConstraintCategory> for String {
    fn from(value: ConstraintCategory) -> Self {
        match value {
            ConstraintCategory::Policy => "policy".to_string(),
            ConstraintCategory::Cost => "cost".to_string(),
            ConstraintCategory::Risk => "risk".to_string(),
            ConstraintCategory::Time => "time".to_string(),
            ConstraintCategory::DataZone => "data_zone".to_string(),
            ConstraintCategory::Custom(name) => format!("custom:{name}"),
        }
    }
}

impl fmt::Display for ConstraintCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from(self.clone()))
    }
}

/// Whether a constraint is a boolean boundary or a weighted preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintSeverity {
    /// Binary predicate; a single failure blocks the action.
    Hard,
    /// Weighted preference; low scores lower the combined score but only a
    /// `min_score` floor turns one into a violation.
    Soft,
}

impl fmt::Display for ConstraintSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard => write!(f, "hard"),
            Self::Soft => write!(f, "soft"),
        }
    }
}

/// The state/action/params triple every constraint evaluates against.
#[derive(Clone, Copy)]
pub struct ConstraintContext<'a> {
    /// Current world state.
    pub state: &'a StateSnapshot,

    /// The candidate action under evaluation, if any.
    pub action: Option<&'a str>,

    /// Structured parameters of the candidate action, if any.
    pub params: Option<&'a Value>,
}

impl<'a> ConstraintContext<'a> {
    /// Context with only a state.
    #[must_use]
    pub const fn state_only(state: &'a StateSnapshot) -> Self {
        Self {
            state,
            action: None,
            params: None,
        }
    }

    /// Context for a candidate action with parameters.
    #[must_use]
    pub const fn for_action(
        state: &'a StateSnapshot,
        action: &'a str,
        params: Option<&'a Value>,
    ) -> Self {
        Self {
            state,
            action: Some(action),
            params,
        }
    }
}

/// Boolean predicate evaluated by hard constraints.
pub type HardPredicate = Arc<dyn Fn(&ConstraintContext<'_>) -> bool + Send + Sync>;

/// Scoring function evaluated by soft constraints. Scores are clamped to
/// [0, 1] by the engine; non-finite scores are treated as 0.
pub type SoftScorer = Arc<dyn Fn(&ConstraintContext<'_>) -> f64 + Send + Sync>;

/// A non-negotiable boolean rule.
#[derive(Clone)]
pub struct HardConstraint {
    /// Unique id across hard and soft constraints.
    pub id: String,

    /// Human-readable description.
    pub description: String,

    /// What the constraint governs.
    pub category: ConstraintCategory,

    /// The predicate; `false` means violated.
    pub predicate: HardPredicate,

    /// Message reported on violation instead of the description.
    pub violation_message: Option<String>,
}

impl HardConstraint {
    /// Creates a hard constraint.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        category: ConstraintCategory,
        predicate: impl Fn(&ConstraintContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            category,
            predicate: Arc::new(predicate),
            violation_message: None,
        }
    }

    /// Sets the violation message.
    #[must_use]
    pub fn with_violation_message(mut self, message: impl Into<String>) -> Self {
        self.violation_message = Some(message.into());
        self
    }
}

impl fmt::Debug for HardConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardConstraint")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// A weighted, tunable preference.
#[derive(Clone)]
pub struct SoftConstraint {
    /// Unique id across hard and soft constraints.
    pub id: String,

    /// Human-readable description.
    pub description: String,

    /// What the constraint governs.
    pub category: ConstraintCategory,

    /// The scoring function, expected in [0, 1].
    pub score: SoftScorer,

    /// Relative weight in the combined score.
    pub weight: f64,

    /// Optional hard floor: scoring below it forces the validation
    /// unsatisfied even though the constraint is soft.
    pub min_score: Option<f64>,
}

impl SoftConstraint {
    /// Creates a soft constraint with the default weight.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        category: ConstraintCategory,
        score: impl Fn(&ConstraintContext<'_>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            category,
            score: Arc::new(score),
            weight: DEFAULT_SOFT_WEIGHT,
            min_score: None,
        }
    }

    /// Sets the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the minimum acceptable score.
    #[must_use]
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

impl fmt::Debug for SoftConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftConstraint")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("weight", &self.weight)
            .field("min_score", &self.min_score)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a registered constraint (closures are not exposed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Unique id across both tiers.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Category the constraint was registered under.
    pub category: ConstraintCategory,
    /// Hard or soft tier.
    pub severity: ConstraintSeverity,
    /// Present for soft constraints only.
    pub weight: Option<f64>,
    /// Present for soft constraints with a floor.
    pub min_score: Option<f64>,
}

/// One violated constraint within a validation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    /// Id of the violated constraint.
    pub constraint_id: String,
    /// Tier the violation came from.
    pub severity: ConstraintSeverity,
    /// Category of the violated constraint.
    pub category: ConstraintCategory,
    /// Violation message, or the constraint description when none was set.
    pub message: String,
}

/// Per-constraint outcome recorded for explainability/audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintOutcome {
    /// Id of the evaluated constraint.
    pub constraint_id: String,
    /// Tier the constraint belongs to.
    pub severity: ConstraintSeverity,
    /// Category the constraint was registered under.
    pub category: ConstraintCategory,
    /// Hard: predicate result. Soft: whether the min_score floor (if any)
    /// was met.
    pub passed: bool,
    /// Clamped score for soft constraints; absent for hard ones.
    pub score: Option<f64>,
    /// Weight for soft constraints; absent for hard ones.
    pub weight: Option<f64>,
}

/// Full result of evaluating every registered constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintValidationResult {
    /// False if any hard predicate failed or any soft floor was undershot.
    pub satisfied: bool,

    /// Violations in evaluation order, hard before soft.
    pub violations: Vec<ConstraintViolation>,

    /// Weighted soft score: sum(w*s)/sum(w); 1.0 with no soft constraints.
    pub score: f64,

    /// Every constraint's individual outcome, in evaluation order.
    pub details: Vec<ConstraintOutcome>,
}
