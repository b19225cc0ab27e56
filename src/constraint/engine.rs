//! Constraint evaluation engine.
//!
//! One engine answers both questions the policy layer asks: "is this legal"
//! (hard predicates) and "is this a good idea" (weighted soft scores). Hard
//! violations always force an unsatisfied result regardless of how well the
//! soft side scores; a soft constraint with a `min_score` floor layers a
//! hard cutoff on the soft mechanism.

use std::sync::RwLock;

use crate::error::{StoreError, WorldError, WorldResult};
use crate::state::StateSnapshot;
use crate::value::Value;

use super::{
    ConstraintCategory, ConstraintContext, ConstraintDescriptor, ConstraintOutcome,
    ConstraintSeverity, ConstraintValidationResult, ConstraintViolation, HardConstraint,
    SoftConstraint,
};

fn lock_err(context: &'static str) -> WorldError {
    WorldError::internal(format!("poisoned lock: {context}"))
}

fn clamp_score(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Default)]
struct Registry {
    hard: Vec<HardConstraint>,
    soft: Vec<SoftConstraint>,
}

impl Registry {
    fn has_id(&self, id: &str) -> bool {
        self.hard.iter().any(|c| c.id == id) || self.soft.iter().any(|c| c.id == id)
    }
}

/// Registry and evaluator for hard and soft constraints.
///
/// Per-instance: independent engines never share constraints.
#[derive(Default)]
pub struct ConstraintEngine {
    registry: RwLock<Registry>,
}

impl ConstraintEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hard constraint.
    ///
    /// Ids share one namespace across severities; a duplicate fails
    /// `AlreadyExists` so audit trails never see two constraints per id.
    pub fn add_hard_constraint(&self, constraint: HardConstraint) -> WorldResult<()> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| lock_err("engine.add_hard"))?;
        if registry.has_id(&constraint.id) {
            return Err(StoreError::AlreadyExists {
                key: constraint.id,
            }
            .into());
        }
        registry.hard.push(constraint);
        Ok(())
    }

    /// Registers a soft constraint. Same id rules as
    /// [`add_hard_constraint`](Self::add_hard_constraint).
    pub fn add_soft_constraint(&self, constraint: SoftConstraint) -> WorldResult<()> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| lock_err("engine.add_soft"))?;
        if registry.has_id(&constraint.id) {
            return Err(StoreError::AlreadyExists {
                key: constraint.id,
            }
            .into());
        }
        registry.soft.push(constraint);
        Ok(())
    }

    /// Removes a constraint by id. Returns whether anything was removed.
    pub fn remove_constraint(&self, id: &str) -> WorldResult<bool> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| lock_err("engine.remove"))?;
        let before = registry.hard.len() + registry.soft.len();
        registry.hard.retain(|c| c.id != id);
        registry.soft.retain(|c| c.id != id);
        Ok(registry.hard.len() + registry.soft.len() != before)
    }

    /// Drops every registered constraint.
    pub fn clear(&self) -> WorldResult<()> {
        let mut registry = self.registry.write().map_err(|_| lock_err("engine.clear"))?;
        registry.hard.clear();
        registry.soft.clear();
        Ok(())
    }

    /// Descriptors of every constraint in a category, hard before soft.
    pub fn constraints_by_category(
        &self,
        category: &ConstraintCategory,
    ) -> WorldResult<Vec<ConstraintDescriptor>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| lock_err("engine.by_category"))?;
        Ok(describe(&registry)
            .filter(|d| &d.category == category)
            .collect())
    }

    /// Descriptors of every constraint of a severity, in insertion order.
    pub fn constraints_by_severity(
        &self,
        severity: ConstraintSeverity,
    ) -> WorldResult<Vec<ConstraintDescriptor>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| lock_err("engine.by_severity"))?;
        Ok(describe(&registry)
            .filter(|d| d.severity == severity)
            .collect())
    }

    /// Descriptors of every registered constraint, hard before soft.
    pub fn all_constraints(&self) -> WorldResult<Vec<ConstraintDescriptor>> {
        let registry = self.registry.read().map_err(|_| lock_err("engine.all"))?;
        Ok(describe(&registry).collect())
    }

    /// Evaluates every constraint against a state/action/params triple.
    ///
    /// 1. Every hard predicate; any `false` appends a hard violation and
    ///    forces `satisfied = false` regardless of soft scores.
    /// 2. Every soft score; combined score = sum(w*s)/sum(w) over soft
    ///    constraints only, 1.0 when there are none.
    /// 3. Any soft constraint scoring below its `min_score` appends a soft
    ///    violation and also forces `satisfied = false`.
    /// 4. `details` records every constraint's individual outcome.
    pub fn validate(
        &self,
        state: &StateSnapshot,
        action: Option<&str>,
        params: Option<&Value>,
    ) -> WorldResult<ConstraintValidationResult> {
        let registry = self
            .registry
            .read()
            .map_err(|_| lock_err("engine.validate"))?;
        let ctx = ConstraintContext {
            state,
            action,
            params,
        };

        let mut satisfied = true;
        let mut violations = Vec::new();
        let mut details = Vec::new();

        for c in &registry.hard {
            let passed = (c.predicate)(&ctx);
            if !passed {
                satisfied = false;
                violations.push(ConstraintViolation {
                    constraint_id: c.id.clone(),
                    severity: ConstraintSeverity::Hard,
                    category: c.category.clone(),
                    message: c
                        .violation_message
                        .clone()
                        .unwrap_or_else(|| c.description.clone()),
                });
            }
            details.push(ConstraintOutcome {
                constraint_id: c.id.clone(),
                severity: ConstraintSeverity::Hard,
                category: c.category.clone(),
                passed,
                score: None,
                weight: None,
            });
        }

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for c in &registry.soft {
            let score = clamp_score((c.score)(&ctx));
            weighted_sum += c.weight * score;
            weight_sum += c.weight;

            let floor_met = c.min_score.map_or(true, |floor| score >= floor);
            if !floor_met {
                satisfied = false;
                violations.push(ConstraintViolation {
                    constraint_id: c.id.clone(),
                    severity: ConstraintSeverity::Soft,
                    category: c.category.clone(),
                    message: format!(
                        "{}: score {score:.3} below minimum {:.3}",
                        c.description,
                        c.min_score.unwrap_or(0.0)
                    ),
                });
            }
            details.push(ConstraintOutcome {
                constraint_id: c.id.clone(),
                severity: ConstraintSeverity::Soft,
                category: c.category.clone(),
                passed: floor_met,
                score: Some(score),
                weight: Some(c.weight),
            });
        }

        let score = if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            1.0
        };

        Ok(ConstraintValidationResult {
            satisfied,
            violations,
            score,
            details,
        })
    }

    /// Cheap pre-check: true iff every hard predicate passes. Soft
    /// constraints are ignored entirely.
    pub fn is_action_allowed(
        &self,
        state: &StateSnapshot,
        action: &str,
        params: Option<&Value>,
    ) -> WorldResult<bool> {
        let registry = self
            .registry
            .read()
            .map_err(|_| lock_err("engine.is_allowed"))?;
        let ctx = ConstraintContext {
            state,
            action: Some(action),
            params,
        };
        Ok(registry.hard.iter().all(|c| (c.predicate)(&ctx)))
    }

    /// Weighted soft average for ranking candidate actions, independent of
    /// hard evaluation. 1.0 with no soft constraints.
    pub fn get_action_score(
        &self,
        state: &StateSnapshot,
        action: &str,
        params: Option<&Value>,
    ) -> WorldResult<f64> {
        let registry = self.registry.read().map_err(|_| lock_err("engine.score"))?;
        let ctx = ConstraintContext {
            state,
            action: Some(action),
            params,
        };

        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for c in &registry.soft {
            weighted_sum += c.weight * clamp_score((c.score)(&ctx));
            weight_sum += c.weight;
        }
        Ok(if weight_sum > 0.0 {
            weighted_sum / weight_sum
        } else {
            1.0
        })
    }
}

fn describe(registry: &Registry) -> impl Iterator<Item = ConstraintDescriptor> + '_ {
    let hard = registry.hard.iter().map(|c| ConstraintDescriptor {
        id: c.id.clone(),
        description: c.description.clone(),
        category: c.category.clone(),
        severity: ConstraintSeverity::Hard,
        weight: None,
        min_score: None,
    });
    let soft = registry.soft.iter().map(|c| ConstraintDescriptor {
        id: c.id.clone(),
        description: c.description.clone(),
        category: c.category.clone(),
        severity: ConstraintSeverity::Soft,
        weight: Some(c.weight),
        min_score: c.min_score,
    });
    hard.chain(soft)
}
