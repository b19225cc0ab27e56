//! Causal action/effect graph.
//!
//! The `DoGraph` records what the platform *did* (actions), what changed as
//! a result (effects, carrying the observed state diffs), and directed
//! causal links between them. Every addition is stamped with a
//! caller-supplied provenance event id, so audit consumers can tie graph
//! growth back to their own event stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GraphError, WorldError, WorldResult};
use crate::state::StateDiff;
use crate::value::Value;

fn lock_err(context: &'static str) -> WorldError {
    WorldError::internal(format!("poisoned lock: {context}"))
}

/// Globally unique action identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Creates a new random action ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique effect identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(Uuid);

impl EffectId {
    /// Creates a new random effect ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recorded action: something the platform executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique id within the graph.
    pub id: ActionId,

    /// Logical action name (the unit prediction reasons over).
    pub name: String,

    /// The tool invocation that carried the action out.
    pub tool_call: String,

    /// Structured inputs passed to the tool.
    pub inputs: Value,

    /// When the action was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Action {
    /// Creates an action with a fresh id, stamped now.
    #[must_use]
    pub fn new(name: impl Into<String>, tool_call: impl Into<String>, inputs: Value) -> Self {
        Self {
            id: ActionId::new(),
            name: name.into(),
            tool_call: tool_call.into(),
            inputs,
            recorded_at: Utc::now(),
        }
    }
}

/// A recorded effect: an observed state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Unique id within the graph.
    pub id: EffectId,

    /// Human-readable description of what changed.
    pub description: String,

    /// The observed diffs this effect consists of.
    pub state_diff: Vec<StateDiff>,

    /// When the effect was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Effect {
    /// Creates an effect with a fresh id, stamped now.
    #[must_use]
    pub fn new(description: impl Into<String>, state_diff: Vec<StateDiff>) -> Self {
        Self {
            id: EffectId::new(),
            description: description.into(),
            state_diff,
            recorded_at: Utc::now(),
        }
    }
}

/// A directed causal edge from an action to an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalLink {
    /// Source action.
    pub action_id: ActionId,
    /// Caused effect.
    pub effect_id: EffectId,
    /// Provenance event that recorded the link.
    pub event_id: String,
    /// When the link was recorded.
    pub linked_at: DateTime<Utc>,
}

#[derive(Default)]
struct GraphState {
    actions: HashMap<ActionId, Action>,
    effects: HashMap<EffectId, Effect>,
    // Insertion-ordered so recency queries can break timestamp ties.
    action_order: Vec<ActionId>,
    links: Vec<CausalLink>,
    outgoing: HashMap<ActionId, Vec<EffectId>>,
    incoming: HashMap<EffectId, Vec<ActionId>>,
    provenance: HashMap<String, Vec<String>>,
}

impl GraphState {
    fn record_provenance(&mut self, node_id: &str, event_id: &str) {
        self.provenance
            .entry(node_id.to_string())
            .or_default()
            .push(event_id.to_string());
    }
}

/// Per-instance causal graph of actions, effects, and links.
#[derive(Default)]
pub struct DoGraph {
    state: RwLock<GraphState>,
}

impl DoGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action node. A duplicate id fails `AlreadyExists`.
    pub fn add_action(&self, action: Action, event_id: &str) -> WorldResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.add_action"))?;
        if state.actions.contains_key(&action.id) {
            return Err(GraphError::DuplicateNode {
                id: action.id.to_string(),
            }
            .into());
        }
        state.record_provenance(&action.id.to_string(), event_id);
        state.action_order.push(action.id);
        state.actions.insert(action.id, action);
        Ok(())
    }

    /// Registers an effect node. A duplicate id fails `AlreadyExists`.
    pub fn add_effect(&self, effect: Effect, event_id: &str) -> WorldResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.add_effect"))?;
        if state.effects.contains_key(&effect.id) {
            return Err(GraphError::DuplicateNode {
                id: effect.id.to_string(),
            }
            .into());
        }
        state.record_provenance(&effect.id.to_string(), event_id);
        state.effects.insert(effect.id, effect);
        Ok(())
    }

    /// Adds a directed causal edge. Unknown endpoints fail `NotFound`.
    ///
    /// Re-linking an identical pair is an idempotent no-op that still
    /// records the provenance event.
    pub fn link_action_to_effect(
        &self,
        action_id: ActionId,
        effect_id: EffectId,
        event_id: &str,
    ) -> WorldResult<()> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.link"))?;
        if !state.actions.contains_key(&action_id) {
            return Err(GraphError::NodeNotFound {
                id: action_id.to_string(),
            }
            .into());
        }
        if !state.effects.contains_key(&effect_id) {
            return Err(GraphError::NodeNotFound {
                id: effect_id.to_string(),
            }
            .into());
        }

        state.record_provenance(&action_id.to_string(), event_id);
        state.record_provenance(&effect_id.to_string(), event_id);

        let already = state
            .outgoing
            .get(&action_id)
            .is_some_and(|effects| effects.contains(&effect_id));
        if already {
            return Ok(());
        }

        state.links.push(CausalLink {
            action_id,
            effect_id,
            event_id: event_id.to_string(),
            linked_at: Utc::now(),
        });
        state.outgoing.entry(action_id).or_default().push(effect_id);
        state.incoming.entry(effect_id).or_default().push(action_id);
        Ok(())
    }

    /// Effects causally reachable from an action, in link order.
    pub fn effects_of(&self, action_id: ActionId) -> WorldResult<Vec<Effect>> {
        let state = self.state.read().map_err(|_| lock_err("graph.effects_of"))?;
        if !state.actions.contains_key(&action_id) {
            return Err(GraphError::NodeNotFound {
                id: action_id.to_string(),
            }
            .into());
        }
        Ok(state
            .outgoing
            .get(&action_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.effects.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Actions historically linked to an effect, in link order.
    pub fn actions_causing(&self, effect_id: EffectId) -> WorldResult<Vec<Action>> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("graph.actions_causing"))?;
        if !state.effects.contains_key(&effect_id) {
            return Err(GraphError::NodeNotFound {
                id: effect_id.to_string(),
            }
            .into());
        }
        Ok(state
            .incoming
            .get(&effect_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.actions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Up to `limit` most recently recorded actions, newest first.
    pub fn recent_actions(&self, limit: usize) -> WorldResult<Vec<Action>> {
        let state = self.state.read().map_err(|_| lock_err("graph.recent"))?;
        Ok(state
            .action_order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| state.actions.get(id).cloned())
            .collect())
    }

    /// Point lookup of an action.
    pub fn action(&self, id: ActionId) -> WorldResult<Option<Action>> {
        let state = self.state.read().map_err(|_| lock_err("graph.action"))?;
        Ok(state.actions.get(&id).cloned())
    }

    /// Point lookup of an effect.
    pub fn effect(&self, id: EffectId) -> WorldResult<Option<Effect>> {
        let state = self.state.read().map_err(|_| lock_err("graph.effect"))?;
        Ok(state.effects.get(&id).cloned())
    }

    /// Every recorded action, in insertion order.
    pub fn actions(&self) -> WorldResult<Vec<Action>> {
        let state = self.state.read().map_err(|_| lock_err("graph.actions"))?;
        Ok(state
            .action_order
            .iter()
            .filter_map(|id| state.actions.get(id).cloned())
            .collect())
    }

    /// Every recorded effect (unordered).
    pub fn effects(&self) -> WorldResult<Vec<Effect>> {
        let state = self.state.read().map_err(|_| lock_err("graph.effects"))?;
        Ok(state.effects.values().cloned().collect())
    }

    /// Number of distinct causal links.
    pub fn link_count(&self) -> WorldResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("graph.link_count"))?;
        Ok(state.links.len())
    }

    /// Provenance event ids recorded for a node (registration plus every
    /// link that touched it), or `None` for an unknown node.
    pub fn provenance(&self, node_id: &str) -> WorldResult<Option<Vec<String>>> {
        let state = self.state.read().map_err(|_| lock_err("graph.provenance"))?;
        Ok(state.provenance.get(node_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(name: &str) -> Action {
        Action::new(name, "tool.exec", Value::Null)
    }

    fn effect(desc: &str) -> Effect {
        Effect::new(desc, Vec::new())
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let graph = DoGraph::new();
        let a = action("deploy");
        graph.add_action(a.clone(), "evt-1").unwrap();
        let err = graph.add_action(a, "evt-2").unwrap_err();
        assert!(matches!(
            err,
            WorldError::Graph(GraphError::DuplicateNode { .. })
        ));

        let e = effect("service restarted");
        graph.add_effect(e.clone(), "evt-3").unwrap();
        assert!(graph.add_effect(e, "evt-4").is_err());
    }

    #[test]
    fn linking_unknown_endpoints_fails_not_found() {
        let graph = DoGraph::new();
        let a = action("deploy");
        let e = effect("restarted");
        graph.add_action(a.clone(), "evt-1").unwrap();

        let err = graph
            .link_action_to_effect(a.id, e.id, "evt-2")
            .unwrap_err();
        assert!(matches!(
            err,
            WorldError::Graph(GraphError::NodeNotFound { .. })
        ));

        let err = graph
            .link_action_to_effect(ActionId::new(), e.id, "evt-3")
            .unwrap_err();
        assert!(matches!(
            err,
            WorldError::Graph(GraphError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn traversal_follows_links_both_ways() {
        let graph = DoGraph::new();
        let a1 = action("deploy");
        let a2 = action("rollback");
        let e1 = effect("service up");
        graph.add_action(a1.clone(), "evt-1").unwrap();
        graph.add_action(a2.clone(), "evt-2").unwrap();
        graph.add_effect(e1.clone(), "evt-3").unwrap();
        graph.link_action_to_effect(a1.id, e1.id, "evt-4").unwrap();
        graph.link_action_to_effect(a2.id, e1.id, "evt-5").unwrap();

        let effects = graph.effects_of(a1.id).unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].id, e1.id);

        let causes = graph.actions_causing(e1.id).unwrap();
        assert_eq!(causes.len(), 2);
        assert_eq!(causes[0].id, a1.id);
        assert_eq!(causes[1].id, a2.id);

        assert!(graph.effects_of(a2.id).unwrap().len() == 1);
        assert_eq!(graph.link_count().unwrap(), 2);
    }

    #[test]
    fn duplicate_links_are_idempotent_but_keep_provenance() {
        let graph = DoGraph::new();
        let a = action("deploy");
        let e = effect("restarted");
        graph.add_action(a.clone(), "evt-1").unwrap();
        graph.add_effect(e.clone(), "evt-2").unwrap();
        graph.link_action_to_effect(a.id, e.id, "evt-3").unwrap();
        graph.link_action_to_effect(a.id, e.id, "evt-4").unwrap();

        assert_eq!(graph.link_count().unwrap(), 1);
        assert_eq!(graph.effects_of(a.id).unwrap().len(), 1);

        let prov = graph.provenance(&a.id.to_string()).unwrap().unwrap();
        assert_eq!(prov, vec!["evt-1", "evt-3", "evt-4"]);
    }

    #[test]
    fn recent_actions_are_newest_first() {
        let graph = DoGraph::new();
        let a1 = action("first");
        let a2 = action("second");
        let a3 = action("third");
        graph.add_action(a1.clone(), "e1").unwrap();
        graph.add_action(a2.clone(), "e2").unwrap();
        graph.add_action(a3.clone(), "e3").unwrap();

        let recent = graph.recent_actions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, a3.id);
        assert_eq!(recent[1].id, a2.id);

        assert_eq!(graph.actions().unwrap().len(), 3);
        assert!(graph.provenance("unknown").unwrap().is_none());
    }
}
