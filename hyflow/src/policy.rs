//! Per-trace declassification policy.
//!
//! Role
//! - A [`PolicyStore`] records, for one explored path, which input variables each agent may see
//!   from which program point onward.
//! - A [`PolicySnapshot`] is the accumulated visibility at one point; it only depends on the
//!   prefix of the trace up to that point.
//!
//! Copy-on-branch
//! - Declassifications are kept as an `Arc`-linked list of layers, newest first. Cloning a
//!   store shares every layer, and a clone that declassifies further only pushes a new head,
//!   so sibling paths can never observe each other's declassifications.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    point::{AgentId, PathId, ProgramPoint},
    utils::error::{FlowError, FlowResult},
};

/// Visible variables per agent at one program point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicySnapshot {
    visible: BTreeMap<AgentId, BTreeSet<Arc<str>>>,
}

impl PolicySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `agent` visibility of `variables`.
    pub fn grant<I, S>(&mut self, agent: &AgentId, variables: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.visible.entry(agent.clone()).or_default();
        entry.extend(variables.into_iter().map(|v| Arc::from(v.as_ref())));
    }

    /// Variables visible to `agent`, in name order.
    pub fn visible_to<'a>(&'a self, agent: &AgentId) -> impl Iterator<Item = &'a str> + 'a {
        self.visible
            .get(agent)
            .into_iter()
            .flat_map(|set| set.iter().map(|v| v.as_ref()))
    }

    pub fn is_visible(&self, agent: &AgentId, variable: &str) -> bool {
        self.visible
            .get(agent)
            .is_some_and(|set| set.contains(variable))
    }

    /// Agents with at least one visible variable.
    pub fn agents(&self) -> impl Iterator<Item = &AgentId> {
        self.visible
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(agent, _)| agent)
    }
}

#[derive(Debug)]
struct Layer {
    point: ProgramPoint,
    agent: AgentId,
    variables: BTreeSet<Arc<str>>,
    parent: Option<Arc<Layer>>,
}

/// A single declassification event, as recorded in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declassification {
    pub point: ProgramPoint,
    pub agent: AgentId,
    pub variables: BTreeSet<Arc<str>>,
}

/// Persistent, trace-local declassification history.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    initial: Arc<PolicySnapshot>,
    head: Option<Arc<Layer>>,
    current: Arc<PolicySnapshot>,
}

impl PolicyStore {
    /// Empty store: no agent sees anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose visibility before any declassification is `initial`.
    pub fn seeded(initial: PolicySnapshot) -> Self {
        let initial = Arc::new(initial);
        Self {
            current: initial.clone(),
            initial,
            head: None,
        }
    }

    /// From `point` onward in this trace, `variables` are visible to `agent`.
    ///
    /// Declassifications must arrive in program order; `path` only labels the error.
    pub fn declassify<I, S>(
        &mut self,
        path: &PathId,
        point: ProgramPoint,
        agent: &AgentId,
        variables: I,
    ) -> FlowResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some(head) = &self.head {
            if point < head.point {
                return Err(FlowError::OutOfOrder {
                    path: path.clone(),
                    previous: head.point.clone(),
                    point,
                });
            }
        }

        let variables: BTreeSet<Arc<str>> = variables
            .into_iter()
            .map(|v| Arc::from(v.as_ref()))
            .collect();
        Arc::make_mut(&mut self.current).grant(agent, variables.iter());
        self.head = Some(Arc::new(Layer {
            point,
            agent: agent.clone(),
            variables,
            parent: self.head.take(),
        }));
        Ok(())
    }

    /// Visibility after every declassification recorded so far.
    ///
    /// The returned handle is shared with the store until the next declassification.
    pub fn current(&self) -> Arc<PolicySnapshot> {
        self.current.clone()
    }

    /// Visibility before any declassification of this trace.
    pub fn initial(&self) -> &PolicySnapshot {
        &self.initial
    }

    /// Accumulated visibility for all agents at `point` (declassifications at `point` included).
    pub fn snapshot_at(&self, point: &ProgramPoint) -> PolicySnapshot {
        let mut snapshot = (*self.initial).clone();
        for layer in self.layers() {
            if &layer.point <= point {
                snapshot.grant(&layer.agent, layer.variables.iter());
            }
        }
        snapshot
    }

    /// The store as it was strictly before `point`. Shares the retained layers.
    pub fn truncated_before(&self, point: &ProgramPoint) -> PolicyStore {
        let mut head = self.head.clone();
        while let Some(layer) = head.as_ref().filter(|layer| &layer.point >= point) {
            head = layer.parent.clone();
        }

        let mut current = (*self.initial).clone();
        let mut cursor = head.as_deref();
        while let Some(layer) = cursor {
            current.grant(&layer.agent, layer.variables.iter());
            cursor = layer.parent.as_deref();
        }

        PolicyStore {
            initial: self.initial.clone(),
            head,
            current: Arc::new(current),
        }
    }

    /// Recorded declassifications, oldest first.
    pub fn history(&self) -> Vec<Declassification> {
        let mut out: Vec<Declassification> = self
            .layers()
            .map(|layer| Declassification {
                point: layer.point.clone(),
                agent: layer.agent.clone(),
                variables: layer.variables.clone(),
            })
            .collect();
        out.reverse();
        out
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::successors(self.head.as_deref(), |layer| layer.parent.as_deref())
    }
}
