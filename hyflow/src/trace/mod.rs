//! Symbolic operational traces.
//!
//! A [`Trace`] is the sealed record of one explored path: its path condition, the ordered
//! `(policy snapshot, observation)` entries and the way the path ended. Traces are shared
//! read-only through `Arc` once sealed; the in-progress side lives in [`builder`] and
//! [`recorder`].
use std::{fmt, sync::Arc};

use hyterm::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumTryAs};

use crate::{
    point::{AgentId, PathId, ProgramPoint},
    policy::{PolicySnapshot, PolicyStore},
};

pub mod builder;
pub mod recorder;

/// How an explored path ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    /// The path returned normally.
    Normal,
    /// The path ended with an uncaught exception of the given kind.
    Excepted(String),
    /// Exploration stopped at the depth bound; the path may continue past this point.
    BoundReached,
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceStatus::Normal => write!(f, "normal"),
            TraceStatus::Excepted(kind) => write!(f, "excepted({kind})"),
            TraceStatus::BoundReached => write!(f, "bound reached"),
        }
    }
}

/// A value emitted to an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub agent: AgentId,
    pub value: Term,
    pub point: ProgramPoint,
    /// Path condition at the time of emission.
    pub path_condition: Term,
}

/// One step of a trace: the policy in force and what was observed under it.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub policy: Arc<PolicySnapshot>,
    pub observation: Observation,
}

/// A sealed symbolic operational trace.
#[derive(Debug, Clone)]
pub struct Trace {
    pub path: PathId,
    /// Ingest sequence number of the path's first event.
    pub sequence: u64,
    /// Branch conditions in the order they were taken.
    pub conditions: Vec<(ProgramPoint, Term)>,
    /// Conjunction of `conditions`.
    pub path_condition: Term,
    pub entries: Vec<TraceEntry>,
    pub status: TraceStatus,
    pub policy: PolicyStore,
}

impl Trace {
    /// Entries observed by `agent`, in emission order.
    pub fn observations_by<'a>(
        &'a self,
        agent: &'a AgentId,
    ) -> impl Iterator<Item = &'a TraceEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| &entry.observation.agent == agent)
    }

    pub fn observes(&self, agent: &AgentId) -> bool {
        self.observations_by(agent).next().is_some()
    }

    /// Agents with at least one observation in this trace.
    pub fn observers(&self) -> impl Iterator<Item = &AgentId> {
        self.entries.iter().map(|entry| &entry.observation.agent)
    }

    /// Input variables mentioned by the path condition or any observed value.
    pub fn variables(&self) -> std::collections::BTreeSet<Variable> {
        let mut out = self.path_condition.variables();
        for entry in &self.entries {
            out.extend(entry.observation.value.variables());
        }
        out
    }
}
