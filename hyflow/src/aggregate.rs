//! Per-agent verdicts.
//!
//! The aggregator is written only by the session thread. Workers complete pairs in any
//! order; the verdict of an agent depends only on the set of pair outcomes:
//!
//! - `Insecure` if any pair is insecure, reporting the pair with the lowest sequence number;
//! - otherwise `Unknown` if any pair is unknown, with the reason of the lowest such pair;
//! - otherwise `Unknown(Incomplete)` if the trace set itself is incomplete;
//! - otherwise `Secure`, including for an agent without any candidate pair.
use std::{collections::BTreeMap, fmt};

use hyterm::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumTryAs};

use crate::{
    obligation::Obligation,
    point::{AgentId, PathId, ProgramPoint},
};

/// Why no definite verdict could be given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnknownReason {
    /// A time or step budget ran out.
    Timeout,
    /// A backend failed.
    SolverError(String),
    /// The input could not be fully decided (unbounded domains, unexplored paths, ...).
    Incomplete(String),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::Timeout => write!(f, "timeout"),
            UnknownReason::SolverError(msg) => write!(f, "solver error: {msg}"),
            UnknownReason::Incomplete(msg) => write!(f, "incomplete: {msg}"),
        }
    }
}

/// The first observation at which the agent tells the two runs apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferingObservation {
    pub point: ProgramPoint,
    pub occurrence: usize,
    /// Symbolic value in each trace; `None` when the trace has no observation there.
    pub left: Option<String>,
    pub right: Option<String>,
    /// Concrete values under the witness, when one is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
    pub sequence: u64,
    pub left_path: PathId,
    pub right_path: PathId,
    pub left_condition: String,
    pub right_condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub differing: Option<DifferingObservation>,
    /// Inputs of both runs, keyed by `name#1` / `name#2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<BTreeMap<String, Value>>,
}

impl Counterexample {
    pub fn from_obligation(obligation: &Obligation, witness: Option<&Assignment>) -> Self {
        let eval = |term: &Option<Term>, side: Side| -> Option<Value> {
            let witness = witness?;
            term.as_ref()?.on_side(side).evaluate(witness).ok()
        };
        let differing = obligation
            .first_difference(witness)
            .map(|position| DifferingObservation {
                point: position.point.clone(),
                occurrence: position.occurrence,
                left: position.left.as_ref().map(|t| t.pretty_string()),
                right: position.right.as_ref().map(|t| t.pretty_string()),
                left_value: eval(&position.left, Side::Left),
                right_value: eval(&position.right, Side::Right),
            });

        Self {
            sequence: obligation.sequence,
            left_path: obligation.left.path.clone(),
            right_path: obligation.right.path.clone(),
            left_condition: obligation.left.path_condition.pretty_string(),
            right_condition: obligation.right.path_condition.pretty_string(),
            differing,
            witness: witness.map(|w| {
                w.iter()
                    .map(|(var, value)| (var.to_string(), value.clone()))
                    .collect()
            }),
        }
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pair #{}: '{}' vs '{}'",
            self.sequence, self.left_path, self.right_path
        )?;
        writeln!(f, "  left  path condition: {}", self.left_condition)?;
        writeln!(f, "  right path condition: {}", self.right_condition)?;
        if let Some(d) = &self.differing {
            let show = |term: &Option<String>, value: &Option<Value>| match (term, value) {
                (None, _) => "<no observation>".to_string(),
                (Some(t), Some(v)) => format!("{t} = {v}"),
                (Some(t), None) => t.clone(),
            };
            writeln!(
                f,
                "  differs at {} (#{}): {} vs {}",
                d.point,
                d.occurrence,
                show(&d.left, &d.left_value),
                show(&d.right, &d.right_value)
            )?;
        }
        if let Some(witness) = &self.witness {
            let items: Vec<String> = witness.iter().map(|(k, v)| format!("{k} = {v}")).collect();
            writeln!(f, "  witness: {}", items.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIs, EnumTryAs, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    Secure,
    Insecure(Box<Counterexample>),
    Unknown(UnknownReason),
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Secure => write!(f, "secure"),
            Verdict::Insecure(cex) => write!(f, "insecure (pair #{})", cex.sequence),
            Verdict::Unknown(reason) => write!(f, "unknown ({reason})"),
        }
    }
}

/// Verdict of one agent with the pair counts behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub verdict: Verdict,
    pub pairs: u64,
    pub secure_pairs: u64,
    pub insecure_pairs: u64,
    pub unknown_pairs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    outcomes: BTreeMap<AgentId, BTreeMap<u64, Verdict>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `agent` part of the result even if no pair is ever recorded for it.
    pub fn register(&mut self, agent: &AgentId) {
        self.outcomes.entry(agent.clone()).or_default();
    }

    pub fn record(&mut self, agent: &AgentId, sequence: u64, verdict: Verdict) {
        self.outcomes
            .entry(agent.clone())
            .or_default()
            .insert(sequence, verdict);
    }

    /// Verdict of one agent. `incompleteness` describes missing or cut traces, if any.
    pub fn verdict_for(&self, agent: &AgentId, incompleteness: Option<&str>) -> Verdict {
        let Some(pairs) = self.outcomes.get(agent) else {
            return Self::vacuous(incompleteness);
        };
        if let Some(insecure) = pairs.values().find(|v| v.is_insecure()) {
            return insecure.clone();
        }
        if let Some(unknown) = pairs.values().find(|v| v.is_unknown()) {
            return unknown.clone();
        }
        Self::vacuous(incompleteness)
    }

    fn vacuous(incompleteness: Option<&str>) -> Verdict {
        match incompleteness {
            Some(reason) => Verdict::Unknown(UnknownReason::Incomplete(reason.to_string())),
            None => Verdict::Secure,
        }
    }

    pub fn finish(self, incompleteness: Option<&str>) -> BTreeMap<AgentId, AgentSummary> {
        self.outcomes
            .keys()
            .map(|agent| {
                let pairs = &self.outcomes[agent];
                let count =
                    |pred: fn(&Verdict) -> bool| pairs.values().filter(|v| pred(v)).count() as u64;
                let summary = AgentSummary {
                    verdict: self.verdict_for(agent, incompleteness),
                    pairs: pairs.len() as u64,
                    secure_pairs: count(Verdict::is_secure),
                    insecure_pairs: count(Verdict::is_insecure),
                    unknown_pairs: count(Verdict::is_unknown),
                };
                (agent.clone(), summary)
            })
            .collect()
    }
}
