//! Indistinguishability obligations.
//!
//! For a candidate pair `(T1, T2)` and agent `A` the obligation is
//!
//! ```text
//! PC1@L ∧ PC2@R ∧ D ∧ OR_i ( L(p_i) ∧ obs_A(T1, i)@L != obs_A(T2, i)@R )
//! ```
//!
//! where `i` ranges over the aligned observation positions, `L(p)` equates the left and right
//! copies of every input visible to `A` at `p` in both traces (under the policy recorded with
//! each observation, so a later declassification at the same point does not cover it), and `D`
//! restricts both copies of every mentioned input to its declared domain. A model of the
//! obligation is a pair of runs that agree on everything `A` may know and still show `A`
//! different values: a leak.
//!
//! Alignment
//! - Observations of `A` are keyed by `(point, occurrence)`, where the occurrence counts
//!   earlier observations of `A` at the same point in the same trace.
//! - Values are compared with exact equality; values of different sorts always differ.
//! - A position observed in one trace only is distinguishing under
//!   [`AbsencePolicy::Distinguishing`] and dropped under [`AbsencePolicy::Ignored`].
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use hyterm::{prelude::*, smtlib};
use log::debug;
use serde::{Deserialize, Serialize};
use strum::EnumIs;

use crate::{
    domain::InputDomains,
    index::Candidate,
    point::{AgentId, ProgramPoint},
    policy::PolicySnapshot,
    trace::{Trace, TraceEntry},
};

/// How an observation made in only one of the two traces is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIs, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsencePolicy {
    /// The agent notices that an output is missing.
    #[default]
    Distinguishing,
    /// Only positions present in both traces are compared.
    Ignored,
}

/// One observation position of the agent, with what each trace shows there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedPosition {
    pub point: ProgramPoint,
    pub occurrence: usize,
    /// Observed value in the left trace, over `Base` variables.
    pub left: Option<Term>,
    pub right: Option<Term>,
    /// Inputs the agent may see at `point` in both traces (`Base` variables).
    pub low: Vec<Variable>,
    /// Relational condition under which the two observations differ.
    pub differs: Term,
}

impl AlignedPosition {
    /// `L(p) ∧ differs`.
    pub fn condition(&self) -> Term {
        Term::and_all(
            self.low
                .iter()
                .map(|v| {
                    Term::var(v.on_side(Side::Left)).equals(Term::var(v.on_side(Side::Right)))
                })
                .chain(std::iter::once(self.differs.clone())),
        )
    }

    pub fn is_asymmetric(&self) -> bool {
        self.left.is_none() || self.right.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Obligation {
    pub sequence: u64,
    pub agent: AgentId,
    pub left: Arc<Trace>,
    pub right: Arc<Trace>,
    pub positions: Vec<AlignedPosition>,
    /// Domain constraints of both copies of every mentioned input.
    pub domain: Term,
    pub formula: Term,
}

impl Obligation {
    /// Both sides' variables mentioned by the formula.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.formula.variables()
    }

    /// The formula simplified to `false`: no model exists.
    pub fn is_trivially_unsat(&self) -> bool {
        self.formula.is_false()
    }

    /// SMT-LIB2 script deciding the formula, prefixed with a comment naming the pair.
    pub fn render_smtlib(&self) -> String {
        format!(
            "; obligation #{} for agent {}: {} vs {}\n{}",
            self.sequence,
            self.agent,
            self.left.path,
            self.right.path,
            smtlib::script(&self.formula)
        )
    }

    /// First position at which the two runs differ.
    ///
    /// With a witness, the first position whose condition holds under it; otherwise the first
    /// position that can differ at all.
    pub fn first_difference(&self, witness: Option<&Assignment>) -> Option<&AlignedPosition> {
        if let Some(witness) = witness {
            if let Some(position) = self
                .positions
                .iter()
                .find(|p| p.condition().holds(witness) == Ok(true))
            {
                return Some(position);
            }
        }
        self.positions.iter().find(|p| !p.differs.is_false())
    }
}

/// Builds obligations from candidate pairs.
#[derive(Debug, Clone, Copy)]
pub struct ObligationGenerator<'a> {
    inputs: &'a InputDomains,
    absence: AbsencePolicy,
}

type Keyed<'t> = BTreeMap<(ProgramPoint, usize), &'t TraceEntry>;

impl<'a> ObligationGenerator<'a> {
    pub fn new(inputs: &'a InputDomains, absence: AbsencePolicy) -> Self {
        Self { inputs, absence }
    }

    fn keyed<'t>(trace: &'t Trace, agent: &'t AgentId) -> Keyed<'t> {
        let mut seen: BTreeMap<&ProgramPoint, usize> = BTreeMap::new();
        let mut out = Keyed::new();
        for entry in trace.observations_by(agent) {
            let point = &entry.observation.point;
            let occurrence = seen.entry(point).or_insert(0);
            out.insert((point.clone(), *occurrence), entry);
            *occurrence += 1;
        }
        out
    }

    /// Policy in force for one side of a position: the snapshot recorded with the observation,
    /// or the accumulated store at `point` when that side emitted nothing there.
    fn policy_on(
        trace: &Trace,
        entry: Option<&TraceEntry>,
        point: &ProgramPoint,
    ) -> Arc<PolicySnapshot> {
        match entry {
            Some(entry) => entry.policy.clone(),
            None => Arc::new(trace.policy.snapshot_at(point)),
        }
    }

    fn low_at(
        &self,
        left: &PolicySnapshot,
        right: &PolicySnapshot,
        agent: &AgentId,
        sorts: &BTreeMap<Arc<str>, Sort>,
    ) -> Vec<Variable> {
        left.visible_to(agent)
            .filter(|name| right.is_visible(agent, name))
            .filter_map(|name| {
                sorts
                    .get(name)
                    .copied()
                    .or_else(|| self.inputs.get(name).map(|d| d.sort))
                    .map(|sort| Variable::new(name, sort))
            })
            .collect()
    }

    fn differs(left: Option<&Term>, right: Option<&Term>) -> Term {
        match (left, right) {
            (Some(l), Some(r)) => match (l.sort(), r.sort()) {
                (Ok(a), Ok(b)) if a == b => {
                    l.on_side(Side::Left).not_equals(r.on_side(Side::Right))
                }
                _ => Term::bool(true),
            },
            _ => Term::bool(true),
        }
    }

    pub fn generate(&self, candidate: &Candidate) -> Obligation {
        let Candidate {
            sequence,
            agent,
            left,
            right,
        } = candidate;

        let mut sorts: BTreeMap<Arc<str>, Sort> = BTreeMap::new();
        for v in left.variables().into_iter().chain(right.variables()) {
            sorts.entry(v.name.clone()).or_insert(v.sort);
        }

        let lhs = Self::keyed(left, agent);
        let rhs = Self::keyed(right, agent);
        let keys: BTreeSet<&(ProgramPoint, usize)> = lhs.keys().chain(rhs.keys()).collect();

        let mut positions = Vec::new();
        for key in keys {
            let (le, re) = (lhs.get(key).copied(), rhs.get(key).copied());
            let l = le.map(|e| &e.observation.value);
            let r = re.map(|e| &e.observation.value);
            if (l.is_none() || r.is_none()) && self.absence.is_ignored() {
                continue;
            }
            let (point, occurrence) = key.clone();
            let left_policy = Self::policy_on(left, le, &point);
            let right_policy = Self::policy_on(right, re, &point);
            positions.push(AlignedPosition {
                low: self.low_at(&left_policy, &right_policy, agent, &sorts),
                differs: Self::differs(l, r),
                left: l.cloned(),
                right: r.cloned(),
                point,
                occurrence,
            });
        }

        let distinguishing = Term::or_any(positions.iter().map(AlignedPosition::condition));
        let body = Term::and_all([
            left.path_condition.on_side(Side::Left),
            right.path_condition.on_side(Side::Right),
            distinguishing,
        ]);
        let domain = Term::and_all(body.variables().iter().map(|v| self.inputs.constraint(v)));
        let formula = Term::and_all([body, domain.clone()]);

        debug!(
            "obligation #{sequence} for {agent}: {} position(s), size {}",
            positions.len(),
            formula.size()
        );

        Obligation {
            sequence: *sequence,
            agent: agent.clone(),
            left: left.clone(),
            right: right.clone(),
            positions,
            domain,
            formula,
        }
    }
}
