//! Pairing of sealed traces into comparison candidates.
//!
//! Ordering
//! - Traces are sorted by ingest sequence number, then path identifier. Pairs `(i, j)` with
//!   `i < j` are enumerated in that order and numbered; the number of a pair does not depend
//!   on the agent or on which pairs get filtered out, so verdicts can be ordered by it.
//!
//! Filtering
//! - A pair is skipped only when its obligation is unsatisfiable by construction: neither
//!   trace carries an observation by the agent, or a variable the agent sees from the start of
//!   both traces is pinned to syntactically disjoint ranges by the two path conditions.
use std::sync::Arc;

use hyterm::prelude::*;
use log::trace;

use crate::{point::AgentId, trace::Trace};

/// Two traces to compare for one agent.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub sequence: u64,
    pub agent: AgentId,
    pub left: Arc<Trace>,
    pub right: Arc<Trace>,
}

#[derive(Debug, Clone, Default)]
pub struct EquivalenceIndex {
    traces: Vec<Arc<Trace>>,
}

impl EquivalenceIndex {
    pub fn new(traces: impl IntoIterator<Item = Arc<Trace>>) -> Self {
        let mut traces: Vec<Arc<Trace>> = traces.into_iter().collect();
        traces.sort_by(|a, b| (a.sequence, &a.path).cmp(&(b.sequence, &b.path)));
        Self { traces }
    }

    pub fn traces(&self) -> &[Arc<Trace>] {
        &self.traces
    }

    /// Number of unordered pairs, filtered or not.
    pub fn pair_count(&self) -> u64 {
        let n = self.traces.len() as u64;
        n * n.saturating_sub(1) / 2
    }

    /// Lazily enumerate the candidate pairs for `agent`, in pair order.
    pub fn candidates_for<'a>(
        &'a self,
        agent: &'a AgentId,
    ) -> impl Iterator<Item = Candidate> + 'a {
        let n = self.traces.len();
        (0..n)
            .flat_map(move |i| (i + 1..n).map(move |j| (i, j)))
            .zip(0u64..)
            .filter_map(move |((i, j), sequence)| {
                let (left, right) = (&self.traces[i], &self.traces[j]);
                if !Self::may_distinguish(left, right, agent) {
                    trace!(
                        "skipping pair #{sequence} ({}, {}) for {agent}",
                        left.path, right.path
                    );
                    return None;
                }
                Some(Candidate {
                    sequence,
                    agent: agent.clone(),
                    left: left.clone(),
                    right: right.clone(),
                })
            })
    }

    /// `false` only when no pair of runs along `left` and `right` can be told apart by `agent`.
    pub fn may_distinguish(left: &Trace, right: &Trace, agent: &AgentId) -> bool {
        if !left.observes(agent) && !right.observes(agent) {
            return false;
        }

        let right_initial = right.policy.initial();
        let shared_low = left
            .policy
            .initial()
            .visible_to(agent)
            .filter(|name| right_initial.is_visible(agent, name));
        for name in shared_low {
            let l = Bounds::of(name, &left.path_condition);
            let r = Bounds::of(name, &right.path_condition);
            if l.disjoint(&r) {
                return false;
            }
        }
        true
    }
}

/// Syntactic bounds on one variable implied by the conjuncts of a path condition.
#[derive(Debug, Clone, Default)]
struct Bounds {
    lo: Option<i64>,
    hi: Option<i64>,
    pinned: Option<Value>,
    contradictory: bool,
}

impl Bounds {
    fn of(name: &str, condition: &Term) -> Self {
        let mut bounds = Bounds::default();
        for conjunct in condition.conjuncts() {
            bounds.refine(name, conjunct);
        }
        bounds
    }

    fn is_named(term: &Term, name: &str) -> bool {
        matches!(term.node(), TermNode::Var(v) if &*v.name == name)
    }

    fn refine(&mut self, name: &str, conjunct: &Term) {
        use TermNode::*;
        match conjunct.node() {
            Var(_) if Self::is_named(conjunct, name) => self.pin(Value::Bool(true)),
            Not(inner) => match inner.node() {
                Var(_) if Self::is_named(inner, name) => self.pin(Value::Bool(false)),
                // !(a < b) is b <= a, !(a <= b) is b < a
                Lt(a, b) => self.compare(name, b, a, false),
                Le(a, b) => self.compare(name, b, a, true),
                _ => {}
            },
            Eq(a, b) => match (a.node(), b.node()) {
                (Var(_), Const(c)) if Self::is_named(a, name) => self.pin(c.clone()),
                (Const(c), Var(_)) if Self::is_named(b, name) => self.pin(c.clone()),
                _ => {}
            },
            Lt(a, b) => self.compare(name, a, b, true),
            Le(a, b) => self.compare(name, a, b, false),
            _ => {}
        }
    }

    /// Record `a < b` (strict) or `a <= b`.
    fn compare(&mut self, name: &str, a: &Term, b: &Term, strict: bool) {
        match (a.as_const(), b.as_const()) {
            (None, Some(Value::Int(c))) if Self::is_named(a, name) => {
                let hi = if strict { c.checked_sub(1) } else { Some(*c) };
                match hi {
                    Some(hi) => self.upper(hi),
                    None => self.contradictory = true,
                }
            }
            (Some(Value::Int(c)), None) if Self::is_named(b, name) => {
                let lo = if strict { c.checked_add(1) } else { Some(*c) };
                match lo {
                    Some(lo) => self.lower(lo),
                    None => self.contradictory = true,
                }
            }
            _ => {}
        }
    }

    fn lower(&mut self, lo: i64) {
        self.lo = Some(self.lo.map_or(lo, |cur| cur.max(lo)));
    }

    fn upper(&mut self, hi: i64) {
        self.hi = Some(self.hi.map_or(hi, |cur| cur.min(hi)));
    }

    fn pin(&mut self, value: Value) {
        if let Value::Int(c) = value {
            self.lower(c);
            self.upper(c);
            return;
        }
        match &self.pinned {
            Some(existing) if *existing != value => self.contradictory = true,
            _ => self.pinned = Some(value),
        }
    }

    fn disjoint(&self, other: &Bounds) -> bool {
        if self.contradictory || other.contradictory {
            return true;
        }
        let lo = self.lo.max(other.lo);
        let hi = match (self.hi, other.hi) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if lo > hi {
                return true;
            }
        }
        matches!((&self.pinned, &other.pinned), (Some(a), Some(b)) if a != b)
    }
}
