//! Assembly of one in-progress trace.
//!
//! The builder owns the path's [`PolicyStore`], its [`ObservationRecorder`] and the branch
//! conditions taken so far. It validates internal consistency while events arrive: every
//! event must be at a program point no earlier than the previous one, and conditions and
//! observed values must be well-sorted. It does not re-check satisfiability of the path
//! condition, which is the explorer's responsibility.
use hyterm::prelude::*;
use log::trace;

use crate::{
    point::{AgentId, PathId, ProgramPoint},
    policy::PolicyStore,
    trace::{Trace, TraceEntry, TraceStatus, recorder::ObservationRecorder},
    utils::error::{FlowError, FlowResult},
};

/// Borrowed view of the history a forked path inherits.
#[derive(Clone, Copy)]
pub struct Prefix<'a> {
    pub conditions: &'a [(ProgramPoint, Term)],
    pub entries: &'a [TraceEntry],
    pub policy: &'a PolicyStore,
}

#[derive(Debug, Clone)]
pub struct TraceBuilder {
    path: PathId,
    sequence: u64,
    policy: PolicyStore,
    recorder: ObservationRecorder,
    conditions: Vec<(ProgramPoint, Term)>,
    path_condition: Term,
    last_point: Option<ProgramPoint>,
}

impl TraceBuilder {
    /// Start a root path.
    pub fn new(path: PathId, sequence: u64, policy: PolicyStore) -> Self {
        Self {
            recorder: ObservationRecorder::new(path.clone()),
            path,
            sequence,
            policy,
            conditions: Vec::new(),
            path_condition: Term::bool(true),
            last_point: None,
        }
    }

    /// Start a path that shares `parent`'s history strictly before `point`.
    pub fn fork(parent: Prefix<'_>, path: PathId, sequence: u64, point: &ProgramPoint) -> Self {
        let conditions: Vec<(ProgramPoint, Term)> = parent
            .conditions
            .iter()
            .filter(|(p, _)| p < point)
            .cloned()
            .collect();
        let entries: Vec<TraceEntry> = parent
            .entries
            .iter()
            .filter(|entry| &entry.observation.point < point)
            .cloned()
            .collect();
        let policy = parent.policy.truncated_before(point);

        let last_point = conditions
            .iter()
            .map(|(p, _)| p)
            .chain(entries.iter().map(|e| &e.observation.point))
            .chain(policy.history().last().map(|d| &d.point))
            .max()
            .cloned();

        Self {
            recorder: ObservationRecorder::with_prefix(path.clone(), entries),
            path_condition: Term::and_all(conditions.iter().map(|(_, c)| c.clone())),
            path,
            sequence,
            policy,
            conditions,
            last_point,
        }
    }

    pub fn path(&self) -> &PathId {
        &self.path
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of branch conditions taken so far.
    pub fn depth(&self) -> usize {
        self.conditions.len()
    }

    pub fn path_condition(&self) -> &Term {
        &self.path_condition
    }

    pub fn prefix(&self) -> Prefix<'_> {
        Prefix {
            conditions: &self.conditions,
            entries: self.recorder.entries(),
            policy: &self.policy,
        }
    }

    fn check_open(&self) -> FlowResult<()> {
        if self.recorder.is_sealed() {
            return Err(FlowError::TraceSealed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn advance_to(&mut self, point: &ProgramPoint) -> FlowResult<()> {
        if let Some(previous) = &self.last_point {
            if point < previous {
                return Err(FlowError::OutOfOrder {
                    path: self.path.clone(),
                    previous: previous.clone(),
                    point: point.clone(),
                });
            }
        }
        self.last_point = Some(point.clone());
        Ok(())
    }

    fn malformed(&self, reason: String) -> FlowError {
        FlowError::MalformedEvent {
            path: self.path.clone(),
            reason,
        }
    }

    /// Take a branch: `condition` is conjoined onto the path condition.
    ///
    /// A literal `true` condition only advances the program point and does not count
    /// towards [`TraceBuilder::depth`]; explorers use it to open a root path.
    pub fn branch(&mut self, point: ProgramPoint, condition: Term) -> FlowResult<()> {
        self.check_open()?;
        let sort = condition.sort()?;
        if sort != Sort::Bool {
            return Err(self.malformed(format!("branch condition `{condition}` has sort {sort}")));
        }
        self.advance_to(&point)?;
        if condition.is_true() {
            return Ok(());
        }

        trace!("[{}] branch {condition} at {point}", self.path);
        self.path_condition = Term::and_all([self.path_condition.clone(), condition.clone()]);
        self.conditions.push((point, condition));
        Ok(())
    }

    pub fn declassify<I, S>(
        &mut self,
        point: ProgramPoint,
        agent: &AgentId,
        variables: I,
    ) -> FlowResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.check_open()?;
        self.advance_to(&point)?;
        trace!("[{}] declassify for {agent} at {point}", self.path);
        self.policy.declassify(&self.path, point, agent, variables)
    }

    /// Record an observation under the current policy and path condition.
    pub fn observe(&mut self, agent: AgentId, value: Term, point: ProgramPoint) -> FlowResult<()> {
        self.check_open()?;
        value.sort()?;
        self.advance_to(&point)?;
        self.recorder.record(
            self.policy.current(),
            agent,
            value,
            point,
            self.path_condition.clone(),
        )
    }

    /// Finalize the trace. Further events on this builder fail with [`FlowError::TraceSealed`].
    pub fn seal(&mut self, status: TraceStatus) -> FlowResult<Trace> {
        let entries = self.recorder.seal()?;
        trace!("[{}] sealed as {status}", self.path);
        Ok(Trace {
            path: self.path.clone(),
            sequence: self.sequence,
            conditions: std::mem::take(&mut self.conditions),
            path_condition: self.path_condition.clone(),
            entries,
            status,
            policy: self.policy.clone(),
        })
    }
}

impl Trace {
    /// History a path forked from this trace inherits.
    pub fn prefix(&self) -> Prefix<'_> {
        Prefix {
            conditions: &self.conditions,
            entries: &self.entries,
            policy: &self.policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(order: u64) -> ProgramPoint {
        ProgramPoint::new(order, format!("l{order}"))
    }

    fn s() -> Term {
        Term::var(Variable::new("s", Sort::Int))
    }

    #[test]
    fn path_condition_is_the_conjunction_of_branches() {
        let mut b = TraceBuilder::new(PathId::from("p"), 0, PolicyStore::new());
        b.branch(pt(1), s().gt(Term::int(0))).unwrap();
        b.branch(pt(2), s().lt(Term::int(10))).unwrap();
        b.observe(AgentId::from("E"), Term::int(1), pt(3)).unwrap();
        let trace = b.seal(TraceStatus::Normal).unwrap();
        assert_eq!(trace.path_condition.conjuncts().len(), 2);
        assert_eq!(trace.entries[0].observation.path_condition, trace.path_condition);
    }

    #[test]
    fn observations_must_not_go_back_in_program_order() {
        let mut b = TraceBuilder::new(PathId::from("p"), 0, PolicyStore::new());
        b.observe(AgentId::from("E"), Term::int(1), pt(5)).unwrap();
        let err = b.observe(AgentId::from("E"), Term::int(2), pt(4)).unwrap_err();
        assert!(matches!(err, FlowError::OutOfOrder { .. }));
    }

    #[test]
    fn trivial_branch_does_not_add_depth() {
        let mut b = TraceBuilder::new(PathId::from("p"), 0, PolicyStore::new());
        b.branch(pt(1), Term::bool(true)).unwrap();
        assert_eq!(b.depth(), 0);
        assert!(b.path_condition().is_true());
    }

    #[test]
    fn ill_sorted_condition_is_malformed() {
        let mut b = TraceBuilder::new(PathId::from("p"), 0, PolicyStore::new());
        assert!(matches!(
            b.branch(pt(1), s()),
            Err(FlowError::MalformedEvent { .. })
        ));
    }

    #[test]
    fn fork_inherits_strict_prefix_only() {
        let e = AgentId::from("E");
        let mut parent = TraceBuilder::new(PathId::from("root"), 0, PolicyStore::new());
        parent.branch(pt(1), s().gt(Term::int(0))).unwrap();
        parent.observe(e.clone(), Term::int(1), pt(2)).unwrap();
        parent.branch(pt(3), s().gt(Term::int(5))).unwrap();
        parent.observe(e.clone(), Term::int(2), pt(4)).unwrap();

        let mut child = TraceBuilder::fork(parent.prefix(), PathId::from("child"), 7, &pt(3));
        child.branch(pt(3), s().le(Term::int(5))).unwrap();
        let trace = child.seal(TraceStatus::Normal).unwrap();

        assert_eq!(trace.entries.len(), 1);
        assert_eq!(trace.conditions.len(), 2);
        assert_eq!(trace.sequence, 7);
        assert_eq!(parent.depth(), 2);
    }

    #[test]
    fn sealed_builder_rejects_events() {
        let mut b = TraceBuilder::new(PathId::from("p"), 0, PolicyStore::new());
        b.seal(TraceStatus::Excepted("NullPointer".into())).unwrap();
        assert!(matches!(
            b.branch(pt(1), Term::bool(true)),
            Err(FlowError::TraceSealed { .. })
        ));
        assert!(matches!(
            b.seal(TraceStatus::Normal),
            Err(FlowError::TraceSealed { .. })
        ));
    }
}
