//! Explicit-state epistemic model checking.
//!
//! The two traces of an obligation span a finite Kripke model: a world of a trace is an
//! assignment of its inputs, drawn from the declared domains, that satisfies the trace's path
//! condition. At each aligned position the agent cannot tell a left world from a right world
//! when they agree on the inputs it may see there. The obligation is satisfiable exactly when
//! some pair of mutually indistinguishable worlds shows the agent different values, i.e. the
//! agent *knows* the runs apart.
//!
//! Worlds are enumerated only over finite domains and up to `max_worlds` per trace; otherwise
//! the answer is [`UnknownReason::Incomplete`]. Per position the check is a hash join on the
//! low projection of the worlds.
use std::collections::{BTreeSet, HashMap};

use hyterm::prelude::*;
use log::trace;
use smallvec::SmallVec;

use crate::{
    aggregate::UnknownReason,
    dispatch::{BackendVerdict, DecideContext, DecisionBackend},
    domain::InputDomains,
    magic::BACKEND_EPISTEMIC,
    obligation::{AlignedPosition, Obligation},
    trace::Trace,
};

/// Low projection of a world at one position.
type LowKey = SmallVec<Value, 4>;

/// Number of worlds enumerated between two cancellation checks.
const CANCEL_CHECK_STRIDE: usize = 256;

#[derive(Debug, Clone)]
pub struct EpistemicBackend {
    inputs: InputDomains,
    max_worlds: usize,
}

/// Early answer, short-circuiting the check.
struct Stop(BackendVerdict);

impl From<TermError> for Stop {
    fn from(err: TermError) -> Self {
        Stop(BackendVerdict::Unknown(UnknownReason::SolverError(
            err.to_string(),
        )))
    }
}

fn incomplete(msg: String) -> Stop {
    Stop(BackendVerdict::Unknown(UnknownReason::Incomplete(msg)))
}

fn timeout() -> Stop {
    Stop(BackendVerdict::Unknown(UnknownReason::Timeout))
}

impl EpistemicBackend {
    pub fn new(inputs: InputDomains, max_worlds: usize) -> Self {
        Self { inputs, max_worlds }
    }

    /// Worlds of `trace` over `variables` (all `Base`).
    fn worlds(
        &self,
        trace: &Trace,
        variables: &BTreeSet<Variable>,
        context: &DecideContext<'_>,
    ) -> Result<Vec<Assignment>, Stop> {
        // sizes first: no domain is materialized unless the whole product fits
        let mut finite = Vec::with_capacity(variables.len());
        let mut total: usize = 1;
        for v in variables {
            let domain = self
                .inputs
                .finite(v)
                .ok_or_else(|| incomplete(format!("input `{}` has no finite domain", v.name)))?;
            total = domain
                .cardinality()
                .and_then(|n| usize::try_from(n).ok())
                .and_then(|n| total.checked_mul(n))
                .filter(|n| *n <= self.max_worlds)
                .ok_or_else(|| {
                    incomplete(format!(
                        "more than {} worlds for trace '{}'",
                        self.max_worlds, trace.path
                    ))
                })?;
            finite.push((v, domain));
        }
        if context.should_stop() {
            return Err(timeout());
        }
        let domains: Vec<(Variable, Vec<Value>)> = finite
            .iter()
            .map(|(v, domain)| {
                let values = domain.enumerate().map(|it| it.collect()).unwrap_or_default();
                ((*v).clone(), values)
            })
            .collect();

        let mut worlds = Vec::new();
        let mut digits = vec![0usize; domains.len()];
        for step in 0..total {
            if step % CANCEL_CHECK_STRIDE == 0 && context.should_stop() {
                return Err(timeout());
            }
            let world: Assignment = domains
                .iter()
                .zip(&digits)
                .map(|((v, values), &i)| (v.clone(), values[i].clone()))
                .collect();
            if trace.path_condition.holds(&world)? {
                worlds.push(world);
            }
            // odometer increment
            for (digit, (_, values)) in digits.iter_mut().zip(&domains).rev() {
                *digit += 1;
                if *digit < values.len() {
                    break;
                }
                *digit = 0;
            }
        }
        trace!("trace '{}': {} of {total} world(s)", trace.path, worlds.len());
        Ok(worlds)
    }

    fn low_key(position: &AlignedPosition, world: &Assignment) -> Result<LowKey, Stop> {
        position
            .low
            .iter()
            .map(|v| {
                world.get(v).cloned().ok_or_else(|| {
                    Stop(BackendVerdict::Unknown(UnknownReason::SolverError(format!(
                        "low input `{v}` missing from world"
                    ))))
                })
            })
            .collect()
    }

    fn observe(value: &Option<Term>, world: &Assignment) -> Result<Option<Value>, Stop> {
        Ok(match value {
            Some(term) => Some(term.evaluate(world)?),
            None => None,
        })
    }

    fn witness(left: &Assignment, right: &Assignment) -> Assignment {
        left.iter()
            .map(|(v, value)| (v.on_side(Side::Left), value.clone()))
            .chain(
                right
                    .iter()
                    .map(|(v, value)| (v.on_side(Side::Right), value.clone())),
            )
            .collect()
    }

    fn check(
        &self,
        obligation: &Obligation,
        context: &DecideContext<'_>,
    ) -> Result<BackendVerdict, Stop> {
        if obligation.is_trivially_unsat() {
            return Ok(BackendVerdict::Unsat);
        }

        let mut left_vars = BTreeSet::new();
        let mut right_vars = BTreeSet::new();
        for v in obligation.variables() {
            match v.side {
                Side::Left => left_vars.insert(v.base()),
                Side::Right => right_vars.insert(v.base()),
                Side::Base => false,
            };
        }
        // low inputs and observed values can drop out of a simplified formula but are still
        // evaluated below
        for position in &obligation.positions {
            for v in &position.low {
                left_vars.insert(v.base());
                right_vars.insert(v.base());
            }
            left_vars.extend(position.left.iter().flat_map(|t| t.variables()));
            right_vars.extend(position.right.iter().flat_map(|t| t.variables()));
        }

        let left_worlds = self.worlds(&obligation.left, &left_vars, context)?;
        let right_worlds = self.worlds(&obligation.right, &right_vars, context)?;

        for position in obligation.positions.iter().filter(|p| !p.differs.is_false()) {
            if context.should_stop() {
                return Err(timeout());
            }

            // Up to two distinct left observations per low key: any right observation differs
            // from at least one of them.
            let mut seen: HashMap<LowKey, SmallVec<(Option<Value>, usize), 2>> = HashMap::new();
            for (index, world) in left_worlds.iter().enumerate() {
                let shown = Self::observe(&position.left, world)?;
                let slot = seen.entry(Self::low_key(position, world)?).or_default();
                if slot.len() < 2 && slot.iter().all(|(v, _)| *v != shown) {
                    slot.push((shown, index));
                }
            }

            for world in &right_worlds {
                let Some(slot) = seen.get(&Self::low_key(position, world)?) else {
                    continue;
                };
                let shown = Self::observe(&position.right, world)?;
                if let Some((_, index)) = slot.iter().find(|(v, _)| *v != shown) {
                    trace!(
                        "obligation #{}: worlds differ at {}",
                        obligation.sequence, position.point
                    );
                    return Ok(BackendVerdict::Sat(Some(Self::witness(
                        &left_worlds[*index],
                        world,
                    ))));
                }
            }
        }
        Ok(BackendVerdict::Unsat)
    }
}

impl DecisionBackend for EpistemicBackend {
    fn name(&self) -> &str {
        BACKEND_EPISTEMIC
    }

    fn decide(&self, obligation: &Obligation, context: &DecideContext<'_>) -> BackendVerdict {
        match self.check(obligation, context) {
            Ok(verdict) | Err(Stop(verdict)) => verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use super::*;
    use crate::{
        dispatch::CancelToken,
        domain::InputDomain,
        index::Candidate,
        obligation::{AbsencePolicy, ObligationGenerator},
        point::{AgentId, PathId, ProgramPoint},
        policy::{PolicySnapshot, PolicyStore},
        trace::{TraceStatus, builder::TraceBuilder},
    };

    fn int(name: &str) -> Term {
        Term::var(Variable::new(name, Sort::Int))
    }

    fn traced(path: &str, pc: Term, out: Term, policy: &PolicyStore) -> Arc<Trace> {
        let mut b = TraceBuilder::new(PathId::from(path), 0, policy.clone());
        b.branch(ProgramPoint::new(1, "if"), pc).unwrap();
        b.observe(AgentId::from("E"), out, ProgramPoint::new(2, "out"))
            .unwrap();
        Arc::new(b.seal(TraceStatus::Normal).unwrap())
    }

    fn decide(inputs: &InputDomains, left: Arc<Trace>, right: Arc<Trace>) -> BackendVerdict {
        let obligation = ObligationGenerator::new(inputs, AbsencePolicy::default()).generate(
            &Candidate {
                sequence: 0,
                agent: AgentId::from("E"),
                left,
                right,
            },
        );
        let cancel = CancelToken::new();
        let context = DecideContext {
            deadline: Instant::now() + Duration::from_secs(30),
            cancel: &cancel,
        };
        EpistemicBackend::new(inputs.clone(), 1 << 12).decide(&obligation, &context)
    }

    #[test]
    fn branch_on_secret_is_known() {
        let inputs = InputDomains::new().with("s", InputDomain::range(-2, 2)).unwrap();
        let policy = PolicyStore::new();
        let verdict = decide(
            &inputs,
            traced("a", int("s").gt(Term::int(0)), Term::int(1), &policy),
            traced("b", int("s").le(Term::int(0)), Term::int(0), &policy),
        );
        let BackendVerdict::Sat(Some(witness)) = verdict else {
            panic!("expected a witness, got {verdict:?}");
        };
        let s = Variable::new("s", Sort::Int);
        assert!(matches!(witness[&s.on_side(Side::Left)], Value::Int(n) if n > 0));
        assert!(matches!(witness[&s.on_side(Side::Right)], Value::Int(n) if n <= 0));
    }

    #[test]
    fn public_output_reveals_nothing_new() {
        let inputs = InputDomains::new()
            .with("p", InputDomain::range(0, 3))
            .unwrap()
            .with("s", InputDomain::range(0, 3))
            .unwrap();
        let mut seed = PolicySnapshot::new();
        seed.grant(&AgentId::from("E"), ["p"]);
        let policy = PolicyStore::seeded(seed);
        // both branches print p
        let verdict = decide(
            &inputs,
            traced("a", int("s").gt(Term::int(1)), int("p"), &policy),
            traced("b", int("s").le(Term::int(1)), int("p"), &policy),
        );
        assert_eq!(verdict, BackendVerdict::Unsat);
    }

    #[test]
    fn unbounded_input_is_incomplete() {
        let inputs = InputDomains::new();
        let policy = PolicyStore::new();
        let verdict = decide(
            &inputs,
            traced("a", int("s").gt(Term::int(0)), int("s"), &policy),
            traced("b", int("s").le(Term::int(0)), Term::int(0), &policy),
        );
        assert!(matches!(
            verdict,
            BackendVerdict::Unknown(UnknownReason::Incomplete(_))
        ));
    }

    #[test]
    fn world_bound_is_enforced() {
        let inputs = InputDomains::new()
            .with("s", InputDomain::range(0, 1 << 20))
            .unwrap();
        let policy = PolicyStore::new();
        let verdict = decide(
            &inputs,
            traced("a", int("s").gt(Term::int(0)), int("s"), &policy),
            traced("b", int("s").le(Term::int(0)), Term::int(0), &policy),
        );
        assert!(matches!(
            verdict,
            BackendVerdict::Unknown(UnknownReason::Incomplete(_))
        ));
    }

    #[test]
    fn world_bound_is_checked_before_enumerating() {
        let inputs = InputDomains::new()
            .with("s", InputDomain::range(i64::MIN, i64::MAX))
            .unwrap();
        let policy = PolicyStore::new();
        let started = Instant::now();
        let verdict = decide(
            &inputs,
            traced("a", int("s").gt(Term::int(0)), int("s"), &policy),
            traced("b", int("s").le(Term::int(0)), Term::int(0), &policy),
        );
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(matches!(
            verdict,
            BackendVerdict::Unknown(UnknownReason::Incomplete(_))
        ));
    }
}
