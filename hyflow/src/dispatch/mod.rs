//! Dispatch of obligations to decision backends.
//!
//! Lifecycle
//! - Every obligation goes `Pending → Dispatched → {Sat, Unsat, Timeout, SolverError,
//!   Incomplete}`. `Sat` maps to an insecure verdict, `Unsat` to secure, everything else to
//!   unknown.
//! - Obligations that cannot be dispatched anymore (session deadline passed, step budget
//!   spent, session cancelled) skip straight to `Timeout` or `Incomplete`: they are reported,
//!   never dropped.
//!
//! Workers
//! - A bounded pool of scoped threads pulls obligations from a bounded channel and sends
//!   outcomes back over an unbounded one; only the calling thread consumes outcomes.
//! - Each worker asks every enabled backend. Definite answers must agree: a `Sat` next to an
//!   `Unsat` for the same obligation aborts the whole session.
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam::channel;
use hyterm::prelude::*;
use log::{debug, error, trace};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIs};

use crate::{
    aggregate::{Counterexample, UnknownReason, Verdict},
    obligation::Obligation,
    point::AgentId,
    utils::error::{FlowError, FlowResult},
};

pub mod epistemic;
pub mod smtlib;

/// Answer of one backend on one obligation.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs)]
pub enum BackendVerdict {
    /// A model exists; the assignment is over both sides' variables when the backend has one.
    Sat(Option<Assignment>),
    Unsat,
    Unknown(UnknownReason),
}

impl BackendVerdict {
    fn label(&self) -> &'static str {
        match self {
            BackendVerdict::Sat(_) => "sat",
            BackendVerdict::Unsat => "unsat",
            BackendVerdict::Unknown(_) => "unknown",
        }
    }
}

/// Cooperative cancellation flag shared by a session and its backend calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Limits of one backend call.
#[derive(Debug, Clone, Copy)]
pub struct DecideContext<'a> {
    pub deadline: Instant,
    pub cancel: &'a CancelToken,
}

impl DecideContext<'_> {
    /// The call should give up and answer [`UnknownReason::Timeout`].
    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }
}

/// A procedure deciding satisfiability of obligations.
pub trait DecisionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, obligation: &Obligation, context: &DecideContext<'_>) -> BackendVerdict;
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIs, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObligationState {
    Pending,
    Dispatched,
    Sat,
    Unsat,
    Timeout,
    SolverError,
    Incomplete,
}

impl ObligationState {
    fn of(verdict: &BackendVerdict) -> Self {
        match verdict {
            BackendVerdict::Sat(_) => ObligationState::Sat,
            BackendVerdict::Unsat => ObligationState::Unsat,
            BackendVerdict::Unknown(UnknownReason::Timeout) => ObligationState::Timeout,
            BackendVerdict::Unknown(UnknownReason::SolverError(_)) => ObligationState::SolverError,
            BackendVerdict::Unknown(UnknownReason::Incomplete(_)) => ObligationState::Incomplete,
        }
    }
}

/// Final state and verdict of one obligation.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub sequence: u64,
    pub agent: AgentId,
    pub state: ObligationState,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub calls: u64,
    pub sat: u64,
    pub unsat: u64,
    pub unknown: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub backends: BTreeMap<String, BackendStats>,
    /// Final state counts over all obligations, by state name.
    pub states: BTreeMap<String, u64>,
    /// Obligations answered without calling a backend.
    pub trivial: u64,
}

/// Bounded worker pool running every enabled backend on each obligation.
pub struct Dispatcher {
    backends: Vec<Arc<dyn DecisionBackend>>,
    max_workers: usize,
    pair_timeout: Duration,
    session_deadline: Option<Instant>,
    max_obligations: Option<usize>,
    cancel: CancelToken,
    stats: Mutex<DispatchStats>,
}

impl Dispatcher {
    pub fn new(backends: Vec<Arc<dyn DecisionBackend>>) -> Self {
        Self {
            backends,
            max_workers: 1,
            pair_timeout: Duration::from_secs(10),
            session_deadline: None,
            max_obligations: None,
            cancel: CancelToken::new(),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_pair_timeout(mut self, timeout: Duration) -> Self {
        self.pair_timeout = timeout;
        self
    }

    pub fn with_session_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.session_deadline = deadline;
        self
    }

    pub fn with_max_obligations(mut self, max: Option<usize>) -> Self {
        self.max_obligations = max;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().clone()
    }

    fn deadline_passed(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .session_deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn skipped(obligation: &Obligation, reason: UnknownReason) -> PairOutcome {
        let state = ObligationState::of(&BackendVerdict::Unknown(reason.clone()));
        trace!(
            "obligation #{} for {}: pending -> {state}",
            obligation.sequence, obligation.agent
        );
        PairOutcome {
            sequence: obligation.sequence,
            agent: obligation.agent.clone(),
            state,
            verdict: Verdict::Unknown(reason),
        }
    }

    /// Ask every backend about one obligation and combine the answers.
    pub fn decide(&self, obligation: &Obligation) -> FlowResult<PairOutcome> {
        trace!(
            "obligation #{} for {}: pending -> dispatched",
            obligation.sequence, obligation.agent
        );

        let combined = if obligation.is_trivially_unsat() {
            self.stats.lock().trivial += 1;
            BackendVerdict::Unsat
        } else {
            let mut deadline = Instant::now() + self.pair_timeout;
            if let Some(session) = self.session_deadline {
                deadline = deadline.min(session);
            }
            let context = DecideContext {
                deadline,
                cancel: &self.cancel,
            };

            let mut definite: Option<(&str, BackendVerdict)> = None;
            let mut first_unknown: Option<BackendVerdict> = None;
            for backend in &self.backends {
                let started = Instant::now();
                let verdict = backend.decide(obligation, &context);
                self.account(backend.name(), &verdict, started.elapsed());

                if verdict.is_unknown() {
                    first_unknown.get_or_insert(verdict);
                    continue;
                }
                let Some((first, previous)) = &definite else {
                    definite = Some((backend.name(), verdict));
                    continue;
                };
                if previous.label() != verdict.label() {
                    error!(
                        "backends '{first}' and '{}' disagree on obligation #{}",
                        backend.name(),
                        obligation.sequence
                    );
                    return Err(FlowError::InconsistentVerdicts {
                        sequence: obligation.sequence,
                        agent: obligation.agent.clone(),
                        first: first.to_string(),
                        first_verdict: previous.label().to_string(),
                        second: backend.name().to_string(),
                        second_verdict: verdict.label().to_string(),
                        formula: obligation.formula.pretty_string(),
                    });
                }
                // prefer an answer that carries a model
                if matches!(
                    (previous, &verdict),
                    (BackendVerdict::Sat(None), BackendVerdict::Sat(Some(_)))
                ) {
                    definite = Some((backend.name(), verdict));
                }
            }

            match (definite, first_unknown) {
                (Some((_, verdict)), _) => verdict,
                (None, Some(unknown)) => unknown,
                (None, None) => BackendVerdict::Unknown(UnknownReason::Incomplete(
                    "no backend enabled".to_string(),
                )),
            }
        };

        let state = ObligationState::of(&combined);
        debug!(
            "obligation #{} for {}: dispatched -> {state}",
            obligation.sequence, obligation.agent
        );
        let verdict = match combined {
            BackendVerdict::Sat(witness) => Verdict::Insecure(Box::new(
                Counterexample::from_obligation(obligation, witness.as_ref()),
            )),
            BackendVerdict::Unsat => Verdict::Secure,
            BackendVerdict::Unknown(reason) => Verdict::Unknown(reason),
        };
        Ok(PairOutcome {
            sequence: obligation.sequence,
            agent: obligation.agent.clone(),
            state,
            verdict,
        })
    }

    fn account(&self, backend: &str, verdict: &BackendVerdict, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.backends.entry(backend.to_string()).or_default();
        entry.calls += 1;
        entry.elapsed_ms += elapsed.as_millis() as u64;
        match verdict {
            BackendVerdict::Sat(_) => entry.sat += 1,
            BackendVerdict::Unsat => entry.unsat += 1,
            BackendVerdict::Unknown(_) => entry.unknown += 1,
        }
    }

    /// Decide every obligation on the worker pool, handing each outcome to `on_outcome` on
    /// the calling thread as it arrives.
    ///
    /// On disagreeing backends the session is cancelled, the remaining outcomes are still
    /// drained, and the first inconsistency is returned.
    pub fn run<I, F>(&self, obligations: I, mut on_outcome: F) -> FlowResult<()>
    where
        I: IntoIterator<Item = Obligation>,
        I::IntoIter: Send,
        F: FnMut(PairOutcome),
    {
        let obligations = obligations.into_iter();
        let result = crossbeam::scope(|scope| {
            let (job_tx, job_rx) = channel::bounded::<Obligation>(self.max_workers * 2);
            let (out_tx, out_rx) = channel::unbounded::<FlowResult<PairOutcome>>();

            for _ in 0..self.max_workers {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move |_| {
                    for obligation in job_rx.iter() {
                        let outcome = if self.deadline_passed() {
                            Ok(Self::skipped(&obligation, UnknownReason::Timeout))
                        } else {
                            self.decide(&obligation)
                        };
                        if out_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);

            // Producer: feeds the pool and settles what can no longer be dispatched.
            let producer_tx = out_tx.clone();
            scope.spawn(move |_| {
                let budget = self.max_obligations.unwrap_or(usize::MAX);
                for (dispatched, obligation) in obligations.enumerate() {
                    let skipped = if dispatched >= budget {
                        Some(UnknownReason::Incomplete(format!(
                            "obligation budget of {budget} exhausted"
                        )))
                    } else if self.deadline_passed() {
                        Some(UnknownReason::Timeout)
                    } else {
                        None
                    };
                    let sent = match skipped {
                        Some(reason) => producer_tx
                            .send(Ok(Self::skipped(&obligation, reason)))
                            .is_ok(),
                        None => job_tx.send(obligation).is_ok(),
                    };
                    if !sent {
                        break;
                    }
                }
            });
            drop(out_tx);

            let mut first_error = None;
            for outcome in out_rx.iter() {
                match outcome {
                    Ok(outcome) => {
                        *self
                            .stats
                            .lock()
                            .states
                            .entry(outcome.state.to_string())
                            .or_default() += 1;
                        on_outcome(outcome);
                    }
                    Err(err) => {
                        self.cancel.cancel();
                        first_error.get_or_insert(err);
                    }
                }
            }
            first_error
        });

        match result {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(panic) => Err(FlowError::WorkerPanic(
                panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::InputDomains,
        index::Candidate,
        obligation::{AbsencePolicy, ObligationGenerator},
        point::{PathId, ProgramPoint},
        policy::PolicyStore,
        trace::{Trace, TraceStatus, builder::TraceBuilder},
    };

    struct Fixed(&'static str, BackendVerdict);

    impl DecisionBackend for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn decide(&self, _: &Obligation, _: &DecideContext<'_>) -> BackendVerdict {
            self.1.clone()
        }
    }

    fn obligation(sequence: u64) -> Obligation {
        let s = Term::var(Variable::new("s", Sort::Int));
        let make = |path: &str, pc: Term, out: i64| -> Arc<Trace> {
            let mut b = TraceBuilder::new(PathId::from(path), 0, PolicyStore::new());
            b.branch(ProgramPoint::new(1, "if"), pc).unwrap();
            b.observe(AgentId::from("E"), Term::int(out), ProgramPoint::new(2, "out"))
                .unwrap();
            Arc::new(b.seal(TraceStatus::Normal).unwrap())
        };
        let inputs = InputDomains::new();
        ObligationGenerator::new(&inputs, AbsencePolicy::default()).generate(&Candidate {
            sequence,
            agent: AgentId::from("E"),
            left: make("a", s.clone().gt(Term::int(0)), 1),
            right: make("b", s.le(Term::int(0)), 0),
        })
    }

    fn dispatcher(backends: Vec<BackendVerdict>) -> Dispatcher {
        let backends = backends
            .into_iter()
            .zip(["first", "second", "third"])
            .map(|(verdict, name)| Arc::new(Fixed(name, verdict)) as Arc<dyn DecisionBackend>)
            .collect();
        Dispatcher::new(backends).with_max_workers(2)
    }

    #[test]
    fn definite_verdict_beats_unknown() {
        let d = dispatcher(vec![
            BackendVerdict::Unknown(UnknownReason::Timeout),
            BackendVerdict::Unsat,
        ]);
        let outcome = d.decide(&obligation(0)).unwrap();
        assert_eq!(outcome.state, ObligationState::Unsat);
        assert!(outcome.verdict.is_secure());
    }

    #[test]
    fn disagreeing_backends_are_fatal() {
        let d = dispatcher(vec![BackendVerdict::Sat(None), BackendVerdict::Unsat]);
        let mut seen = 0;
        let err = d
            .run((0..4).map(obligation), |_| seen += 1)
            .unwrap_err();
        assert!(matches!(err, FlowError::InconsistentVerdicts { .. }));
        assert!(seen < 4);
        assert!(d.cancel_token().is_cancelled());
    }

    #[test]
    fn budget_exhaustion_reports_incomplete() {
        let d = dispatcher(vec![BackendVerdict::Sat(None)]).with_max_obligations(Some(2));
        let mut outcomes = Vec::new();
        d.run((0..5).map(obligation), |o| outcomes.push(o)).unwrap();
        outcomes.sort_by_key(|o| o.sequence);
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes[..2].iter().all(|o| o.verdict.is_insecure()));
        assert!(
            outcomes[2..]
                .iter()
                .all(|o| o.state == ObligationState::Incomplete)
        );
        assert_eq!(d.stats().states["incomplete"], 3);
    }

    #[test]
    fn expired_session_reports_timeout() {
        let d = dispatcher(vec![BackendVerdict::Unsat])
            .with_session_deadline(Some(Instant::now()));
        let mut outcomes = Vec::new();
        d.run((0..3).map(obligation), |o| outcomes.push(o)).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(
            outcomes
                .iter()
                .all(|o| o.verdict == Verdict::Unknown(UnknownReason::Timeout))
        );
    }
}
