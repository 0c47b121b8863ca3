use std::{sync::Arc, thread, time::Duration};

use hyflow::{aggregate::UnknownReason, prelude::*};
use hyterm::prelude::*;

fn config(extra: &str) -> SessionConfig {
    let text = format!(
        r#"
        max_workers = 2
        {extra}

        [inputs.s]
        sort = "int"
        range = [-4, 4]
        "#
    );
    SessionConfig::from_toml_str(&text).unwrap()
}

fn s() -> Term {
    Term::var(Variable::new("s", Sort::Int))
}

fn at(order: u64, site: &str) -> ProgramPoint {
    ProgramPoint::new(order, site)
}

fn e() -> AgentId {
    AgentId::from("E")
}

fn leak() -> Vec<Event> {
    vec![
        Event::branch("then", at(1, "if"), s().gt(Term::int(0))),
        Event::fork("else", "then", at(1, "if"), s().le(Term::int(0))),
        Event::observe("then", "E", Term::int(1), at(2, "print")),
        Event::observe("else", "E", Term::int(0), at(2, "print")),
        Event::terminated("then", TraceStatus::Normal),
        Event::terminated("else", TraceStatus::Normal),
    ]
}

fn quiet() -> Vec<Event> {
    vec![
        Event::branch("then", at(1, "if"), s().gt(Term::int(0))),
        Event::fork("else", "then", at(1, "if"), s().le(Term::int(0))),
        Event::observe("then", "E", s() - s(), at(2, "print")),
        Event::observe("else", "E", Term::int(0), at(2, "print")),
        Event::terminated("then", TraceStatus::Normal),
        Event::terminated("else", TraceStatus::Normal),
    ]
}

/// Always gives the same answer.
struct Fixed(&'static str, BackendVerdict);

impl DecisionBackend for Fixed {
    fn name(&self) -> &str {
        self.0
    }

    fn decide(&self, _: &Obligation, _: &DecideContext<'_>) -> BackendVerdict {
        self.1.clone()
    }
}

/// Spins until told to stop.
struct Stubborn;

impl DecisionBackend for Stubborn {
    fn name(&self) -> &str {
        "stubborn"
    }

    fn decide(&self, _: &Obligation, context: &DecideContext<'_>) -> BackendVerdict {
        while !context.should_stop() {
            thread::sleep(Duration::from_millis(1));
        }
        BackendVerdict::Unknown(UnknownReason::Timeout)
    }
}

fn run_with(
    config: SessionConfig,
    backends: Vec<Arc<dyn DecisionBackend>>,
    events: Vec<Event>,
) -> FlowResult<Report> {
    let mut session = Session::new(config)?.with_backends(backends);
    session.ingest_all(events)?;
    session.run()
}

#[test]
fn event_after_termination_is_an_error() {
    let mut session = Session::new(config("")).unwrap();
    session.ingest_all(leak()).unwrap();
    let err = session
        .ingest(Event::observe("then", "E", Term::int(2), at(3, "print")))
        .unwrap_err();
    assert!(matches!(err, FlowError::TraceSealed { .. }));
}

#[test]
fn out_of_order_trace_is_excluded_and_blocks_secure() {
    let mut events = quiet();
    events.insert(4, Event::observe("then", "E", Term::int(7), at(1, "early")));
    let report = verify(config(""), events).unwrap();

    assert_eq!(report.statistics.invalid_traces.len(), 1);
    assert_eq!(report.statistics.invalid_traces[0].path, PathId::from("then"));
    assert_eq!(report.statistics.traces, 1);
    assert!(matches!(
        report.verdict(&e()),
        Some(Verdict::Unknown(UnknownReason::Incomplete(_)))
    ));
}

#[test]
fn duplicate_path_condition_invalidates_the_later_trace() {
    let events = vec![
        Event::branch("a", at(1, "if"), s().gt(Term::int(0))),
        Event::branch("b", at(1, "if"), s().gt(Term::int(0))),
        Event::terminated("a", TraceStatus::Normal),
        Event::terminated("b", TraceStatus::Normal),
    ];
    let report = verify(config(""), events).unwrap();
    assert_eq!(report.statistics.traces, 1);
    assert_eq!(report.statistics.invalid_traces[0].path, PathId::from("b"));
}

#[test]
fn forks_do_not_share_later_declassifications() {
    // the child declassifies after the fork; the parent must not see it
    let events = vec![
        Event::branch("then", at(1, "if"), s().gt(Term::int(0))),
        Event::fork("else", "then", at(1, "if"), s().le(Term::int(0))),
        Event::declassify("else", at(2, "declassify"), "E", ["s"]),
        Event::observe("then", "E", Term::int(1), at(3, "print")),
        Event::observe("else", "E", Term::int(0), at(3, "print")),
        Event::terminated("then", TraceStatus::Normal),
        Event::terminated("else", TraceStatus::Normal),
    ];
    // `s` is visible in one trace only, so it does not constrain the pair
    let report = verify(config(""), events).unwrap();
    assert!(report.verdict(&e()).unwrap().is_insecure());
}

#[test]
fn unterminated_path_blocks_secure() {
    let mut events = quiet();
    events.pop();
    let report = verify(config(""), events).unwrap();
    assert_eq!(report.statistics.unterminated, vec![PathId::from("else")]);
    assert!(report.verdict(&e()).unwrap().is_unknown());
}

#[test]
fn depth_bound_cuts_paths() {
    let events = vec![
        Event::branch("a", at(1, "x"), s().gt(Term::int(0))),
        Event::observe("a", "E", Term::int(1), at(2, "print")),
        Event::branch("a", at(3, "y"), s().gt(Term::int(1))),
        Event::observe("a", "E", Term::int(2), at(4, "print")),
        Event::terminated("a", TraceStatus::Normal),
    ];
    let report = verify(config("max_depth = 1"), events).unwrap();
    assert_eq!(report.statistics.bounded_traces, 1);
    assert!(matches!(
        report.verdict(&e()),
        Some(Verdict::Unknown(UnknownReason::Incomplete(_)))
    ));
}

#[test]
fn leaks_are_reported_even_when_incomplete() {
    let mut events = leak();
    events.push(Event::branch("stray", at(1, "if"), s().equals(Term::int(9))));
    let report = verify(config(""), events).unwrap();
    assert!(report.verdict(&e()).unwrap().is_insecure());
}

#[test]
fn pair_timeout_gives_unknown() {
    let report = run_with(
        config("pair_timeout_ms = 20"),
        vec![Arc::new(Stubborn)],
        leak(),
    )
    .unwrap();
    assert_eq!(
        report.verdict(&e()),
        Some(&Verdict::Unknown(UnknownReason::Timeout))
    );
}

#[test]
fn definite_answer_wins_over_timeout() {
    let report = run_with(
        config("pair_timeout_ms = 20"),
        vec![
            Arc::new(Stubborn),
            Arc::new(Fixed("fixed", BackendVerdict::Sat(None))),
        ],
        leak(),
    )
    .unwrap();
    let Some(Verdict::Insecure(cex)) = report.verdict(&e()) else {
        panic!("expected insecure");
    };
    assert!(cex.witness.is_none());
}

#[test]
fn obligation_budget_gives_incomplete() {
    let report = verify(config("max_obligations = 0"), leak()).unwrap();
    assert!(matches!(
        report.verdict(&e()),
        Some(Verdict::Unknown(UnknownReason::Incomplete(_)))
    ));
    assert_eq!(report.statistics.obligations, 1);
}

#[test]
fn spent_session_deadline_gives_timeout() {
    let report = run_with(
        config("session_timeout_ms = 0"),
        vec![Arc::new(Fixed("fixed", BackendVerdict::Unsat))],
        leak(),
    )
    .unwrap();
    assert_eq!(
        report.verdict(&e()),
        Some(&Verdict::Unknown(UnknownReason::Timeout))
    );
}

#[test]
fn disagreeing_backends_abort_the_session() {
    let err = run_with(
        config(""),
        vec![
            Arc::new(Fixed("yes", BackendVerdict::Sat(None))),
            Arc::new(Fixed("no", BackendVerdict::Unsat)),
        ],
        leak(),
    )
    .unwrap_err();
    let FlowError::InconsistentVerdicts {
        first,
        second,
        formula,
        ..
    } = err
    else {
        panic!("expected inconsistent verdicts, got {err}");
    };
    assert_eq!((first.as_str(), second.as_str()), ("yes", "no"));
    assert!(formula.contains("s#1"));
}

#[test]
fn solver_errors_never_read_as_secure() {
    let report = run_with(
        config(""),
        vec![Arc::new(Fixed(
            "broken",
            BackendVerdict::Unknown(UnknownReason::SolverError("crashed".into())),
        ))],
        quiet(),
    )
    .unwrap();
    assert!(matches!(
        report.verdict(&e()),
        Some(Verdict::Unknown(UnknownReason::SolverError(_)))
    ));
}

#[test]
fn unknown_backend_name_is_rejected() {
    let err = Session::new(config(r#"backends = ["oracle"]"#))
        .err()
        .unwrap();
    assert!(matches!(err, FlowError::UnknownBackend(name) if name == "oracle"));
}

#[cfg(unix)]
#[test]
fn external_solver_agrees_with_the_epistemic_backend() {
    let extra = r#"
        backends = ["epistemic", "smtlib"]

        [smtlib]
        command = "sh"
        args = ["-c", "cat > /dev/null; echo unsat"]
    "#;
    let report = verify(config(extra), quiet()).unwrap();
    assert_eq!(report.verdict(&e()), Some(&Verdict::Secure));
    assert_eq!(report.statistics.backends, vec!["epistemic", "smtlib"]);
}

#[test]
fn declassification_after_an_observation_does_not_cover_it() {
    let events = vec![
        Event::branch("then", at(1, "if"), s().gt(Term::int(0))),
        Event::fork("else", "then", at(1, "if"), s().le(Term::int(0))),
        Event::observe("then", "E", Term::int(1), at(2, "print")),
        Event::observe("else", "E", Term::int(0), at(2, "print")),
        Event::declassify("then", at(2, "print"), "E", ["s"]),
        Event::declassify("else", at(2, "print"), "E", ["s"]),
        Event::terminated("then", TraceStatus::Normal),
        Event::terminated("else", TraceStatus::Normal),
    ];
    let report = verify(config(""), events).unwrap();
    assert!(report.verdict(&e()).unwrap().is_insecure());
}

#[test]
fn huge_domains_hit_the_world_bound_quickly() {
    let text = r#"
        pair_timeout_ms = 50

        [epistemic]
        max_worlds = 16

        [inputs.s]
        sort = "int"
        range = [-9223372036854775808, 9223372036854775807]
    "#;
    let started = std::time::Instant::now();
    let report = verify(SessionConfig::from_toml_str(text).unwrap(), leak()).unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(matches!(
        report.verdict(&e()),
        Some(Verdict::Unknown(UnknownReason::Incomplete(_)))
    ));
}

#[test]
fn empty_value_list_is_rejected() {
    let text = r#"
        [inputs.mode]
        sort = "str"
        values = []
    "#;
    let err = Session::new(SessionConfig::from_toml_str(text).unwrap())
        .err()
        .unwrap();
    assert!(matches!(err, FlowError::InvalidConfig(_)));
}

#[test]
fn agent_names_with_separators_stay_inside_the_output_dir() {
    let dir = std::env::temp_dir().join(format!("hyflow-session-{}", uuid::Uuid::new_v4()));
    let extra = format!(
        "output_dir = {:?}\nartifacts = [\"obligations\"]",
        dir.display().to_string()
    );
    let events = vec![
        Event::branch("then", at(1, "if"), s().gt(Term::int(0))),
        Event::fork("else", "then", at(1, "if"), s().le(Term::int(0))),
        Event::observe("then", "a/b", Term::int(1), at(2, "print")),
        Event::observe("else", "a/b", Term::int(0), at(2, "print")),
        Event::terminated("then", TraceStatus::Normal),
        Event::terminated("else", TraceStatus::Normal),
    ];
    let report = verify(config(&extra), events).unwrap();
    assert!(report.verdict(&AgentId::from("a/b")).unwrap().is_insecure());

    let files: Vec<_> = std::fs::read_dir(dir.join("obligations"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(files, vec!["a%2Fb-000000.smt2".to_string()]);
    std::fs::remove_dir_all(dir).unwrap();
}
