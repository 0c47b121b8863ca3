use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use hyflow::{
    dispatch::{CancelToken, epistemic::EpistemicBackend},
    index::EquivalenceIndex,
    prelude::*,
};
use hyterm::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

const LEAVES: u64 = 16;

fn inputs() -> InputDomains {
    InputDomains::new()
        .with("s", InputDomain::range(-16, 16))
        .and_then(|d| d.with("p", InputDomain::range(0, 7)))
        .unwrap()
}

/// A chain of `LEAVES` comparisons on `s`, each leaf printing a random mix of `s` and `p`.
fn traces() -> Vec<Arc<Trace>> {
    // seeded for determinism
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    let s = Term::var(Variable::new("s", Sort::Int));
    let p = Term::var(Variable::new("p", Sort::Int));

    let mut policy = PolicySnapshot::new();
    policy.grant(&AgentId::from("E"), ["p"]);
    let mut ingestor = Ingestor::new(policy);
    ingestor
        .ingest(Event::branch("l0", ProgramPoint::new(0, "entry"), Term::bool(true)))
        .unwrap();
    for i in 0..LEAVES {
        let at = ProgramPoint::new(i + 1, format!("if{i}"));
        let bound = Term::int(i as i64 - 8);
        let next = format!("l{}", i + 1);
        let taken = s.clone().gt(bound.clone());
        ingestor
            .ingest(Event::fork(next, format!("l{i}"), at.clone(), taken))
            .unwrap();
        ingestor
            .ingest(Event::branch(format!("l{i}"), at, s.clone().le(bound)))
            .unwrap();
        let value = match rng.random_range(0..3) {
            0 => s.clone() + p.clone(),
            1 => p.clone() * Term::int(rng.random_range(1..4)),
            _ => Term::int(rng.random_range(0..2)),
        };
        ingestor
            .ingest(Event::observe(
                format!("l{i}"),
                "E",
                value,
                ProgramPoint::new(100, "out"),
            ))
            .unwrap();
        ingestor
            .ingest(Event::terminated(format!("l{i}"), TraceStatus::Normal))
            .unwrap();
    }
    ingestor.finish().traces
}

fn bench_obligations(c: &mut Criterion) {
    let inputs = inputs();
    let index = EquivalenceIndex::new(traces());
    let agent = AgentId::from("E");
    let generator = ObligationGenerator::new(&inputs, AbsencePolicy::Distinguishing);

    c.bench_function("generate_all_obligations", |b| {
        b.iter(|| {
            for candidate in index.candidates_for(&agent) {
                black_box(generator.generate(&candidate));
            }
        })
    });
}

fn bench_epistemic(c: &mut Criterion) {
    let inputs = inputs();
    let index = EquivalenceIndex::new(traces());
    let agent = AgentId::from("E");
    let generator = ObligationGenerator::new(&inputs, AbsencePolicy::Distinguishing);
    let obligations: Vec<Obligation> = index
        .candidates_for(&agent)
        .map(|candidate| generator.generate(&candidate))
        .collect();
    let backend = EpistemicBackend::new(inputs.clone(), 1 << 12);
    let cancel = CancelToken::new();

    c.bench_function("epistemic_check_all_pairs", |b| {
        b.iter(|| {
            let context = DecideContext {
                deadline: Instant::now() + Duration::from_secs(60),
                cancel: &cancel,
            };
            for obligation in &obligations {
                black_box(backend.decide(obligation, &context));
            }
        })
    });
}

criterion_group!(benches, bench_obligations, bench_epistemic);
criterion_main!(benches);
