use hyterm::prelude::*;
use hyterm::smtlib;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn signature() -> Signature {
    Signature::new()
        .with("x", Sort::Int)
        .with("y", Sort::Int)
        .with("flag", Sort::Bool)
        .with("tag", Sort::Str)
}

fn var(name: &str) -> Term {
    signature()
        .variable(name)
        .map(Term::var)
        .expect("declared in signature")
}

fn random_int(budget: usize, rng: &mut impl Rng) -> Term {
    if budget == 0 || rng.random_bool(0.25) {
        return match rng.random_range(0..=2) {
            0 => var("x"),
            1 => var("y"),
            _ => Term::int(rng.random_range(-20..=20)),
        };
    }

    match rng.random_range(0..=4) {
        0 => random_int(budget - 1, rng) + random_int(budget - 1, rng),
        1 => random_int(budget - 1, rng) - random_int(budget - 1, rng),
        2 => random_int(budget - 1, rng) * random_int(budget - 1, rng),
        3 => -random_int(budget - 1, rng),
        _ => Term::ite(
            random_bool(budget - 1, rng),
            random_int(budget - 1, rng),
            random_int(budget - 1, rng),
        ),
    }
}

fn random_bool(budget: usize, rng: &mut impl Rng) -> Term {
    if budget == 0 || rng.random_bool(0.2) {
        return match rng.random_range(0..=3) {
            0 => var("flag"),
            1 => Term::bool(rng.random_bool(0.5)),
            2 => var("tag").equals(Term::string(["a", "b"][rng.random_range(0..2)])),
            _ => var("x").lt(var("y")),
        };
    }

    match rng.random_range(0..=8) {
        0 => random_bool(budget - 1, rng) & random_bool(budget - 1, rng),
        1 => random_bool(budget - 1, rng) | random_bool(budget - 1, rng),
        2 => !random_bool(budget - 1, rng),
        3 => random_bool(budget - 1, rng).implies(random_bool(budget - 1, rng)),
        4 => random_int(budget - 1, rng).lt(random_int(budget - 1, rng)),
        5 => random_int(budget - 1, rng).ge(random_int(budget - 1, rng)),
        6 => random_int(budget - 1, rng).equals(random_int(budget - 1, rng)),
        7 => random_bool(budget - 1, rng).not_equals(random_bool(budget - 1, rng)),
        _ => Term::ite(
            random_bool(budget - 1, rng),
            random_bool(budget - 1, rng),
            random_bool(budget - 1, rng),
        ),
    }
}

#[test]
fn pretty_output_parses_back_to_the_same_term() {
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    let sig = signature();
    for _ in 0..500 {
        let term = random_bool(5, &mut rng);
        let text = term.pretty_string();
        let parsed = parse_term(&text, &sig).unwrap_or_else(|e| panic!("`{text}`: {e}"));
        assert_eq!(parsed, term, "round trip of `{text}`");
    }
}

#[test]
fn renamed_terms_evaluate_like_the_original() {
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    for _ in 0..200 {
        let term = random_bool(4, &mut rng);

        let mut base = Assignment::new();
        base.insert(var_of("x"), Value::Int(rng.random_range(-5..=5)));
        base.insert(var_of("y"), Value::Int(rng.random_range(-5..=5)));
        base.insert(var_of("flag"), Value::Bool(rng.random_bool(0.5)));
        base.insert(var_of("tag"), Value::from(["a", "b"][rng.random_range(0..2)]));

        for side in [Side::Left, Side::Right] {
            let renamed: Assignment = base
                .iter()
                .map(|(v, value)| (v.on_side(side), value.clone()))
                .collect();
            assert_eq!(
                term.on_side(side).evaluate(&renamed),
                term.evaluate(&base),
                "{term}"
            );
        }
    }
}

#[test]
fn smtlib_output_is_balanced() {
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    for _ in 0..100 {
        let term = random_bool(5, &mut rng).on_side(Side::Left);
        let text = smtlib::to_smtlib(&term);
        let mut depth = 0i64;
        for c in text.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            assert!(depth >= 0, "{text}");
        }
        assert_eq!(depth, 0, "{text}");
        assert!(!text.contains("|x|"), "renamed variables carry their run: {text}");
    }
}

fn var_of(name: &str) -> Variable {
    signature().variable(name).expect("declared in signature")
}
