//! SMT-LIB2 rendering of sorts, values and terms.
//!
//! Variables are emitted as quoted symbols (`|s#1|`) so that run suffixes and
//! arbitrary program names never clash with SMT-LIB reserved words. Solver answers are read
//! back as [`Sexp`]s.
use std::{collections::BTreeSet, fmt};

use chumsky::prelude::*;

use crate::{
    error::{TermError, TermResult},
    sort::{Sort, Value},
    term::{Term, TermNode},
    variable::Variable,
};

/// SMT-LIB sort name.
pub fn sort_to_smtlib(sort: Sort) -> &'static str {
    match sort {
        Sort::Bool => "Bool",
        Sort::Int => "Int",
        Sort::Str => "String",
    }
}

/// Quoted SMT-LIB symbol for a variable.
///
/// `|` and `\` cannot appear inside a quoted symbol; they are written as `%7C` and `%5C`, and
/// `%` itself as `%25`, so distinct variables keep distinct symbols.
pub fn symbol(variable: &Variable) -> String {
    let mut out = String::from("|");
    for c in variable.to_string().chars() {
        match c {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out.push('|');
    out
}

/// SMT-LIB literal for a value.
pub fn value_to_smtlib(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(i) if *i < 0 => format!("(- {})", i.unsigned_abs()),
        Value::Int(i) => i.to_string(),
        Value::Str(s) => format!("\"{}\"", s.replace('"', "\"\"")),
    }
}

fn join(op: &str, items: &[Term], empty: &str) -> String {
    match items {
        [] => empty.to_string(),
        [single] => to_smtlib(single),
        _ => {
            let inner: Vec<String> = items.iter().map(to_smtlib).collect();
            format!("({op} {})", inner.join(" "))
        }
    }
}

/// Print a term in SMT-LIB2 syntax.
pub fn to_smtlib(term: &Term) -> String {
    use TermNode::*;
    match term.node() {
        Const(v) => value_to_smtlib(v),
        Var(v) => symbol(v),
        Not(a) => format!("(not {})", to_smtlib(a)),
        And(items) => join("and", items, "true"),
        Or(items) => join("or", items, "false"),
        Implies(a, b) => format!("(=> {} {})", to_smtlib(a), to_smtlib(b)),
        Eq(a, b) => format!("(= {} {})", to_smtlib(a), to_smtlib(b)),
        Lt(a, b) => format!("(< {} {})", to_smtlib(a), to_smtlib(b)),
        Le(a, b) => format!("(<= {} {})", to_smtlib(a), to_smtlib(b)),
        Add(a, b) => format!("(+ {} {})", to_smtlib(a), to_smtlib(b)),
        Sub(a, b) => format!("(- {} {})", to_smtlib(a), to_smtlib(b)),
        Mul(a, b) => format!("(* {} {})", to_smtlib(a), to_smtlib(b)),
        Neg(a) => format!("(- {})", to_smtlib(a)),
        Ite(c, t, e) => format!(
            "(ite {} {} {})",
            to_smtlib(c),
            to_smtlib(t),
            to_smtlib(e)
        ),
    }
}

/// `declare-const` commands for every variable in `variables`, in order.
pub fn declarations<'a>(variables: impl IntoIterator<Item = &'a Variable>) -> Vec<String> {
    variables
        .into_iter()
        .map(|v| format!("(declare-const {} {})", symbol(v), sort_to_smtlib(v.sort)))
        .collect()
}

/// Complete satisfiability script for `formula`: declarations, assertion,
/// `check-sat` and a `get-value` over all free variables.
pub fn script(formula: &Term) -> String {
    let vars: BTreeSet<Variable> = formula.variables();
    let mut lines = vec![
        "(set-option :produce-models true)".to_string(),
        "(set-logic ALL)".to_string(),
    ];
    lines.extend(declarations(&vars));
    lines.push(format!("(assert {})", to_smtlib(formula)));
    lines.push("(check-sat)".to_string());
    if !vars.is_empty() {
        let symbols: Vec<String> = vars.iter().map(symbol).collect();
        lines.push(format!("(get-value ({}))", symbols.join(" ")));
    }
    lines.push("(exit)".to_string());
    lines.join("\n")
}

/// Parse an SMT-LIB literal of the given sort, as found in `get-value` answers.
pub fn parse_value(text: &str, sort: Sort) -> Option<Value> {
    let text = text.trim();
    match sort {
        Sort::Bool => match text {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        Sort::Int => {
            if let Some(rest) = text.strip_prefix("(-") {
                let digits = rest.trim().trim_end_matches(')').trim();
                digits.parse::<i64>().ok().map(|n| Value::Int(-n))
            } else {
                text.parse::<i64>().ok().map(Value::Int)
            }
        }
        Sort::Str => {
            let inner = text.strip_prefix('"')?.strip_suffix('"')?;
            Some(Value::from(inner.replace("\"\"", "\"")))
        }
    }
}

/// S-expression, as printed by a solver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    /// Symbol, numeral or literal, verbatim (quotes included).
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(a) => Some(a),
            Sexp::List(_) => None,
        }
    }

    /// Leading atom of a list, e.g. `error` in `(error "...")`.
    pub fn head(&self) -> Option<&str> {
        match self {
            Sexp::List(items) => items.first().and_then(Sexp::as_atom),
            Sexp::Atom(_) => None,
        }
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Atom(a) => f.write_str(a),
            Sexp::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn sexp_parser<'a>() -> impl Parser<'a, &'a str, Vec<Sexp>, extra::Err<Rich<'a, char>>> {
    let comment = just(';').then(none_of("\n").repeated()).ignored();
    let blank = any()
        .filter(|c: &char| c.is_whitespace())
        .ignored()
        .or(comment)
        .repeated();

    let sexp = recursive({
        let blank = blank.clone();
        move |sexp| {
            // `""` escapes a quote inside string literals
            let string = just('"')
                .then(just("\"\"").ignored().or(none_of("\"").ignored()).repeated())
                .then(just('"'))
                .to_slice();
            let quoted = just('|')
                .then(none_of("|").repeated())
                .then(just('|'))
                .to_slice();
            let plain = any()
                .filter(|c: &char| !c.is_whitespace() && !"();\"|".contains(*c))
                .repeated()
                .at_least(1)
                .to_slice();
            let atom = choice((string, quoted, plain)).map(|s: &str| Sexp::Atom(s.to_string()));

            let list = just('(')
                .ignore_then(blank.clone())
                .ignore_then(sexp.then_ignore(blank.clone()).repeated().collect::<Vec<_>>())
                .then_ignore(just(')'))
                .map(Sexp::List);

            atom.or(list)
        }
    });

    blank
        .clone()
        .ignore_then(sexp.then_ignore(blank).repeated().collect::<Vec<_>>())
        .then_ignore(end())
}

/// Parse the whole output of a solver into its top-level S-expressions.
///
/// Example
/// ```
/// use hyterm::smtlib::{Sexp, parse_sexps};
///
/// let answer = parse_sexps("sat\n((|s#1| (- 2)))").unwrap();
/// assert_eq!(answer[0], Sexp::Atom("sat".into()));
/// assert_eq!(answer[1].to_string(), "((|s#1| (- 2)))");
/// ```
pub fn parse_sexps(text: &str) -> TermResult<Vec<Sexp>> {
    let (sexps, errs) = sexp_parser().parse(text).into_output_errors();
    match sexps {
        Some(sexps) if errs.is_empty() => Ok(sexps),
        _ => Err(TermError::Parse {
            source_text: text.to_string(),
            diagnostics: errs.into_iter().map(|e| format!("parse error: {e}")).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Side;

    #[test]
    fn print_relational_formula() {
        let s = Variable::new("s", Sort::Int);
        let pc = Term::var(s.clone()).gt(Term::int(0)).on_side(Side::Left);
        assert_eq!(to_smtlib(&pc), "(< 0 |s#1|)");

        let neg = Term::var(s).equals(Term::int(-3));
        assert_eq!(to_smtlib(&neg), "(= |s| (- 3))");
    }

    #[test]
    fn script_declares_free_variables() {
        let s = Variable::new("s", Sort::Int).on_side(Side::Right);
        let text = script(&Term::var(s).lt(Term::int(5)));
        assert!(text.contains("(declare-const |s#2| Int)"));
        assert!(text.contains("(check-sat)"));
        assert!(text.contains("(get-value (|s#2|))"));
    }

    #[test]
    fn parse_values_back() {
        assert_eq!(parse_value("(- 7)", Sort::Int), Some(Value::Int(-7)));
        assert_eq!(parse_value("42", Sort::Int), Some(Value::Int(42)));
        assert_eq!(parse_value("true", Sort::Bool), Some(Value::Bool(true)));
        assert_eq!(
            parse_value("\"a\"\"b\"", Sort::Str),
            Some(Value::from("a\"b"))
        );
        assert_eq!(parse_value("x", Sort::Int), None);
    }

    #[test]
    fn symbols_are_injective() {
        let names = ["a|b", "a_b", "a%7Cb", "a\\b", "a%5Cb"];
        let symbols: BTreeSet<String> = names
            .iter()
            .map(|name| symbol(&Variable::new(*name, Sort::Int)))
            .collect();
        assert_eq!(symbols.len(), names.len());
        assert_eq!(symbol(&Variable::new("a|b", Sort::Int)), "|a%7Cb|");
        assert!(symbols.iter().all(|s| !s[1..s.len() - 1].contains(['|', '\\'])));
    }

    #[test]
    fn reads_solver_answers() {
        let text = "; z3 says\nsat\n((|s#1| (- 3))\n (|name#1| \"a\"\"b\") ( ))\n";
        let sexps = parse_sexps(text).unwrap();
        assert_eq!(sexps.len(), 2);
        assert_eq!(sexps[0].as_atom(), Some("sat"));
        let Sexp::List(pairs) = &sexps[1] else {
            panic!("expected a list, got {}", sexps[1]);
        };
        assert_eq!(pairs[0].to_string(), "(|s#1| (- 3))");
        assert_eq!(pairs[1].to_string(), "(|name#1| \"a\"\"b\")");
        assert_eq!(pairs[2], Sexp::List(Vec::new()));

        let error = parse_sexps("(error \"unknown logic\")").unwrap();
        assert_eq!(error[0].head(), Some("error"));
        assert!(parse_sexps("((sat").is_err());
        assert!(parse_sexps("sat)").is_err());
        assert!(parse_sexps("\"open").is_err());
        assert_eq!(parse_sexps("  \n").unwrap(), Vec::new());
    }
}
