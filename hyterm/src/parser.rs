//! Parser for the textual term syntax using chumsky.
//!
//! Role
//! - Turn human-readable formulas (path conditions in trace files, observed values,
//!   test fixtures) into [`Term`]s, resolving identifiers against a [`Signature`].
//! - Mirrors the precedence and associativity used by the pretty-printer for round-tripping.
//!
//! Two stages:
//! 1) Tokenisation from input string to a `Token` stream.
//! 2) Parsing tokens into a small owned AST, then resolving it into a sort-checked `Term`.
//!
//! Accepted syntax (loosest binding first):
//! - Conditionals: `if C then X else Y`.
//! - Implication: `P => Q` (right-associative).
//! - Disjunction `P || Q`, then conjunction `P && Q`.
//! - Comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=` (non-associative).
//! - Arithmetic: `+`, `-` (left-associative), then `*`.
//! - Prefix: `!P`, `-X`.
//! - Atoms: integers, `"strings"`, `true`, `false`, identifiers, parenthesised expressions.
//!
//! Identifiers match `[A-Za-z_][A-Za-z0-9_.]*` and may carry a run suffix (`s#1`, `s#2`).
use std::{collections::BTreeMap, sync::Arc};

use chumsky::{input::ValueInput, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    error::{TermError, TermResult},
    sort::Sort,
    term::Term,
    variable::{Side, Variable},
};

pub type Spanned<T> = (T, SimpleSpan);
type Span = SimpleSpan;

/// Declared sorts of the identifiers a term may mention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    sorts: BTreeMap<Arc<str>, Sort>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `name` with `sort`, replacing any previous declaration.
    pub fn declare(&mut self, name: impl AsRef<str>, sort: Sort) -> &mut Self {
        self.sorts.insert(Arc::from(name.as_ref()), sort);
        self
    }

    /// Builder-style [`Signature::declare`].
    pub fn with(mut self, name: impl AsRef<str>, sort: Sort) -> Self {
        self.declare(name, sort);
        self
    }

    pub fn sort_of(&self, name: &str) -> Option<Sort> {
        self.sorts.get(name).copied()
    }

    /// The `Base` variable declared as `name`.
    pub fn variable(&self, name: &str) -> Option<Variable> {
        self.sort_of(name).map(|sort| Variable::new(name, sort))
    }

    /// All declared variables, ordered by name.
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.sorts
            .iter()
            .map(|(name, sort)| Variable::new(name, *sort))
    }

    pub fn len(&self) -> usize {
        self.sorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorts.is_empty()
    }
}

impl FromIterator<Variable> for Signature {
    fn from_iter<T: IntoIterator<Item = Variable>>(iter: T) -> Self {
        let mut signature = Signature::new();
        for v in iter {
            signature.declare(&v.name, v.sort);
        }
        signature
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Token {
    // Delimiters
    LParen,
    RParen,

    // Operators
    Plus,
    Minus,
    Star,
    Bang,
    AndAnd,  // &&
    OrOr,    // ||
    Implies, // =>
    EqEq,    // ==
    NotEq,   // !=
    Lt,
    Le,
    Gt,
    Ge,

    // Keywords
    If,
    Then,
    Else,
    True,
    False,

    // Literals and identifiers
    Int(u64),
    Str(String),
    Ident(String, Side),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Bang => write!(f, "!"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Implies => write!(f, "=>"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Ident(name, Side::Base) => write!(f, "{name}"),
            Token::Ident(name, Side::Left) => write!(f, "{name}#1"),
            Token::Ident(name, Side::Right) => write!(f, "{name}#2"),
        }
    }
}

// ---------------- Lexer ----------------

fn lexer<'a>() -> impl Parser<'a, &'a str, Vec<Spanned<Token>>, extra::Err<Rich<'a, char>>> {
    // Multi-char operators first to avoid prefix capture
    let multi = choice((
        just("&&").to(Token::AndAnd),
        just("||").to(Token::OrOr),
        just("=>").to(Token::Implies),
        just("==").to(Token::EqEq),
        just("!=").to(Token::NotEq),
        just("<=").to(Token::Le),
        just(">=").to(Token::Ge),
    ));

    let single = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('!').to(Token::Bang),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
    ));

    let int = any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .to_slice()
        .try_map(|s: &str, span| {
            s.parse::<u64>()
                .map(Token::Int)
                .map_err(|_| Rich::custom(span, format!("integer literal '{s}' is too large")))
        });

    let escape = just('\\').ignore_then(any()).map(|c: char| match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    });
    let string = just('"')
        .ignore_then(
            escape
                .or(none_of("\\\""))
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just('"'))
        .map(Token::Str);

    // Keywords and identifiers, with an optional run suffix on identifiers
    let word = any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
                .repeated(),
        )
        .to_slice()
        .then(just('#').ignore_then(one_of("12")).or_not())
        .try_map(|(s, run): (&str, Option<char>), span| {
            let tok = match (s, run) {
                ("if", None) => Token::If,
                ("then", None) => Token::Then,
                ("else", None) => Token::Else,
                ("true", None) => Token::True,
                ("false", None) => Token::False,
                ("if" | "then" | "else" | "true" | "false", Some(_)) => {
                    return Err(Rich::custom(
                        span,
                        format!("keyword '{s}' cannot carry a run suffix"),
                    ));
                }
                (_, None) => Token::Ident(s.to_string(), Side::Base),
                (_, Some('1')) => Token::Ident(s.to_string(), Side::Left),
                (_, Some(_)) => Token::Ident(s.to_string(), Side::Right),
            };
            Ok(tok)
        });

    let token = choice((multi, string, int, word, single));

    token
        .map_with(|tok, e| (tok, e.span()))
        .padded()
        .repeated()
        .collect()
        .padded()
        .then_ignore(end())
}

// ---------------- Owned AST ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Mul,
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Implies,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Implies => "=>",
        }
    }
}

#[derive(Debug, Clone)]
enum Ast {
    Int(u64),
    Str(String),
    Bool(bool),
    Var(String, Side),
    Unary(UnOp, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Ite(Box<Ast>, Box<Ast>, Box<Ast>),
}

impl Ast {
    fn binary(op: BinOp, lhs: Ast, rhs: Ast) -> Self {
        Ast::Binary(op, Box::new(lhs), Box::new(rhs))
    }
}

fn expect(operator: &'static str, expected: Sort, (term, found): (Term, Sort)) -> TermResult<Term> {
    if found != expected {
        return Err(TermError::SortMismatch {
            operator,
            expected,
            found,
        });
    }
    Ok(term)
}

fn literal(value: i128) -> TermResult<Term> {
    i64::try_from(value)
        .map(Term::int)
        .map_err(|_| TermError::Overflow("literal"))
}

impl Ast {
    /// Resolve identifiers and check sorts, building the term through the simplifying builders.
    fn resolve(&self, signature: &Signature) -> TermResult<(Term, Sort)> {
        match self {
            Ast::Int(n) => Ok((literal(*n as i128)?, Sort::Int)),
            Ast::Str(s) => Ok((Term::string(s), Sort::Str)),
            Ast::Bool(b) => Ok((Term::bool(*b), Sort::Bool)),
            Ast::Var(name, side) => {
                let variable = signature
                    .variable(name)
                    .ok_or_else(|| TermError::UndeclaredVariable(name.clone()))?;
                Ok((Term::var(variable.on_side(*side)), variable.sort))
            }
            Ast::Unary(UnOp::Neg, inner) => {
                // `-9223372036854775808` only fits once negated.
                if let Ast::Int(n) = inner.as_ref() {
                    return Ok((literal(-(*n as i128))?, Sort::Int));
                }
                let operand = expect("-", Sort::Int, inner.resolve(signature)?)?;
                Ok((operand.neg(), Sort::Int))
            }
            Ast::Unary(UnOp::Not, inner) => {
                let operand = expect("!", Sort::Bool, inner.resolve(signature)?)?;
                Ok((operand.negate(), Sort::Bool))
            }
            Ast::Binary(op, lhs, rhs) => {
                let symbol = op.symbol();
                let (lhs, rhs) = (lhs.resolve(signature)?, rhs.resolve(signature)?);
                match op {
                    BinOp::Mul | BinOp::Add | BinOp::Sub => {
                        let a = expect(symbol, Sort::Int, lhs)?;
                        let b = expect(symbol, Sort::Int, rhs)?;
                        let term = match op {
                            BinOp::Mul => a * b,
                            BinOp::Add => a + b,
                            _ => a - b,
                        };
                        Ok((term, Sort::Int))
                    }
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        let a = expect(symbol, Sort::Int, lhs)?;
                        let b = expect(symbol, Sort::Int, rhs)?;
                        let term = match op {
                            BinOp::Lt => a.lt(b),
                            BinOp::Le => a.le(b),
                            BinOp::Gt => a.gt(b),
                            _ => a.ge(b),
                        };
                        Ok((term, Sort::Bool))
                    }
                    BinOp::Eq | BinOp::Ne => {
                        let ((a, lsort), (b, rsort)) = (lhs, rhs);
                        if lsort != rsort {
                            return Err(TermError::HeterogeneousOperands {
                                operator: symbol,
                                lhs: lsort,
                                rhs: rsort,
                            });
                        }
                        let term = if *op == BinOp::Eq {
                            a.equals(b)
                        } else {
                            a.not_equals(b)
                        };
                        Ok((term, Sort::Bool))
                    }
                    BinOp::And | BinOp::Or | BinOp::Implies => {
                        let a = expect(symbol, Sort::Bool, lhs)?;
                        let b = expect(symbol, Sort::Bool, rhs)?;
                        let term = match op {
                            BinOp::And => a & b,
                            BinOp::Or => a | b,
                            _ => a.implies(b),
                        };
                        Ok((term, Sort::Bool))
                    }
                }
            }
            Ast::Ite(c, t, e) => {
                let condition = expect("ite", Sort::Bool, c.resolve(signature)?)?;
                let (then_branch, lsort) = t.resolve(signature)?;
                let (else_branch, rsort) = e.resolve(signature)?;
                if lsort != rsort {
                    return Err(TermError::HeterogeneousOperands {
                        operator: "ite",
                        lhs: lsort,
                        rhs: rsort,
                    });
                }
                Ok((Term::ite(condition, then_branch, else_branch), lsort))
            }
        }
    }
}

// ---------------- chumsky parser over tokens ----------------

fn term_parser<'tokens, I>()
-> impl Parser<'tokens, I, Ast, extra::Err<Rich<'tokens, Token, Span>>> + Clone
where
    I: ValueInput<'tokens, Token = Token, Span = Span>,
{
    recursive(|expr| {
        let value = select! {
            Token::Int(n) => Ast::Int(n),
            Token::Str(s) => Ast::Str(s),
            Token::True => Ast::Bool(true),
            Token::False => Ast::Bool(false),
            Token::Ident(name, side) => Ast::Var(name, side),
        };

        let paren_expr = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .labelled("parentheses");

        let atom = value.or(paren_expr).labelled("atom")
            .boxed();

        // Prefix `!` and `-` bind tighter than any infix operator
        let prefix = select! {
            Token::Bang => UnOp::Not,
            Token::Minus => UnOp::Neg,
        }
        .repeated()
        .foldr(atom, |op, rhs| Ast::Unary(op, Box::new(rhs)));

        let product = prefix
            .clone()
            .foldl(
                just(Token::Star).ignore_then(prefix).repeated(),
                |a, b| Ast::binary(BinOp::Mul, a, b),
            )
            .labelled("product")
            .boxed();

        let additive = select! {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
        };
        let sum = product
            .clone()
            .foldl(additive.then(product).repeated(), |a, (op, b)| {
                Ast::binary(op, a, b)
            })
            .labelled("sum")
            .boxed();

        let comparator = select! {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
        };
        let comparison = sum
            .clone()
            .then(comparator.then(sum).or_not())
            .map(|(a, rest)| match rest {
                Some((op, b)) => Ast::binary(op, a, b),
                None => a,
            })
            .labelled("comparison")
            .boxed();

        let conjunction = comparison
            .clone()
            .foldl(
                just(Token::AndAnd).ignore_then(comparison).repeated(),
                |a, b| Ast::binary(BinOp::And, a, b),
            )
            .labelled("conjunction")
            .boxed();

        let disjunction = conjunction
            .clone()
            .foldl(
                just(Token::OrOr).ignore_then(conjunction).repeated(),
                |a, b| Ast::binary(BinOp::Or, a, b),
            )
            .labelled("disjunction")
            .boxed();

        let implies = recursive(|imp| {
            disjunction
                .clone()
                .then(just(Token::Implies).ignore_then(imp).or_not())
                .map(|(a, b)| match b {
                    Some(b) => Ast::binary(BinOp::Implies, a, b),
                    None => a,
                })
                .labelled("implies")
        });

        let ite = just(Token::If)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Then))
            .then(expr.clone())
            .then_ignore(just(Token::Else))
            .then(expr)
            .map(|((c, t), e)| Ast::Ite(Box::new(c), Box::new(t), Box::new(e)))
            .labelled("if-expression")
            .boxed();

        ite.or(implies)
    })
}

// ---------------- Public API ----------------

/// Parse a term, resolving identifiers against `signature`.
///
/// Lexing and parsing diagnostics are collected into [`TermError::Parse`]; undeclared
/// identifiers and sort errors are reported with their own variants.
///
/// Example
/// ```
/// use hyterm::prelude::*;
///
/// let sig = Signature::new().with("s", Sort::Int);
/// let pc = parse_term("s > 0 && s#1 != s#2", &sig).unwrap();
/// assert_eq!(pc.pretty_string(), "0 < s && s#1 != s#2");
/// ```
pub fn parse_term(src: &str, signature: &Signature) -> TermResult<Term> {
    let (tokens, lex_errs) = lexer().parse(src).into_output_errors();
    let mut errors: Vec<String> = lex_errs
        .into_iter()
        .map(|e| format!("lexing error: {e}"))
        .collect();

    let tokens = match tokens {
        Some(toks) if errors.is_empty() => toks,
        _ => {
            return Err(TermError::Parse {
                source_text: src.to_string(),
                diagnostics: errors,
            });
        }
    };

    let plain: Vec<Token> = tokens.into_iter().map(|(t, _s)| t).collect();
    let (ast, parse_errs) = term_parser()
        .then_ignore(end())
        .parse(plain.as_slice())
        .into_output_errors();
    errors.extend(parse_errs.into_iter().map(|e| format!("parse error: {e}")));

    match ast {
        Some(ast) if errors.is_empty() => ast.resolve(signature).map(|(term, _)| term),
        _ => Err(TermError::Parse {
            source_text: src.to_string(),
            diagnostics: errors,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pretty::PrettyTerm;

    fn signature() -> Signature {
        Signature::new()
            .with("s", Sort::Int)
            .with("p", Sort::Int)
            .with("flag", Sort::Bool)
            .with("name", Sort::Str)
    }

    fn parse(src: &str) -> Term {
        parse_term(src, &signature()).unwrap()
    }

    #[test]
    fn precedence_matches_pretty_printer() {
        let cases = [
            ("s + p * 2", "s + p * 2"),
            ("(s + p) * 2", "(s + p) * 2"),
            ("s - p - 1", "s - p - 1"),
            ("s - (p - 1)", "s - (p - 1)"),
            ("s > 0 || p > 0 && flag", "0 < s || 0 < p && flag"),
            ("flag => s > 0 => p > 0", "flag => 0 < s => 0 < p"),
            ("!flag && s != p", "!flag && s != p"),
            ("if flag then s else -p", "if flag then s else -p"),
        ];
        for (src, expected) in cases {
            assert_eq!(parse(src).pretty_string(), expected, "parsing `{src}`");
        }
    }

    #[test]
    fn run_suffixes_and_literals() {
        let t = parse("s#1 == s#2 && name#2 == \"a\\\"b\"");
        let vars = t.variables();
        assert_eq!(vars.len(), 3);
        assert!(vars.iter().any(|v| v.side == Side::Left));
        assert_eq!(parse("-9223372036854775808"), Term::int(i64::MIN));
        assert_eq!(parse("2 * 3 + 1"), Term::int(7));
    }

    #[test]
    fn errors_are_specific() {
        let sig = signature();
        assert_eq!(
            parse_term("x > 0", &sig),
            Err(TermError::UndeclaredVariable("x".to_string()))
        );
        assert!(matches!(
            parse_term("s && flag", &sig),
            Err(TermError::SortMismatch { .. })
        ));
        assert!(matches!(
            parse_term("s == name", &sig),
            Err(TermError::HeterogeneousOperands { .. })
        ));
        assert!(matches!(
            parse_term("s < < 1", &sig),
            Err(TermError::Parse { .. })
        ));
        assert!(matches!(
            parse_term("s < 1 < 2", &sig),
            Err(TermError::Parse { .. })
        ));
        assert!(matches!(
            parse_term("99999999999999999999", &sig),
            Err(TermError::Parse { .. })
        ));
    }
}
