//! Term nodes, builders and structural operations.
//!
//! Role
//! - [`TermNode`] is the tagged union of all constructors; [`Term`] is a shared handle to one.
//! - Builders (`Term::and_all`, `Term::equals`, operator sugar `&`, `|`, `!`, `+`, `-`, `*`)
//!   fold constants and flatten nested conjunctions/disjunctions so that trivially true or
//!   false obligations are recognizable without a solver.
//!
//! Structural equality
//! - Two terms are equal if their trees have the same constructors and pairwise-equal
//!   children, regardless of whether they share storage.
use std::{collections::BTreeSet, fmt, ops, sync::Arc};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{EnumDiscriminants, EnumIs};

use crate::{
    error::{TermError, TermResult},
    sort::{Sort, Value},
    variable::{Side, Variable},
};

/// All term constructors.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIs,
    EnumDiscriminants,
    Serialize,
    Deserialize,
)]
#[strum_discriminants(name(TermType))]
#[strum_discriminants(derive(Hash, PartialOrd, Ord))]
pub enum TermNode {
    Const(Value),
    Var(Variable),
    Not(Term),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Term, Term),
    Eq(Term, Term),
    Lt(Term, Term),
    Le(Term, Term),
    Add(Term, Term),
    Sub(Term, Term),
    Mul(Term, Term),
    Neg(Term),
    Ite(Term, Term, Term),
}

/// Shared handle to an immutable [`TermNode`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Term(Arc<TermNode>);

impl Term {
    /// Wrap a node without any simplification.
    pub fn new(node: TermNode) -> Self {
        Term(Arc::new(node))
    }

    /// Borrow the outer constructor.
    #[inline]
    pub fn node(&self) -> &TermNode {
        &self.0
    }

    /// Discriminant of the outer constructor.
    #[inline]
    pub fn term_type(&self) -> TermType {
        self.node().into()
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Term::new(TermNode::Const(value.into()))
    }

    pub fn bool(value: bool) -> Self {
        Term::constant(value)
    }

    pub fn int(value: i64) -> Self {
        Term::constant(value)
    }

    pub fn string(value: impl AsRef<str>) -> Self {
        Term::constant(value.as_ref())
    }

    pub fn var(variable: Variable) -> Self {
        Term::new(TermNode::Var(variable))
    }

    /// The constant value, if this term is a literal.
    pub fn as_const(&self) -> Option<&Value> {
        match self.node() {
            TermNode::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self.as_const(), Some(Value::Bool(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self.as_const(), Some(Value::Bool(false)))
    }

    /// Conjunction of all `terms`, flattened, with `true` dropped and duplicates removed.
    /// The empty conjunction is `true`.
    pub fn and_all(terms: impl IntoIterator<Item = Term>) -> Self {
        let mut out: Vec<Term> = Vec::new();
        for term in terms {
            if term.is_false() {
                return Term::bool(false);
            }
            if term.is_true() {
                continue;
            }
            let parts: SmallVec<Term, 4> = match term.node() {
                TermNode::And(inner) => inner.iter().cloned().collect(),
                _ => smallvec::smallvec![term],
            };
            for part in parts {
                if !out.contains(&part) {
                    out.push(part);
                }
            }
        }

        match out.len() {
            0 => Term::bool(true),
            1 => out.pop().unwrap_or_else(|| Term::bool(true)),
            _ => Term::new(TermNode::And(out)),
        }
    }

    /// Disjunction of all `terms`, flattened, with `false` dropped and duplicates removed.
    /// The empty disjunction is `false`.
    pub fn or_any(terms: impl IntoIterator<Item = Term>) -> Self {
        let mut out: Vec<Term> = Vec::new();
        for term in terms {
            if term.is_true() {
                return Term::bool(true);
            }
            if term.is_false() {
                continue;
            }
            let parts: SmallVec<Term, 4> = match term.node() {
                TermNode::Or(inner) => inner.iter().cloned().collect(),
                _ => smallvec::smallvec![term],
            };
            for part in parts {
                if !out.contains(&part) {
                    out.push(part);
                }
            }
        }

        match out.len() {
            0 => Term::bool(false),
            1 => out.pop().unwrap_or_else(|| Term::bool(false)),
            _ => Term::new(TermNode::Or(out)),
        }
    }

    /// Logical negation, folding literals and double negations.
    pub fn negate(self) -> Self {
        match self.node() {
            TermNode::Const(Value::Bool(b)) => Term::bool(!b),
            TermNode::Not(inner) => inner.clone(),
            _ => Term::new(TermNode::Not(self)),
        }
    }

    pub fn implies(self, consequent: Term) -> Self {
        if self.is_false() || consequent.is_true() {
            return Term::bool(true);
        }
        if self.is_true() {
            return consequent;
        }
        Term::new(TermNode::Implies(self, consequent))
    }

    /// Equality `self == other`. Literals fold with exact comparison; structurally
    /// identical operands fold to `true`.
    pub fn equals(self, other: Term) -> Self {
        if let (Some(a), Some(b)) = (self.as_const(), other.as_const()) {
            return Term::bool(a == b);
        }
        if self == other {
            return Term::bool(true);
        }
        Term::new(TermNode::Eq(self, other))
    }

    /// Disequality `self != other`.
    pub fn not_equals(self, other: Term) -> Self {
        self.equals(other).negate()
    }

    pub fn lt(self, other: Term) -> Self {
        match (self.as_const(), other.as_const()) {
            (Some(Value::Int(a)), Some(Value::Int(b))) => Term::bool(a < b),
            _ => Term::new(TermNode::Lt(self, other)),
        }
    }

    pub fn le(self, other: Term) -> Self {
        match (self.as_const(), other.as_const()) {
            (Some(Value::Int(a)), Some(Value::Int(b))) => Term::bool(a <= b),
            _ => Term::new(TermNode::Le(self, other)),
        }
    }

    /// `self > other`, stored as `other < self`.
    pub fn gt(self, other: Term) -> Self {
        other.lt(self)
    }

    /// `self >= other`, stored as `other <= self`.
    pub fn ge(self, other: Term) -> Self {
        other.le(self)
    }

    pub fn neg(self) -> Self {
        match self.node() {
            TermNode::Const(Value::Int(a)) if a.checked_neg().is_some() => Term::int(-a),
            TermNode::Neg(inner) => inner.clone(),
            _ => Term::new(TermNode::Neg(self)),
        }
    }

    /// `if condition then self else other`.
    pub fn ite(condition: Term, then_branch: Term, else_branch: Term) -> Self {
        if condition.is_true() || then_branch == else_branch {
            return then_branch;
        }
        if condition.is_false() {
            return else_branch;
        }
        Term::new(TermNode::Ite(condition, then_branch, else_branch))
    }

    fn arith(
        self,
        other: Term,
        fold: fn(i64, i64) -> Option<i64>,
        build: fn(Term, Term) -> TermNode,
    ) -> Self {
        if let (Some(Value::Int(a)), Some(Value::Int(b))) = (self.as_const(), other.as_const()) {
            if let Some(c) = fold(*a, *b) {
                return Term::int(c);
            }
        }
        Term::new(build(self, other))
    }

    /// Direct children, in constructor order.
    pub fn children(&self) -> SmallVec<&Term, 3> {
        use TermNode::*;
        match self.node() {
            Const(_) | Var(_) => SmallVec::new(),
            Not(a) | Neg(a) => smallvec::smallvec![a],
            And(items) | Or(items) => items.iter().collect(),
            Implies(a, b) | Eq(a, b) | Lt(a, b) | Le(a, b) | Add(a, b) | Sub(a, b) | Mul(a, b) => {
                smallvec::smallvec![a, b]
            }
            Ite(c, t, e) => smallvec::smallvec![c, t, e],
        }
    }

    /// Number of nodes in the tree (shared sub-terms are counted once per occurrence).
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            count += 1;
            stack.extend(term.children());
        }
        count
    }

    /// Top-level conjuncts: the items of an `And`, otherwise the term itself.
    pub fn conjuncts(&self) -> SmallVec<&Term, 4> {
        match self.node() {
            TermNode::And(items) => items.iter().collect(),
            _ if self.is_true() => SmallVec::new(),
            _ => smallvec::smallvec![self],
        }
    }

    /// All variables occurring in the term.
    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut out = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(term) = stack.pop() {
            if let TermNode::Var(v) = term.node() {
                out.insert(v.clone());
            }
            stack.extend(term.children());
        }
        out
    }

    /// Rebuild the term bottom-up, replacing every variable with `f(variable)`.
    /// Builders re-run, so constants introduced by `f` are folded.
    pub fn map_variables(&self, f: &mut impl FnMut(&Variable) -> Term) -> Term {
        use TermNode::*;
        match self.node() {
            Const(_) => self.clone(),
            Var(v) => f(v),
            Not(a) => a.map_variables(f).negate(),
            Neg(a) => a.map_variables(f).neg(),
            And(items) => {
                let mapped: Vec<Term> = items.iter().map(|t| t.map_variables(f)).collect();
                Term::and_all(mapped)
            }
            Or(items) => {
                let mapped: Vec<Term> = items.iter().map(|t| t.map_variables(f)).collect();
                Term::or_any(mapped)
            }
            Implies(a, b) => a.map_variables(f).implies(b.map_variables(f)),
            Eq(a, b) => a.map_variables(f).equals(b.map_variables(f)),
            Lt(a, b) => a.map_variables(f).lt(b.map_variables(f)),
            Le(a, b) => a.map_variables(f).le(b.map_variables(f)),
            Add(a, b) => a.map_variables(f) + b.map_variables(f),
            Sub(a, b) => a.map_variables(f) - b.map_variables(f),
            Mul(a, b) => a.map_variables(f) * b.map_variables(f),
            Ite(c, t, e) => Term::ite(c.map_variables(f), t.map_variables(f), e.map_variables(f)),
        }
    }

    /// Attach every `Base` variable to `side`. Variables already on a run are kept.
    pub fn on_side(&self, side: Side) -> Term {
        self.map_variables(&mut |v| {
            if v.side.is_base() {
                Term::var(v.on_side(side))
            } else {
                Term::var(v.clone())
            }
        })
    }

    /// Exchange `Left` and `Right` variables.
    pub fn swap_sides(&self) -> Term {
        self.map_variables(&mut |v| Term::var(v.on_side(v.side.mirror())))
    }

    /// Sort of the term, checking every operator along the way.
    pub fn sort(&self) -> TermResult<Sort> {
        use TermNode::*;

        fn expect(operator: &'static str, expected: Sort, term: &Term) -> TermResult<()> {
            let found = term.sort()?;
            if found != expected {
                return Err(TermError::SortMismatch {
                    operator,
                    expected,
                    found,
                });
            }
            Ok(())
        }

        match self.node() {
            Const(v) => Ok(v.sort()),
            Var(v) => Ok(v.sort),
            Not(a) => expect("!", Sort::Bool, a).map(|_| Sort::Bool),
            And(items) => {
                for item in items {
                    expect("&&", Sort::Bool, item)?;
                }
                Ok(Sort::Bool)
            }
            Or(items) => {
                for item in items {
                    expect("||", Sort::Bool, item)?;
                }
                Ok(Sort::Bool)
            }
            Implies(a, b) => {
                expect("=>", Sort::Bool, a)?;
                expect("=>", Sort::Bool, b)?;
                Ok(Sort::Bool)
            }
            Eq(a, b) => {
                let (lhs, rhs) = (a.sort()?, b.sort()?);
                if lhs != rhs {
                    return Err(TermError::HeterogeneousOperands {
                        operator: "==",
                        lhs,
                        rhs,
                    });
                }
                Ok(Sort::Bool)
            }
            Lt(a, b) | Le(a, b) => {
                expect("<", Sort::Int, a)?;
                expect("<", Sort::Int, b)?;
                Ok(Sort::Bool)
            }
            Add(a, b) | Sub(a, b) | Mul(a, b) => {
                expect("arithmetic", Sort::Int, a)?;
                expect("arithmetic", Sort::Int, b)?;
                Ok(Sort::Int)
            }
            Neg(a) => expect("-", Sort::Int, a).map(|_| Sort::Int),
            Ite(c, t, e) => {
                expect("ite", Sort::Bool, c)?;
                let (lhs, rhs) = (t.sort()?, e.sort()?);
                if lhs != rhs {
                    return Err(TermError::HeterogeneousOperands {
                        operator: "ite",
                        lhs,
                        rhs,
                    });
                }
                Ok(lhs)
            }
        }
    }
}

impl From<Variable> for Term {
    fn from(v: Variable) -> Self {
        Term::var(v)
    }
}

impl From<Value> for Term {
    fn from(v: Value) -> Self {
        Term::constant(v)
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term({self})")
    }
}

// Operator sugar: `&`, `|` and `!` for logic, `+`, `-`, `*` and unary `-` for arithmetic.
macro_rules! define_ops_term {
    ($trait:ident, $method:ident, |$lhs:ident, $rhs:ident| $body:expr) => {
        impl ops::$trait<Term> for Term {
            type Output = Term;

            fn $method(self, rhs: Term) -> Term {
                let ($lhs, $rhs) = (self, rhs);
                $body
            }
        }

        impl ops::$trait<&Term> for &Term {
            type Output = Term;

            fn $method(self, rhs: &Term) -> Term {
                let ($lhs, $rhs) = (self.clone(), rhs.clone());
                $body
            }
        }
    };
}

define_ops_term!(BitAnd, bitand, |a, b| Term::and_all([a, b]));
define_ops_term!(BitOr, bitor, |a, b| Term::or_any([a, b]));
define_ops_term!(Add, add, |a, b| a.arith(b, i64::checked_add, TermNode::Add));
define_ops_term!(Sub, sub, |a, b| a.arith(b, i64::checked_sub, TermNode::Sub));
define_ops_term!(Mul, mul, |a, b| a.arith(b, i64::checked_mul, TermNode::Mul));

impl ops::Not for Term {
    type Output = Term;

    fn not(self) -> Term {
        self.negate()
    }
}

impl ops::Neg for Term {
    type Output = Term;

    fn neg(self) -> Term {
        Term::neg(self)
    }
}
