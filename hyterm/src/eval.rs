//! Concrete evaluation of terms under an assignment.
//!
//! Evaluation is strict except for the short-circuiting connectives (`&&`, `||`,
//! `=>`, `ite`), which only evaluate the operands they need. Integer arithmetic
//! is checked: leaving the 64-bit range is an error, never a wrap-around.
use std::collections::BTreeMap;

use crate::{
    error::{TermError, TermResult},
    sort::{Sort, Value},
    term::{Term, TermNode},
    variable::Variable,
};

/// A (partial) valuation of variables.
pub type Assignment = BTreeMap<Variable, Value>;

fn as_bool(operator: &'static str, value: Value) -> TermResult<bool> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(TermError::SortMismatch {
            operator,
            expected: Sort::Bool,
            found: other.sort(),
        }),
    }
}

fn as_int(operator: &'static str, value: Value) -> TermResult<i64> {
    match value {
        Value::Int(i) => Ok(i),
        other => Err(TermError::SortMismatch {
            operator,
            expected: Sort::Int,
            found: other.sort(),
        }),
    }
}

impl Term {
    /// Evaluate this term under `assignment`.
    pub fn evaluate(&self, assignment: &Assignment) -> TermResult<Value> {
        use TermNode::*;
        match self.node() {
            Const(v) => Ok(v.clone()),
            Var(v) => assignment
                .get(v)
                .cloned()
                .ok_or_else(|| TermError::UnboundVariable(v.to_string())),
            Not(a) => Ok(Value::Bool(!as_bool("!", a.evaluate(assignment)?)?)),
            And(items) => {
                for item in items {
                    if !as_bool("&&", item.evaluate(assignment)?)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Or(items) => {
                for item in items {
                    if as_bool("||", item.evaluate(assignment)?)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Implies(a, b) => {
                if !as_bool("=>", a.evaluate(assignment)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_bool("=>", b.evaluate(assignment)?)?))
            }
            Eq(a, b) => {
                let (lhs, rhs) = (a.evaluate(assignment)?, b.evaluate(assignment)?);
                if lhs.sort() != rhs.sort() {
                    return Err(TermError::HeterogeneousOperands {
                        operator: "==",
                        lhs: lhs.sort(),
                        rhs: rhs.sort(),
                    });
                }
                Ok(Value::Bool(lhs == rhs))
            }
            Lt(a, b) => {
                let lhs = as_int("<", a.evaluate(assignment)?)?;
                let rhs = as_int("<", b.evaluate(assignment)?)?;
                Ok(Value::Bool(lhs < rhs))
            }
            Le(a, b) => {
                let lhs = as_int("<=", a.evaluate(assignment)?)?;
                let rhs = as_int("<=", b.evaluate(assignment)?)?;
                Ok(Value::Bool(lhs <= rhs))
            }
            Add(a, b) => {
                let lhs = as_int("+", a.evaluate(assignment)?)?;
                let rhs = as_int("+", b.evaluate(assignment)?)?;
                lhs.checked_add(rhs)
                    .map(Value::Int)
                    .ok_or(TermError::Overflow("+"))
            }
            Sub(a, b) => {
                let lhs = as_int("-", a.evaluate(assignment)?)?;
                let rhs = as_int("-", b.evaluate(assignment)?)?;
                lhs.checked_sub(rhs)
                    .map(Value::Int)
                    .ok_or(TermError::Overflow("-"))
            }
            Mul(a, b) => {
                let lhs = as_int("*", a.evaluate(assignment)?)?;
                let rhs = as_int("*", b.evaluate(assignment)?)?;
                lhs.checked_mul(rhs)
                    .map(Value::Int)
                    .ok_or(TermError::Overflow("*"))
            }
            Neg(a) => as_int("-", a.evaluate(assignment)?)?
                .checked_neg()
                .map(Value::Int)
                .ok_or(TermError::Overflow("-")),
            Ite(c, t, e) => {
                if as_bool("ite", c.evaluate(assignment)?)? {
                    t.evaluate(assignment)
                } else {
                    e.evaluate(assignment)
                }
            }
        }
    }

    /// Evaluate a boolean term; a non-boolean result is a sort error.
    pub fn holds(&self, assignment: &Assignment) -> TermResult<bool> {
        as_bool("holds", self.evaluate(assignment)?)
    }
}
