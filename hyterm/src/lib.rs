//! Hyterm: symbolic terms and formulas for relational (two-run) reasoning.
//!
//! This crate exposes one small term language that covers program values
//! (integers, booleans, strings), arithmetic, comparisons and propositional
//! logic. It is the vocabulary in which path conditions, observed values and
//! indistinguishability obligations are written.
//!
//! Two-run reasoning
//!  - Every [`variable::Variable`] carries a [`variable::Side`]. Traces are written over
//!    `Base` variables; an obligation renames one trace to `Left` and the other
//!    to `Right` (see [`term::Term::on_side`]) so both runs live in a single formula.
//!
//! Sharing
//!  - A [`term::Term`] is a cheap-to-clone handle (`Arc`) to an immutable node; sub-terms
//!    are shared between traces and obligations without copying.
//!
//! Example
//! ```
//! use hyterm::prelude::*;
//!
//! let s = Variable::new("s", Sort::Int);
//! let pc = Term::var(s.clone()).gt(Term::int(0));
//! let left = pc.on_side(Side::Left);
//! assert_eq!(left.pretty_string(), "0 < s#1");
//! ```

/// Errors raised while building, checking or evaluating terms.
pub mod error;
/// Concrete evaluation of terms under an assignment.
pub mod eval;
/// Textual term syntax, parsed with chumsky.
pub mod parser;
/// Width-aware, optionally colored pretty printing.
pub mod pretty;
/// SMT-LIB2 rendering of sorts, values and terms.
pub mod smtlib;
/// Sorts and concrete values.
pub mod sort;
/// Term nodes, builders and structural operations.
pub mod term;
/// Input variables and run sides.
pub mod variable;

pub mod prelude {
    //! Convenient re-exports for end users.
    pub use crate::error::{TermError, TermResult};
    pub use crate::eval::Assignment;
    pub use crate::parser::{Signature, parse_term};
    pub use crate::pretty::PrettyTerm;
    pub use crate::sort::{Sort, Value};
    pub use crate::term::{Term, TermNode, TermType};
    pub use crate::variable::{Side, Variable};
}
