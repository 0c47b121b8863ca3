use strum::{EnumIs, EnumTryAs};
use thiserror::Error;

use crate::sort::Sort;

#[derive(Debug, Clone, PartialEq, Eq, EnumIs, EnumTryAs, Error)]
pub enum TermError {
    /// An operator received an operand of the wrong sort.
    #[error("Operator `{operator}` expects operands of sort {expected}, but found sort {found}.")]
    SortMismatch {
        operator: &'static str,
        expected: Sort,
        found: Sort,
    },

    /// Both sides of an equality or the branches of an `ite` disagree on their sort.
    #[error("Operands of `{operator}` must share a sort, found {lhs} and {rhs}.")]
    HeterogeneousOperands {
        operator: &'static str,
        lhs: Sort,
        rhs: Sort,
    },

    /// Evaluation reached a variable that the assignment does not bind.
    #[error("Variable `{0}` is not bound by the assignment.")]
    UnboundVariable(String),

    /// Integer arithmetic left the 64-bit signed range.
    #[error("Integer overflow while evaluating `{0}`.")]
    Overflow(&'static str),

    /// The textual syntax referenced a variable that the signature does not declare.
    #[error("Variable `{0}` is not declared in the signature.")]
    UndeclaredVariable(String),

    /// The textual syntax could not be parsed.
    #[error("Failed to parse term `{source_text}`: {}", .diagnostics.join("; "))]
    Parse {
        source_text: String,
        diagnostics: Vec<String>,
    },
}

pub type TermResult<T> = Result<T, TermError>;
