use hyterm::error::TermError;
use thiserror::Error;

use crate::point::{AgentId, PathId, ProgramPoint};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file '{file}': {source}")]
    ConfigParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Term(#[from] TermError),

    #[error("Backend '{0}' is not known")]
    UnknownBackend(String),

    #[error("Trace '{path}' is sealed and cannot record further events")]
    TraceSealed { path: PathId },

    #[error("Trace '{path}' received an event at {point} after an event at {previous}")]
    OutOfOrder {
        path: PathId,
        previous: ProgramPoint,
        point: ProgramPoint,
    },

    #[error("Trace '{path}' has the same path condition as trace '{existing}'")]
    DuplicateTrace { path: PathId, existing: PathId },

    #[error("Malformed event for trace '{path}': {reason}")]
    MalformedEvent { path: PathId, reason: String },

    #[error(
        "Backends disagree on obligation #{sequence} for agent '{agent}': \
         '{first}' says {first_verdict}, '{second}' says {second_verdict}; formula: {formula}"
    )]
    InconsistentVerdicts {
        sequence: u64,
        agent: AgentId,
        first: String,
        first_verdict: String,
        second: String,
        second_verdict: String,
        formula: String,
    },

    #[error("Verification worker panicked: {0}")]
    WorkerPanic(String),
}

pub type FlowResult<T> = Result<T, FlowError>;
