//! Epistemic noninterference verification over symbolic execution traces.
//!
//! A symbolic executor explores a program and streams [`ingest::Event`]s: branches,
//! declassifications, observations and terminations, grouped by path. The crate seals
//! them into [`trace::Trace`]s, pairs the traces that an agent may be able to tell
//! apart, and asks one or more decision backends whether the agent can distinguish
//! two runs that agree on everything it is allowed to know. The per-pair answers are
//! combined into one [`aggregate::Verdict`] per agent and written out as a
//! [`report::Report`].
//!
//! Pipeline
//!  - [`ingest`] turns the event stream into traces, isolating malformed paths.
//!  - [`index`] enumerates candidate pairs and prunes pairs that cannot disagree.
//!  - [`obligation`] builds the two-run formula of a pair.
//!  - [`dispatch`] decides obligations on a worker pool under time and count budgets.
//!  - [`aggregate`] and [`report`] fold the outcomes into verdicts and artifacts.
//!
//! [`session::Session`] wires the pipeline together from a [`utils::conf::SessionConfig`].

pub mod aggregate;
pub mod dispatch;
pub mod domain;
pub mod index;
pub mod ingest;
pub mod magic;
pub mod obligation;
pub mod point;
pub mod policy;
pub mod report;
pub mod session;
pub mod trace;
pub mod utils;

pub extern crate chrono;
pub extern crate hyterm;

pub mod prelude {
    //! Convenient re-exports for end users.
    pub use crate::aggregate::{AgentSummary, Counterexample, UnknownReason, Verdict};
    pub use crate::dispatch::{BackendVerdict, DecideContext, DecisionBackend, Dispatcher};
    pub use crate::domain::{InputDomain, InputDomains};
    pub use crate::ingest::{Event, EventLog, Ingestor, TraceSet};
    pub use crate::obligation::{AbsencePolicy, Obligation, ObligationGenerator};
    pub use crate::point::{AgentId, PathId, ProgramPoint};
    pub use crate::policy::{PolicySnapshot, PolicyStore};
    pub use crate::report::{Artifact, Report};
    pub use crate::session::{Session, verify};
    pub use crate::trace::{Trace, TraceStatus};
    pub use crate::utils::conf::SessionConfig;
    pub use crate::utils::error::{FlowError, FlowResult};
}
