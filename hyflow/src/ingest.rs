//! Ingest of explorer events into sealed traces.
//!
//! The explorer reports each path as a stream of [`Event`]s, in program order per path but
//! in any interleaving across paths. The [`Ingestor`] keeps one [`TraceBuilder`] per open
//! path and seals it on [`Event::Terminated`].
//!
//! Error handling
//! - Malformed or inconsistent events (unknown path, out-of-order point, fork from an unknown
//!   parent, ill-sorted term, duplicate path condition) invalidate the affected trace only.
//!   The trace is excluded from comparison, logged, and listed in [`TraceSet::invalid`].
//! - An event on a sealed path is a caller error and returns [`FlowError::TraceSealed`],
//!   except on paths sealed by the depth bound, whose remaining events are dropped.
//!
//! Event logs
//! - [`EventLog`] stores a replayable event sequence, in CBOR or in TOML. In TOML, terms are
//!   written in the textual syntax of [`hyterm::parser`] and parsed against the `[variables]`
//!   table:
//!
//! ```toml
//! [variables]
//! s = "int"
//!
//! [[event]]
//! kind = "branch"
//! path = "root"
//! point = { order = 1, site = "main:3" }
//! condition = "s > 0"
//!
//! [[event]]
//! kind = "observe"
//! path = "root"
//! agent = "E"
//! point = { order = 2, site = "main:4" }
//! value = "1"
//!
//! [[event]]
//! kind = "terminated"
//! path = "root"
//! status = "normal"
//! ```
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
    sync::Arc,
};

use hyterm::prelude::*;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    point::{AgentId, PathId, ProgramPoint},
    policy::{PolicySnapshot, PolicyStore},
    trace::{Trace, TraceStatus, builder::TraceBuilder},
    utils::error::{FlowError, FlowResult},
};

/// One explorer event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Take a branch. The first event of a new path must be a branch: with a `parent`, the
    /// path forks off the parent's history strictly before `point`.
    Branch {
        path: PathId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<PathId>,
        point: ProgramPoint,
        condition: Term,
    },
    Declassify {
        path: PathId,
        point: ProgramPoint,
        agent: AgentId,
        variables: Vec<String>,
    },
    Observe {
        path: PathId,
        agent: AgentId,
        value: Term,
        point: ProgramPoint,
    },
    Terminated {
        path: PathId,
        status: TraceStatus,
    },
}

impl Event {
    pub fn branch(path: impl Into<PathId>, point: ProgramPoint, condition: Term) -> Self {
        Event::Branch {
            path: path.into(),
            parent: None,
            point,
            condition,
        }
    }

    pub fn fork(
        path: impl Into<PathId>,
        parent: impl Into<PathId>,
        point: ProgramPoint,
        condition: Term,
    ) -> Self {
        Event::Branch {
            path: path.into(),
            parent: Some(parent.into()),
            point,
            condition,
        }
    }

    pub fn declassify<I, S>(
        path: impl Into<PathId>,
        point: ProgramPoint,
        agent: impl Into<AgentId>,
        variables: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Event::Declassify {
            path: path.into(),
            point,
            agent: agent.into(),
            variables: variables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn observe(
        path: impl Into<PathId>,
        agent: impl Into<AgentId>,
        value: Term,
        point: ProgramPoint,
    ) -> Self {
        Event::Observe {
            path: path.into(),
            agent: agent.into(),
            value,
            point,
        }
    }

    pub fn terminated(path: impl Into<PathId>, status: TraceStatus) -> Self {
        Event::Terminated {
            path: path.into(),
            status,
        }
    }

    pub fn path(&self) -> &PathId {
        match self {
            Event::Branch { path, .. }
            | Event::Declassify { path, .. }
            | Event::Observe { path, .. }
            | Event::Terminated { path, .. } => path,
        }
    }
}

/// A trace excluded from comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidTrace {
    pub path: PathId,
    pub reason: String,
}

/// Result of an ingest: the comparable traces and what was left out.
#[derive(Debug, Clone, Default)]
pub struct TraceSet {
    /// Sealed valid traces, ordered by ingest sequence then path identifier.
    pub traces: Vec<Arc<Trace>>,
    pub invalid: Vec<InvalidTrace>,
    /// Paths still open when ingest finished.
    pub unterminated: Vec<PathId>,
}

impl TraceSet {
    /// Traces sealed by the depth bound.
    pub fn bounded(&self) -> impl Iterator<Item = &Arc<Trace>> {
        self.traces
            .iter()
            .filter(|trace| trace.status.is_bound_reached())
    }

    /// Why the trace set may not cover every execution, if it may not.
    pub fn incompleteness(&self) -> Option<String> {
        let mut reasons = Vec::new();
        if !self.invalid.is_empty() {
            reasons.push(format!("{} invalid trace(s)", self.invalid.len()));
        }
        if !self.unterminated.is_empty() {
            reasons.push(format!("{} unterminated path(s)", self.unterminated.len()));
        }
        let bounded = self.bounded().count();
        if bounded > 0 {
            reasons.push(format!("{bounded} path(s) cut at the depth bound"));
        }
        (!reasons.is_empty()).then(|| reasons.join(", "))
    }

    /// Agents observing in at least one trace.
    pub fn observers(&self) -> BTreeSet<AgentId> {
        self.traces
            .iter()
            .flat_map(|trace| trace.observers().cloned())
            .collect()
    }
}

#[derive(Debug)]
enum PathState {
    Open(Box<TraceBuilder>),
    Sealed(Arc<Trace>),
    Invalid(String),
}

/// Assembles explorer events into traces.
#[derive(Debug)]
pub struct Ingestor {
    root_policy: PolicyStore,
    max_depth: Option<usize>,
    paths: BTreeMap<PathId, PathState>,
    sealed_conditions: HashMap<Term, PathId>,
    events: u64,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(PolicySnapshot::new())
    }
}

impl Ingestor {
    /// Every root path starts with `initial` visibility.
    pub fn new(initial: PolicySnapshot) -> Self {
        Self {
            root_policy: PolicyStore::seeded(initial),
            max_depth: None,
            paths: BTreeMap::new(),
            sealed_conditions: HashMap::new(),
            events: 0,
        }
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Number of events ingested so far.
    pub fn event_count(&self) -> u64 {
        self.events
    }

    pub fn ingest_all(&mut self, events: impl IntoIterator<Item = Event>) -> FlowResult<()> {
        events.into_iter().try_for_each(|event| self.ingest(event))
    }

    /// Apply one event. Only events on sealed paths are reported as errors; every other
    /// inconsistency invalidates the affected trace.
    pub fn ingest(&mut self, event: Event) -> FlowResult<()> {
        let sequence = self.events;
        self.events += 1;

        match event {
            Event::Branch {
                path,
                parent,
                point,
                condition,
            } => {
                if !self.paths.contains_key(&path) {
                    self.open(path.clone(), parent.as_ref(), &point, sequence);
                }
                let max_depth = self.max_depth;
                let bound_hit = match self.paths.get(&path) {
                    Some(PathState::Open(builder)) => {
                        max_depth.is_some_and(|max| builder.depth() >= max && !condition.is_true())
                    }
                    _ => false,
                };
                if bound_hit {
                    warn!("[{path}] depth bound reached at {point}, sealing");
                    return self.seal(&path, TraceStatus::BoundReached);
                }
                self.apply(&path, |builder| builder.branch(point, condition))
            }
            Event::Declassify {
                path,
                point,
                agent,
                variables,
            } => self.apply(&path, |builder| builder.declassify(point, &agent, variables)),
            Event::Observe {
                path,
                agent,
                value,
                point,
            } => self.apply(&path, |builder| builder.observe(agent, value, point)),
            Event::Terminated { path, status } => self.seal(&path, status),
        }
    }

    fn open(&mut self, path: PathId, parent: Option<&PathId>, point: &ProgramPoint, sequence: u64) {
        let state = match parent {
            None => {
                debug!("[{path}] new root path (#{sequence})");
                PathState::Open(Box::new(TraceBuilder::new(
                    path.clone(),
                    sequence,
                    self.root_policy.clone(),
                )))
            }
            Some(parent) => {
                let prefix = match self.paths.get(parent) {
                    Some(PathState::Open(builder)) => Ok(builder.prefix()),
                    Some(PathState::Sealed(trace)) => Ok(trace.prefix()),
                    Some(PathState::Invalid(_)) => {
                        Err(format!("forked from invalid path '{parent}'"))
                    }
                    None => Err(format!("forked from unknown path '{parent}'")),
                };
                match prefix {
                    Ok(prefix) => {
                        debug!("[{path}] forked from '{parent}' at {point} (#{sequence})");
                        PathState::Open(Box::new(TraceBuilder::fork(
                            prefix,
                            path.clone(),
                            sequence,
                            point,
                        )))
                    }
                    Err(reason) => {
                        warn!("[{path}] invalid: {reason}");
                        PathState::Invalid(reason)
                    }
                }
            }
        };
        self.paths.insert(path, state);
    }

    fn invalidate(&mut self, path: &PathId, reason: String) {
        warn!("[{path}] invalid: {reason}");
        self.paths.insert(path.clone(), PathState::Invalid(reason));
    }

    fn apply(
        &mut self,
        path: &PathId,
        f: impl FnOnce(&mut TraceBuilder) -> FlowResult<()>,
    ) -> FlowResult<()> {
        match self.paths.get_mut(path) {
            None => {
                self.invalidate(path, "event on unknown path".to_string());
                Ok(())
            }
            Some(PathState::Invalid(_)) => {
                trace!("[{path}] dropping event on invalid path");
                Ok(())
            }
            Some(PathState::Sealed(trace)) if trace.status.is_bound_reached() => {
                warn!("[{path}] ignoring event past the depth bound");
                Ok(())
            }
            Some(PathState::Sealed(_)) => Err(FlowError::TraceSealed { path: path.clone() }),
            Some(PathState::Open(builder)) => match f(builder.as_mut()) {
                Ok(()) => Ok(()),
                Err(err @ FlowError::TraceSealed { .. }) => Err(err),
                Err(err) => {
                    self.invalidate(path, err.to_string());
                    Ok(())
                }
            },
        }
    }

    fn seal(&mut self, path: &PathId, status: TraceStatus) -> FlowResult<()> {
        let trace = match self.paths.get_mut(path) {
            Some(PathState::Open(builder)) => builder.seal(status)?,
            Some(PathState::Sealed(trace)) if trace.status.is_bound_reached() => {
                trace!("[{path}] already sealed at the depth bound");
                return Ok(());
            }
            Some(PathState::Sealed(_)) => {
                return Err(FlowError::TraceSealed { path: path.clone() });
            }
            Some(PathState::Invalid(_)) => return Ok(()),
            None => {
                self.invalidate(path, "termination of unknown path".to_string());
                return Ok(());
            }
        };

        if let Some(existing) = self.sealed_conditions.get(&trace.path_condition) {
            let err = FlowError::DuplicateTrace {
                path: path.clone(),
                existing: existing.clone(),
            };
            self.invalidate(path, err.to_string());
            return Ok(());
        }

        debug!(
            "[{path}] sealed ({}) with {} observation(s)",
            trace.status,
            trace.entries.len()
        );
        self.sealed_conditions
            .insert(trace.path_condition.clone(), path.clone());
        self.paths
            .insert(path.clone(), PathState::Sealed(Arc::new(trace)));
        Ok(())
    }

    /// Stop ingesting and hand out the trace set.
    pub fn finish(self) -> TraceSet {
        let mut set = TraceSet::default();
        for (path, state) in self.paths {
            match state {
                PathState::Sealed(trace) => set.traces.push(trace),
                PathState::Invalid(reason) => set.invalid.push(InvalidTrace { path, reason }),
                PathState::Open(_) => {
                    warn!("[{path}] never terminated");
                    set.unterminated.push(path);
                }
            }
        }
        set.traces
            .sort_by(|a, b| (a.sequence, &a.path).cmp(&(b.sequence, &b.path)));
        set
    }
}

/// Textual form of an event, with terms as source strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawEvent {
    Branch {
        path: PathId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<PathId>,
        point: ProgramPoint,
        condition: String,
    },
    Declassify {
        path: PathId,
        point: ProgramPoint,
        agent: AgentId,
        variables: Vec<String>,
    },
    Observe {
        path: PathId,
        agent: AgentId,
        point: ProgramPoint,
        value: String,
    },
    Terminated {
        path: PathId,
        status: TraceStatus,
    },
}

impl RawEvent {
    fn resolve(self, signature: &Signature) -> FlowResult<Event> {
        Ok(match self {
            RawEvent::Branch {
                path,
                parent,
                point,
                condition,
            } => Event::Branch {
                path,
                parent,
                point,
                condition: parse_term(&condition, signature)?,
            },
            RawEvent::Declassify {
                path,
                point,
                agent,
                variables,
            } => Event::Declassify {
                path,
                point,
                agent,
                variables,
            },
            RawEvent::Observe {
                path,
                agent,
                point,
                value,
            } => Event::Observe {
                path,
                agent,
                value: parse_term(&value, signature)?,
                point,
            },
            RawEvent::Terminated { path, status } => Event::Terminated { path, status },
        })
    }

    fn from_event(event: &Event) -> Self {
        match event.clone() {
            Event::Branch {
                path,
                parent,
                point,
                condition,
            } => RawEvent::Branch {
                path,
                parent,
                point,
                condition: condition.pretty_string(),
            },
            Event::Declassify {
                path,
                point,
                agent,
                variables,
            } => RawEvent::Declassify {
                path,
                point,
                agent,
                variables,
            },
            Event::Observe {
                path,
                agent,
                value,
                point,
            } => RawEvent::Observe {
                path,
                agent,
                point,
                value: value.pretty_string(),
            },
            Event::Terminated { path, status } => RawEvent::Terminated { path, status },
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawEventLog {
    #[serde(default)]
    variables: Signature,
    #[serde(default, rename = "event")]
    events: Vec<RawEvent>,
}

/// A replayable sequence of explorer events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub events: Vec<Event>,
}

impl EventLog {
    /// Parse a TOML event log. Identifiers resolve against its `[variables]` table first,
    /// then against `signature`.
    pub fn from_toml_str(text: &str, signature: &Signature) -> FlowResult<Self> {
        let raw: RawEventLog = toml::from_str(text).map_err(|e| FlowError::ConfigParseError {
            source: e,
            file: "<event log>".to_string(),
        })?;
        let mut merged = signature.clone();
        for variable in raw.variables.variables() {
            merged.declare(&variable.name, variable.sort);
        }
        let events = raw
            .events
            .into_iter()
            .map(|event| event.resolve(&merged))
            .collect::<FlowResult<Vec<_>>>()?;
        Ok(Self { events })
    }

    pub fn load_from_toml(path: &Path, signature: &Signature) -> FlowResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text, signature).map_err(|err| match err {
            FlowError::ConfigParseError { source, .. } => FlowError::ConfigParseError {
                source,
                file: path.display().to_string(),
            },
            other => other,
        })
    }

    /// Render as TOML, declaring every variable the events mention.
    pub fn to_toml_string(&self) -> FlowResult<String> {
        let mut variables = BTreeSet::new();
        for event in &self.events {
            match event {
                Event::Branch { condition, .. } => variables.extend(condition.variables()),
                Event::Observe { value, .. } => variables.extend(value.variables()),
                _ => {}
            }
        }
        let raw = RawEventLog {
            variables: variables.into_iter().collect(),
            events: self.events.iter().map(RawEvent::from_event).collect(),
        };
        toml::to_string(&raw).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    pub fn to_cbor(&self) -> FlowResult<Vec<u8>> {
        serde_cbor::to_vec(self).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    pub fn from_cbor(data: &[u8]) -> FlowResult<Self> {
        serde_cbor::from_slice(data).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    /// Load a log, choosing the encoding from the file extension (`.cbor` or TOML).
    pub fn load(path: &Path, signature: &Signature) -> FlowResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("cbor") => Self::from_cbor(&std::fs::read(path)?),
            _ => Self::load_from_toml(path, signature),
        }
    }
}
