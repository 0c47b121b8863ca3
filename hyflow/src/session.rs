//! A verification session: ingest, pair, dispatch, aggregate, report.
//!
//! ```
//! use hyflow::prelude::*;
//! use hyterm::prelude::*;
//!
//! let s = Term::var(Variable::new("s", Sort::Int));
//! let config = SessionConfig::from_toml_str(
//!     r#"
//!     [inputs.s]
//!     sort = "int"
//!     range = [-4, 4]
//!     "#,
//! )
//! .unwrap();
//!
//! let mut session = Session::new(config).unwrap();
//! session
//!     .ingest_all([
//!         Event::branch("then", ProgramPoint::new(1, "if"), s.clone().gt(Term::int(0))),
//!         Event::fork("else", "then", ProgramPoint::new(1, "if"), s.le(Term::int(0))),
//!         Event::observe("then", "E", Term::int(1), ProgramPoint::new(2, "print")),
//!         Event::observe("else", "E", Term::int(0), ProgramPoint::new(2, "print")),
//!         Event::terminated("then", TraceStatus::Normal),
//!         Event::terminated("else", TraceStatus::Normal),
//!     ])
//!     .unwrap();
//!
//! let report = session.run().unwrap();
//! assert!(report.verdict(&AgentId::from("E")).unwrap().is_insecure());
//! ```
use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};

use hyterm::prelude::*;
use log::{info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    aggregate::Aggregator,
    dispatch::{DecisionBackend, Dispatcher, epistemic::EpistemicBackend, smtlib::SmtlibBackend},
    index::EquivalenceIndex,
    ingest::{Event, EventLog, Ingestor},
    magic::{BACKEND_EPISTEMIC, BACKEND_SMTLIB},
    obligation::ObligationGenerator,
    point::AgentId,
    report::{Artifact, ObligationDump, Report, SessionStatistics},
    utils::{
        conf::SessionConfig,
        error::{FlowError, FlowResult},
    },
};

pub struct Session {
    id: Uuid,
    config: SessionConfig,
    ingestor: Ingestor,
    backends: Vec<Arc<dyn DecisionBackend>>,
}

impl Session {
    /// Session with the backends named in `config.backends`.
    pub fn new(config: SessionConfig) -> FlowResult<Self> {
        config.validate()?;
        let backends = config
            .backends
            .iter()
            .map(|name| -> FlowResult<Arc<dyn DecisionBackend>> {
                match name.as_str() {
                    BACKEND_EPISTEMIC => Ok(Arc::new(EpistemicBackend::new(
                        config.inputs.clone(),
                        config.epistemic.max_worlds,
                    ))),
                    BACKEND_SMTLIB => Ok(Arc::new(SmtlibBackend::new(&config.smtlib))),
                    other => Err(FlowError::UnknownBackend(other.to_string())),
                }
            })
            .collect::<FlowResult<Vec<_>>>()?;

        let ingestor = Ingestor::new(config.initial_policy()).with_max_depth(config.max_depth);
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            ingestor,
            backends,
        })
    }

    /// Replace the configured backends.
    pub fn with_backends(mut self, backends: Vec<Arc<dyn DecisionBackend>>) -> Self {
        self.backends = backends;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Signature of the declared inputs, for parsing event logs.
    pub fn signature(&self) -> Signature {
        self.config.inputs.signature()
    }

    pub fn ingest(&mut self, event: Event) -> FlowResult<()> {
        self.ingestor.ingest(event)
    }

    pub fn ingest_all(&mut self, events: impl IntoIterator<Item = Event>) -> FlowResult<()> {
        self.ingestor.ingest_all(events)
    }

    pub fn ingest_log(&mut self, log: EventLog) -> FlowResult<()> {
        self.ingestor.ingest_all(log.events)
    }

    /// Seal the ingest and decide every agent.
    pub fn run(self) -> FlowResult<Report> {
        let started = Instant::now();
        let Session {
            id,
            config,
            ingestor,
            backends,
        } = self;

        let events = ingestor.event_count();
        let set = ingestor.finish();
        let incompleteness = set.incompleteness();
        if let Some(reason) = &incompleteness {
            warn!("trace set is incomplete: {reason}; no agent can be reported secure");
        }

        let index = EquivalenceIndex::new(set.traces.iter().cloned());
        let agents: BTreeSet<AgentId> = config
            .agents
            .keys()
            .cloned()
            .chain(set.observers())
            .collect();
        info!(
            "session {id}: {} trace(s), {} agent(s), {} pair(s) per agent",
            index.traces().len(),
            agents.len(),
            index.pair_count()
        );

        let dispatcher = Dispatcher::new(backends)
            .with_max_workers(config.max_workers)
            .with_pair_timeout(Duration::from_millis(config.pair_timeout_ms))
            .with_session_deadline(
                config
                    .session_timeout_ms
                    .map(|ms| started + Duration::from_millis(ms)),
            )
            .with_max_obligations(config.max_obligations);

        let generator = ObligationGenerator::new(&config.inputs, config.absence);
        let keep_dumps =
            config.output_dir.is_some() && config.artifacts.contains(&Artifact::Obligations);
        let dumps: Mutex<Vec<ObligationDump>> = Mutex::new(Vec::new());
        let obligations = agents
            .iter()
            .flat_map(|agent| index.candidates_for(agent))
            .map(|candidate| {
                let obligation = generator.generate(&candidate);
                if keep_dumps {
                    dumps.lock().push(ObligationDump {
                        agent: obligation.agent.clone(),
                        sequence: obligation.sequence,
                        script: obligation.render_smtlib(),
                    });
                }
                obligation
            });

        let mut aggregator = Aggregator::new();
        for agent in &agents {
            aggregator.register(agent);
        }
        let mut decided = 0u64;
        dispatcher.run(obligations, |outcome| {
            decided += 1;
            aggregator.record(&outcome.agent, outcome.sequence, outcome.verdict);
        })?;

        let summaries = aggregator.finish(incompleteness.as_deref());
        for (agent, summary) in &summaries {
            info!("agent {agent}: {}", summary.verdict);
        }

        let statistics = SessionStatistics {
            events,
            traces: set.traces.len() as u64,
            bounded_traces: set.bounded().count() as u64,
            invalid_traces: set.invalid.clone(),
            unterminated: set.unterminated.clone(),
            pairs: index.pair_count(),
            obligations: decided,
            backends: dispatcher.backend_names(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            dispatch: dispatcher.stats(),
        };
        let report = Report::new(id, summaries, statistics);

        if let Some(dir) = &config.output_dir {
            report.write_artifacts(dir, &config.artifacts, &dumps.into_inner())?;
        }
        Ok(report)
    }
}

/// Run a whole session over `events`.
pub fn verify(
    config: SessionConfig,
    events: impl IntoIterator<Item = Event>,
) -> FlowResult<Report> {
    let mut session = Session::new(config)?;
    session.ingest_all(events)?;
    session.run()
}
