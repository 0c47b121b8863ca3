//! Append-only store of the observations of one in-progress trace.
use std::sync::Arc;

use hyterm::prelude::*;
use log::trace;

use crate::{
    point::{AgentId, PathId, ProgramPoint},
    policy::PolicySnapshot,
    trace::{Observation, TraceEntry},
    utils::error::{FlowError, FlowResult},
};

/// Observation list of one path, in emission order.
///
/// There is no deduplication: recording the same observation twice yields two entries.
/// Once sealed, every further [`ObservationRecorder::record`] fails with
/// [`FlowError::TraceSealed`].
#[derive(Debug, Clone)]
pub struct ObservationRecorder {
    path: PathId,
    entries: Vec<TraceEntry>,
    sealed: bool,
}

impl ObservationRecorder {
    pub fn new(path: PathId) -> Self {
        Self {
            path,
            entries: Vec::new(),
            sealed: false,
        }
    }

    /// Recorder pre-filled with the entries of a parent prefix.
    pub fn with_prefix(path: PathId, entries: Vec<TraceEntry>) -> Self {
        Self {
            path,
            entries,
            sealed: false,
        }
    }

    /// Append an observation made under `policy`.
    pub fn record(
        &mut self,
        policy: Arc<PolicySnapshot>,
        agent: AgentId,
        value: Term,
        point: ProgramPoint,
        path_condition: Term,
    ) -> FlowResult<()> {
        if self.sealed {
            return Err(FlowError::TraceSealed {
                path: self.path.clone(),
            });
        }

        trace!("[{}] observe {agent} <- {value} at {point}", self.path);
        self.entries.push(TraceEntry {
            policy,
            observation: Observation {
                agent,
                value,
                point,
                path_condition,
            },
        });
        Ok(())
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Stop accepting observations and hand out the recorded entries.
    pub fn seal(&mut self) -> FlowResult<Vec<TraceEntry>> {
        if self.sealed {
            return Err(FlowError::TraceSealed {
                path: self.path.clone(),
            });
        }
        self.sealed = true;
        Ok(std::mem::take(&mut self.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_observations_are_kept() {
        let mut recorder = ObservationRecorder::new(PathId::from("p"));
        let policy = Arc::new(PolicySnapshot::new());
        for _ in 0..2 {
            recorder
                .record(
                    policy.clone(),
                    AgentId::from("E"),
                    Term::int(1),
                    ProgramPoint::new(1, "out"),
                    Term::bool(true),
                )
                .unwrap();
        }
        assert_eq!(recorder.entries().len(), 2);
    }

    #[test]
    fn recording_after_seal_fails() {
        let mut recorder = ObservationRecorder::new(PathId::from("p"));
        assert!(recorder.seal().unwrap().is_empty());
        let err = recorder
            .record(
                Arc::new(PolicySnapshot::new()),
                AgentId::from("E"),
                Term::int(1),
                ProgramPoint::new(1, "out"),
                Term::bool(true),
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::TraceSealed { .. }));
        assert!(recorder.seal().is_err());
    }
}
