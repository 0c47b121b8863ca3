//! Verification report and on-disk artifacts.
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use strum::EnumIs;
use uuid::Uuid;

use crate::{
    aggregate::{AgentSummary, Verdict},
    dispatch::DispatchStats,
    ingest::InvalidTrace,
    magic::{
        COUNTEREXAMPLES_FILE, OBLIGATIONS_DIR, REPORT_CBOR_FILE, REPORT_FORMAT_VERSION,
        REPORT_TOML_FILE,
    },
    point::{AgentId, PathId},
    utils::error::{FlowError, FlowResult},
};

/// Files a session can write to its output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIs, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    /// The report as TOML.
    Report,
    /// The report as CBOR.
    Cbor,
    /// One SMT-LIB2 script per obligation.
    Obligations,
    /// Human-readable counterexamples of insecure agents.
    Counterexamples,
}

/// Rendered obligation kept for the [`Artifact::Obligations`] dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationDump {
    pub agent: AgentId,
    pub sequence: u64,
    pub script: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub events: u64,
    pub traces: u64,
    pub bounded_traces: u64,
    pub invalid_traces: Vec<InvalidTrace>,
    pub unterminated: Vec<PathId>,
    /// Unordered trace pairs, per agent.
    pub pairs: u64,
    /// Pairs that reached the dispatcher, over all agents.
    pub obligations: u64,
    pub backends: Vec<String>,
    pub elapsed_ms: u64,
    pub dispatch: DispatchStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub session: Uuid,
    pub created: DateTime<Utc>,
    pub format_version: semver::Version,
    pub agents: BTreeMap<AgentId, AgentSummary>,
    pub statistics: SessionStatistics,
}

impl Report {
    pub fn new(
        session: Uuid,
        agents: BTreeMap<AgentId, AgentSummary>,
        statistics: SessionStatistics,
    ) -> Self {
        Self {
            session,
            created: Utc::now(),
            format_version: semver::Version::parse(REPORT_FORMAT_VERSION)
                .unwrap_or_else(|_| semver::Version::new(1, 0, 0)),
            agents,
            statistics,
        }
    }

    pub fn verdict(&self, agent: &AgentId) -> Option<&Verdict> {
        self.agents.get(agent).map(|summary| &summary.verdict)
    }

    /// Every agent is secure.
    pub fn is_secure(&self) -> bool {
        self.agents.values().all(|s| s.verdict.is_secure())
    }

    pub fn to_toml_string(&self) -> FlowResult<String> {
        toml::to_string(self).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    pub fn from_toml_str(text: &str) -> FlowResult<Self> {
        toml::from_str(text).map_err(|e| FlowError::ConfigParseError {
            source: e,
            file: "<report>".to_string(),
        })
    }

    pub fn to_cbor(&self) -> FlowResult<Vec<u8>> {
        serde_cbor::to_vec(self).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    pub fn from_cbor(data: &[u8]) -> FlowResult<Self> {
        serde_cbor::from_slice(data).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    /// Counterexamples of every insecure agent, as text.
    pub fn counterexamples(&self) -> String {
        let mut out = String::new();
        for (agent, summary) in &self.agents {
            if let Verdict::Insecure(cex) = &summary.verdict {
                out.push_str(&format!("agent {agent}\n{cex}\n"));
            }
        }
        out
    }

    /// Write the selected `artifacts` under `dir` and return the paths written.
    pub fn write_artifacts(
        &self,
        dir: &Path,
        artifacts: &[Artifact],
        obligations: &[ObligationDump],
    ) -> FlowResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for artifact in artifacts {
            match artifact {
                Artifact::Report => {
                    let path = dir.join(REPORT_TOML_FILE);
                    std::fs::write(&path, self.to_toml_string()?)?;
                    written.push(path);
                }
                Artifact::Cbor => {
                    let path = dir.join(REPORT_CBOR_FILE);
                    std::fs::write(&path, self.to_cbor()?)?;
                    written.push(path);
                }
                Artifact::Counterexamples => {
                    let path = dir.join(COUNTEREXAMPLES_FILE);
                    std::fs::write(&path, self.counterexamples())?;
                    written.push(path);
                }
                Artifact::Obligations => {
                    let sub = dir.join(OBLIGATIONS_DIR);
                    std::fs::create_dir_all(&sub)?;
                    for dump in obligations {
                        let name = format!("{}-{:06}.smt2", dump.agent.file_stem(), dump.sequence);
                        let path = sub.join(name);
                        std::fs::write(&path, &dump.script)?;
                        written.push(path);
                    }
                }
            }
        }
        info!("wrote {} artifact file(s) to {}", written.len(), dir.display());
        Ok(written)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.statistics;
        writeln!(
            f,
            "session {} ({})",
            self.session,
            self.created.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            f,
            "{} trace(s), {} invalid, {} unterminated, {} bound-reached; {} obligation(s) in {} ms",
            stats.traces,
            stats.invalid_traces.len(),
            stats.unterminated.len(),
            stats.bounded_traces,
            stats.obligations,
            stats.elapsed_ms
        )?;
        for invalid in &stats.invalid_traces {
            writeln!(f, "  invalid trace '{}': {}", invalid.path, invalid.reason)?;
        }
        for (agent, summary) in &self.agents {
            writeln!(
                f,
                "agent {agent}: {} [{} pair(s): {} secure, {} insecure, {} unknown]",
                summary.verdict,
                summary.pairs,
                summary.secure_pairs,
                summary.insecure_pairs,
                summary.unknown_pairs
            )?;
            if let Verdict::Insecure(cex) = &summary.verdict {
                write!(f, "{cex}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        aggregate::{Counterexample, DifferingObservation, UnknownReason},
        point::ProgramPoint,
    };
    use hyterm::prelude::Value;

    fn sample() -> Report {
        let mut agents = BTreeMap::new();
        agents.insert(
            AgentId::from("E"),
            AgentSummary {
                verdict: Verdict::Insecure(Box::new(Counterexample {
                    sequence: 0,
                    left_path: PathId::from("a"),
                    right_path: PathId::from("b"),
                    left_condition: "0 < s".into(),
                    right_condition: "s <= 0".into(),
                    differing: Some(DifferingObservation {
                        point: ProgramPoint::new(2, "out"),
                        occurrence: 0,
                        left: Some("1".into()),
                        right: Some("0".into()),
                        left_value: Some(Value::Int(1)),
                        right_value: Some(Value::Int(0)),
                    }),
                    witness: Some(
                        [("s#1".to_string(), Value::Int(1)), ("s#2".to_string(), Value::Int(0))]
                            .into_iter()
                            .collect(),
                    ),
                })),
                pairs: 1,
                secure_pairs: 0,
                insecure_pairs: 1,
                unknown_pairs: 0,
            },
        );
        agents.insert(
            AgentId::from("F"),
            AgentSummary {
                verdict: Verdict::Unknown(UnknownReason::Timeout),
                pairs: 1,
                secure_pairs: 0,
                insecure_pairs: 0,
                unknown_pairs: 1,
            },
        );
        Report::new(Uuid::new_v4(), agents, SessionStatistics::default())
    }

    #[test]
    fn toml_and_cbor_preserve_the_report() {
        let report = sample();
        let text = report.to_toml_string().unwrap();
        assert!(text.contains("status = \"insecure\""));
        assert_eq!(Report::from_toml_str(&text).unwrap(), report);
        assert_eq!(Report::from_cbor(&report.to_cbor().unwrap()).unwrap(), report);
    }

    #[test]
    fn display_names_the_differing_point() {
        let text = sample().to_string();
        assert!(text.contains("agent E: insecure"));
        assert!(text.contains("differs at out@2"));
        assert!(text.contains("agent F: unknown (timeout)"));
        assert!(!sample().is_secure());
    }

    #[test]
    fn writes_selected_artifacts() {
        let dir = std::env::temp_dir().join(format!("hyflow-report-{}", Uuid::new_v4()));
        let dumps = [ObligationDump {
            agent: AgentId::from("E"),
            sequence: 3,
            script: "(check-sat)".into(),
        }];
        let written = sample()
            .write_artifacts(
                &dir,
                &[Artifact::Report, Artifact::Obligations, Artifact::Counterexamples],
                &dumps,
            )
            .unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.join("obligations").join("E-000003.smt2").exists());
        let cex = std::fs::read_to_string(dir.join(COUNTEREXAMPLES_FILE)).unwrap();
        assert!(cex.contains("s#1 = 1"));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn obligation_files_escape_agent_names() {
        let dir = std::env::temp_dir().join(format!("hyflow-report-{}", Uuid::new_v4()));
        let dumps = ["a/b", "../x"].map(|agent| ObligationDump {
            agent: AgentId::from(agent),
            sequence: 0,
            script: "(check-sat)".into(),
        });
        let written = sample()
            .write_artifacts(&dir, &[Artifact::Obligations], &dumps)
            .unwrap();
        let sub = dir.join(OBLIGATIONS_DIR);
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|path| path.parent() == Some(sub.as_path())));
        assert!(sub.join("a%2Fb-000000.smt2").exists());
        assert!(sub.join("%2E%2E%2Fx-000000.smt2").exists());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
