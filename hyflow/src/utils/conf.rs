//! Session configuration.
//!
//! A session is configured from a TOML file, by default at [`SessionConfig::default_path`]:
//!
//! ```toml
//! backends = ["epistemic", "smtlib"]
//! max_workers = 4
//! pair_timeout_ms = 2000
//! absence = "distinguishing"
//! output_dir = "out"
//! artifacts = ["report", "counterexamples"]
//!
//! [smtlib]
//! command = "z3"
//! args = ["-in", "-smt2"]
//!
//! [agents.E]
//! visible = ["public"]
//!
//! [inputs.s]
//! sort = "int"
//! range = [0, 7]
//! ```
//!
//! Every key is optional.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    domain::InputDomains,
    magic::{
        BACKEND_EPISTEMIC, BACKEND_SMTLIB, CONFIG_DIR_NAME, CONFIG_FILE_NAME,
        DEFAULT_MAX_WORLDS, DEFAULT_SMT_ARGS, DEFAULT_SMT_COMMAND, ENV_CONFIG_PATH,
    },
    obligation::AbsencePolicy,
    point::AgentId,
    policy::PolicySnapshot,
    report::Artifact,
    utils::error::{FlowError, FlowResult},
};

/// External solver invocation for the `smtlib` backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtlibConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SmtlibConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SMT_COMMAND.to_string(),
            args: DEFAULT_SMT_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpistemicConfig {
    /// Upper bound on the worlds enumerated for one trace.
    pub max_worlds: usize,
}

impl Default for EpistemicConfig {
    fn default() -> Self {
        Self {
            max_worlds: DEFAULT_MAX_WORLDS,
        }
    }
}

/// Declared agent, with the variables it may see from the start of every trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub visible: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Enabled decision backends; several act as independent witnesses.
    pub backends: Vec<String>,
    pub max_workers: usize,
    /// Timeout of a single backend call.
    pub pair_timeout_ms: u64,
    /// Wall-clock bound on the whole verification; unbounded if absent.
    pub session_timeout_ms: Option<u64>,
    /// Number of obligations dispatched before the rest are reported incomplete.
    pub max_obligations: Option<usize>,
    /// Branch count after which a path is sealed as bound-reached.
    pub max_depth: Option<usize>,
    pub absence: AbsencePolicy,
    /// Directory artifacts are written to; nothing is written if absent.
    pub output_dir: Option<PathBuf>,
    pub artifacts: Vec<Artifact>,
    pub smtlib: SmtlibConfig,
    pub epistemic: EpistemicConfig,
    pub agents: BTreeMap<AgentId, AgentConfig>,
    pub inputs: InputDomains,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backends: vec![BACKEND_EPISTEMIC.to_string()],
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            pair_timeout_ms: 10_000,
            session_timeout_ms: None,
            max_obligations: None,
            max_depth: None,
            absence: AbsencePolicy::default(),
            output_dir: None,
            artifacts: vec![Artifact::Report],
            smtlib: SmtlibConfig::default(),
            epistemic: EpistemicConfig::default(),
            agents: BTreeMap::new(),
            inputs: InputDomains::default(),
        }
    }
}

impl SessionConfig {
    /// Get the default path to the session configuration file.
    pub fn default_path() -> PathBuf {
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            return config_path.into();
        }

        let mut path = PathBuf::new();

        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                path.push(appdata);
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
                path.push(xdg_config_home);
            } else if let Ok(home) = std::env::var("HOME") {
                path.push(home);
                path.push(".config");
            }
        }

        path.push(CONFIG_DIR_NAME);
        path.push(CONFIG_FILE_NAME);
        path
    }

    /// Load a configuration from a TOML file.
    pub fn load_from_toml(path: &Path) -> FlowResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;
        Self::parse_toml(&toml_str, &path.display().to_string())
    }

    pub fn from_toml_str(text: &str) -> FlowResult<Self> {
        Self::parse_toml(text, "<string>")
    }

    fn parse_toml(text: &str, file: &str) -> FlowResult<Self> {
        let config: SessionConfig =
            toml::from_str(text).map_err(|e| FlowError::ConfigParseError {
                source: e,
                file: file.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save_to_toml(&self, path: &Path) -> FlowResult<()> {
        let toml_str = toml::to_string(self).map_err(|e| {
            FlowError::Serialization(format!(
                "Failed during serialization of TOML to path `{}`: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> FlowResult<()> {
        if self.backends.is_empty() {
            return Err(FlowError::InvalidConfig(
                "at least one backend must be enabled".to_string(),
            ));
        }
        if let Some(unknown) = self
            .backends
            .iter()
            .find(|b| b.as_str() != BACKEND_EPISTEMIC && b.as_str() != BACKEND_SMTLIB)
        {
            return Err(FlowError::UnknownBackend(unknown.clone()));
        }
        if self.max_workers == 0 {
            return Err(FlowError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        self.inputs.validate()
    }

    /// Visibility every trace starts from.
    pub fn initial_policy(&self) -> PolicySnapshot {
        let mut snapshot = PolicySnapshot::new();
        for (agent, conf) in &self.agents {
            snapshot.grant(agent, conf.visible.iter());
        }
        snapshot
    }
}
