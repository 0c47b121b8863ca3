//! External SMT solver backend.
//!
//! Each obligation is rendered as a standalone SMT-LIB2 script and piped into a fresh solver
//! process (`z3 -in -smt2` unless configured otherwise). The process is polled until it exits;
//! when the call's deadline passes or the session is cancelled it is killed and the answer is
//! [`UnknownReason::Timeout`]. A solver that cannot be started, answers with `(error ...)` or
//! exits with a failure status yields [`UnknownReason::SolverError`].
use std::{
    collections::HashMap,
    io::{Read, Write},
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use hyterm::{
    prelude::*,
    smtlib::{self, Sexp},
};
use log::{debug, error};
use thiserror::Error;

use crate::{
    aggregate::UnknownReason,
    dispatch::{BackendVerdict, DecideContext, DecisionBackend},
    magic::{BACKEND_SMTLIB, SOLVER_POLL_INTERVAL_MS},
    obligation::Obligation,
    utils::conf::SmtlibConfig,
};

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("solver reported an error: {0}")]
    Reported(String),
    #[error("failed to parse solver output: {0}")]
    Parse(String),
}

fn read_sexps(output: &str) -> Result<Vec<Sexp>, SolverError> {
    smtlib::parse_sexps(output).map_err(|err| match err {
        TermError::Parse { diagnostics, .. } => SolverError::Parse(diagnostics.join("; ")),
        other => SolverError::Parse(other.to_string()),
    })
}

/// `unsat` followed only by `(error ...)` replies to the model query. Some solvers exit with a
/// failure status after refusing `get-value`.
fn unsat_without_model(output: &str) -> bool {
    match read_sexps(output) {
        Ok(sexps) => {
            matches!(sexps.first(), Some(Sexp::Atom(a)) if a == "unsat")
                && sexps[1..].iter().all(|s| s.head() == Some("error"))
        }
        Err(_) => false,
    }
}

/// Interpret the full output of a `check-sat` + `get-value` script.
fn parse_response(output: &str, variables: &[Variable]) -> Result<BackendVerdict, SolverError> {
    let sexps = read_sexps(output)?;
    let mut items = sexps.iter();
    let answer = match items.next() {
        Some(Sexp::Atom(a)) => a.as_str(),
        Some(Sexp::List(list)) if list.first().and_then(Sexp::as_atom) == Some("error") => {
            let msg = list.get(1).map(Sexp::to_string).unwrap_or_default();
            return Err(SolverError::Reported(msg.trim_matches('"').to_string()));
        }
        Some(other) => return Err(SolverError::Parse(other.to_string())),
        None => return Err(SolverError::Parse("empty output".to_string())),
    };

    match answer {
        "unsat" => Ok(BackendVerdict::Unsat),
        "unknown" => Ok(BackendVerdict::Unknown(UnknownReason::Incomplete(
            "solver answered unknown".to_string(),
        ))),
        "sat" => {
            let by_symbol: HashMap<String, &Variable> =
                variables.iter().map(|v| (smtlib::symbol(v), v)).collect();
            let model = items.next().and_then(|values| {
                let Sexp::List(pairs) = values else {
                    return None;
                };
                pairs
                    .iter()
                    .map(|pair| match pair {
                        Sexp::List(kv) if kv.len() == 2 => {
                            let name = kv[0].to_string();
                            let var = by_symbol
                                .get(&name)
                                .or_else(|| by_symbol.get(&format!("|{name}|")))?;
                            let value = smtlib::parse_value(&kv[1].to_string(), var.sort)?;
                            Some(((*var).clone(), value))
                        }
                        _ => None,
                    })
                    .collect::<Option<Assignment>>()
            });
            Ok(BackendVerdict::Sat(model))
        }
        other => Err(SolverError::Parse(format!("unexpected answer `{other}`"))),
    }
}

#[derive(Debug, Clone)]
pub struct SmtlibBackend {
    command: String,
    args: Vec<String>,
}

impl SmtlibBackend {
    pub fn new(config: &SmtlibConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    fn run(
        &self,
        obligation: &Obligation,
        context: &DecideContext<'_>,
    ) -> Result<BackendVerdict, SolverError> {
        let script = obligation.render_smtlib();
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SolverError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SolverError::Reported("failed to capture solver stdin".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SolverError::Reported("failed to capture solver stdout".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SolverError::Reported("failed to capture solver stderr".into()))?;

        // Pipes are serviced on their own threads so a chatty solver never blocks on them.
        let writer = thread::spawn(move || stdin.write_all(script.as_bytes()));
        let reader = thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });
        let err_reader = thread::spawn(move || {
            let mut out = String::new();
            let _ = stderr.read_to_string(&mut out);
            out
        });

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if context.should_stop() {
                debug!(
                    "killing solver on obligation #{} (timeout or cancellation)",
                    obligation.sequence
                );
                let _ = child.kill();
                let _ = child.wait();
                return Ok(BackendVerdict::Unknown(UnknownReason::Timeout));
            }
            thread::sleep(Duration::from_millis(SOLVER_POLL_INTERVAL_MS));
        };

        // The solver may exit before reading the whole script; only its answer matters.
        let _ = writer.join();
        let output = reader
            .join()
            .map_err(|_| SolverError::Reported("stdout reader panicked".into()))??;
        let diagnostics = err_reader.join().unwrap_or_default();
        if !status.success() && !unsat_without_model(&output) {
            return Err(SolverError::Reported(format!(
                "solver exited with {status}; stderr: {}",
                diagnostics.trim()
            )));
        }

        let variables: Vec<Variable> = obligation.variables().into_iter().collect();
        parse_response(&output, &variables).map_err(|err| match err {
            SolverError::Parse(msg) if output.trim().is_empty() => {
                SolverError::Reported(format!("{msg}; stderr: {}", diagnostics.trim()))
            }
            other => other,
        })
    }
}

impl DecisionBackend for SmtlibBackend {
    fn name(&self) -> &str {
        BACKEND_SMTLIB
    }

    fn decide(&self, obligation: &Obligation, context: &DecideContext<'_>) -> BackendVerdict {
        match self.run(obligation, context) {
            Ok(verdict) => verdict,
            Err(err) => {
                error!("smtlib backend on obligation #{}: {err}", obligation.sequence);
                BackendVerdict::Unknown(UnknownReason::SolverError(err.to_string()))
            }
        }
    }
}
