/// Name of the environment variable containing the path to the session configuration file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/hyflow/session.toml` or `$HOME/.config/hyflow/session.toml`
///  (2) on Windows: `%APPDATA%\hyflow\session.toml`
pub const ENV_CONFIG_PATH: &str = "HYFLOW_CONFIG_PATH";

/// Directory and file name of the default configuration, relative to the platform config root.
pub const CONFIG_DIR_NAME: &str = "hyflow";
pub const CONFIG_FILE_NAME: &str = "session.toml";

/// Backend names accepted in `backends = [...]`.
pub const BACKEND_EPISTEMIC: &str = "epistemic";
pub const BACKEND_SMTLIB: &str = "smtlib";

/// Default external solver invocation (reads an SMT-LIB2 script on stdin).
pub const DEFAULT_SMT_COMMAND: &str = "z3";
pub const DEFAULT_SMT_ARGS: &[&str] = &["-in", "-smt2"];

/// Default bound on the number of worlds per trace explored by the epistemic backend.
pub const DEFAULT_MAX_WORLDS: usize = 1 << 16;

/// Interval at which a running solver process is polled for completion or cancellation.
pub const SOLVER_POLL_INTERVAL_MS: u64 = 5;

/// Artifact file names, relative to `output_dir`.
pub const REPORT_TOML_FILE: &str = "report.toml";
pub const REPORT_CBOR_FILE: &str = "report.cbor";
pub const COUNTEREXAMPLES_FILE: &str = "counterexamples.txt";
pub const OBLIGATIONS_DIR: &str = "obligations";

/// Version of the report layout written to disk.
pub const REPORT_FORMAT_VERSION: &str = "1.0.0";
