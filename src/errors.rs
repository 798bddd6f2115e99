//! Error mapping guide:
//! - Precondition, render and configuration errors exit with 2; nothing was mutated.
//! - A missing compose tool (or git) maps to 127, mirroring "command not found".
//! - Everything else that failed after work started maps to 1.
//! - Skipped outcomes are not errors and never reach these types.
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Failure to run an external program (git, docker compose).
#[derive(Debug)]
pub enum ExecError {
    /// The program could not be located or spawned because it does not exist.
    NotFound(String),
    Spawn { program: String, source: io::Error },
    TimedOut { program: String, after: Duration },
    Wait { program: String, source: io::Error },
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::NotFound(p) => write!(f, "{p}: command not found"),
            ExecError::Spawn { program, source } => write!(f, "failed to spawn {program}: {source}"),
            ExecError::TimedOut { program, after } => {
                write!(f, "{program} timed out after {}", humantime::format_duration(*after))
            }
            ExecError::Wait { program, source } => write!(f, "failed to wait for {program}: {source}"),
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Spawn { source, .. } | ExecError::Wait { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Descriptor Store failures.
#[derive(Debug)]
pub enum StoreError {
    Io { path: PathBuf, source: io::Error },
    /// A descriptor file exists but its bytes cannot be decoded.
    Unreadable { path: PathBuf, reason: String },
    /// Stage/commit/push (or pull) did not succeed.
    Sync { step: &'static str, detail: String },
    Exec(ExecError),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            StoreError::Unreadable { path, reason } => {
                write!(f, "{}: unreadable: {reason}", path.display())
            }
            StoreError::Sync { step, detail } => write!(f, "git {step} failed: {detail}"),
            StoreError::Exec(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Exec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ExecError> for StoreError {
    fn from(e: ExecError) -> Self {
        StoreError::Exec(e)
    }
}

/// Template rendering failures. Rendering is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    Unresolved { template: String, name: String },
    UnknownFilter { template: String, filter: String },
    BadFilterArgument { template: String, filter: String },
    Unterminated { template: String, offset: usize },
    /// The template set does not produce one of the descriptor's artifacts.
    MissingArtifact(String),
    Load { path: PathBuf, reason: String },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Unresolved { template, name } => {
                write!(f, "{template}: unresolved placeholder '{name}'")
            }
            RenderError::UnknownFilter { template, filter } => {
                write!(f, "{template}: unknown filter '{filter}'")
            }
            RenderError::BadFilterArgument { template, filter } => {
                write!(f, "{template}: malformed argument for filter '{filter}'")
            }
            RenderError::Unterminated { template, offset } => {
                write!(f, "{template}: unterminated placeholder at byte {offset}")
            }
            RenderError::MissingArtifact(name) => {
                write!(f, "template set does not produce required file '{name}'")
            }
            RenderError::Load { path, reason } => {
                write!(f, "cannot load template {}: {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for RenderError {}

/// Errors that abort the Initializer before any descriptor exists.
///
/// Failures after the directory was created are reported as
/// `InitOutcome::Failed` instead, once the rollback has run.
#[derive(Debug)]
pub enum InitError {
    MissingVariable(&'static str),
    InvalidVariable { name: String, reason: String },
    /// The raw branch name normalizes to an empty identifier.
    InvalidBranch(String),
    Render(RenderError),
    Store(StoreError),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::MissingVariable(name) => {
                write!(f, "missing required trigger variable '{name}'")
            }
            InitError::InvalidVariable { name, reason } => {
                write!(f, "invalid trigger variable '{name}': {reason}")
            }
            InitError::InvalidBranch(raw) => {
                write!(f, "branch name '{raw}' has no alphanumeric characters")
            }
            InitError::Render(e) => write!(f, "render failed: {e}"),
            InitError::Store(e) => write!(f, "descriptor store: {e}"),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Render(e) => Some(e),
            InitError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RenderError> for InitError {
    fn from(e: RenderError) -> Self {
        InitError::Render(e)
    }
}

impl From<StoreError> for InitError {
    fn from(e: StoreError) -> Self {
        InitError::Store(e)
    }
}

/// Composition Effector failures for a single invocation.
#[derive(Debug)]
pub enum EffectorError {
    /// The compose tool itself is unavailable; fatal for a whole pass.
    NotFound(String),
    Failed { code: Option<i32>, stderr: String },
    TimedOut(Duration),
    Exec(ExecError),
}

impl fmt::Display for EffectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectorError::NotFound(msg) => write!(f, "compose tool not found: {msg}"),
            EffectorError::Failed { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                let tail = stderr.trim();
                if tail.is_empty() {
                    write!(f, "compose exited with {code}")
                } else {
                    write!(f, "compose exited with {code}: {tail}")
                }
            }
            EffectorError::TimedOut(after) => {
                write!(f, "compose timed out after {}", humantime::format_duration(*after))
            }
            EffectorError::Exec(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EffectorError {}

impl From<ExecError> for EffectorError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::NotFound(p) => EffectorError::NotFound(p),
            ExecError::TimedOut { after, .. } => EffectorError::TimedOut(after),
            other => EffectorError::Exec(other),
        }
    }
}

/// Errors that abort a whole reconciliation pass.
#[derive(Debug)]
pub enum ReconcileError {
    EffectorNotFound(String),
    Store(StoreError),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::EffectorNotFound(msg) => {
                write!(f, "compose tool unavailable, pass aborted: {msg}")
            }
            ReconcileError::Store(e) => write!(f, "cannot scan descriptor store: {e}"),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        ReconcileError::Store(e)
    }
}

pub fn exit_code_for_store_error(e: &StoreError) -> u8 {
    match e {
        StoreError::Io { source, .. } => exit_code_for_io_error(source),
        StoreError::Exec(ExecError::NotFound(_)) => 127,
        _ => 1,
    }
}

pub fn exit_code_for_init_error(e: &InitError) -> u8 {
    match e {
        InitError::MissingVariable(_)
        | InitError::InvalidVariable { .. }
        | InitError::InvalidBranch(_)
        | InitError::Render(_) => 2,
        InitError::Store(se) => exit_code_for_store_error(se),
    }
}

pub fn exit_code_for_reconcile_error(e: &ReconcileError) -> u8 {
    match e {
        ReconcileError::EffectorNotFound(_) => 127,
        ReconcileError::Store(se) => exit_code_for_store_error(se),
    }
}
