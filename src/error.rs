use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T, E = ArchitechError> = std::result::Result<T, E>;

/// An io error paired with the path that triggered it.
#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct ArchitechIoError {
    io: io::Error,
    path: PathBuf,
}

impl ArchitechIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<ArchitechIoError> for io::Error {
    fn from(err: ArchitechIoError) -> Self {
        err.io
    }
}

/// Various error types
#[derive(Debug, Error)]
pub enum ArchitechError {
    /// Internal error
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] ArchitechIoError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    SemVer(#[from] semver::Error),
    /// Malformed genome, bad module id shape, or a field of the wrong type
    #[error("invalid genome: {0}")]
    Validation(String),
    /// A referenced module has no marketplace entry
    #[error("module `{0}` has no marketplace entry")]
    ModuleNotFound(String),
    /// A required module or capability is not included in the genome
    #[error("module `{module}` requires `{requirement}` which is not satisfied by the genome")]
    MissingPrerequisite { module: String, requirement: String },
    /// More than one selected module provides the same required capability
    #[error("capability `{capability}` is provided by multiple selected modules: {}", .providers.join(", "))]
    CapabilityConflict { capability: String, providers: Vec<String> },
    /// The prerequisite graph contains a cycle; the payload is the exact cycle path
    #[error("circular module dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
    /// The module's blueprint file could not be read or parsed
    #[error("failed to load blueprint for `{module}`: {source}")]
    BlueprintLoadFailed {
        module: String,
        #[source]
        source: Box<ArchitechError>,
    },
    /// An action handler returned an error
    #[error("action `{action}` failed: {source}")]
    ActionFailed {
        action: &'static str,
        #[source]
        source: Box<ArchitechError>,
    },
    /// The registry has no entry under the requested modifier name
    #[error("no modifier registered under `{0}`")]
    ModifierNotFound(String),
    /// A modifier was handed params that do not satisfy its schema
    #[error("modifier `{modifier}` rejected params: {reason}")]
    InvalidModifierParams { modifier: String, reason: String },
    /// A buffered read on a path that exists neither in the buffer nor on disk
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// Create on a path that already holds content
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    /// A path failed normalization or escaped the project root
    #[error("invalid vfs path `{path}`: {reason}")]
    VfsPath { path: String, reason: &'static str },
    /// Writing a buffered entry to disk failed; remaining writes were aborted
    #[error("failed to flush `{}`", .path.display())]
    FlushFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// No entry in the resolved path table for this key
    #[error("unknown path key `{key}`{}", candidates_hint(.candidates))]
    PathNotFound { key: String, candidates: Vec<String> },
    /// `get_one` on a semantic key that fans out to multiple paths
    #[error("path key `{key}` resolves to {count} paths; a single path was required")]
    MultiplePaths { key: String, count: usize },
    /// An external command exited non-zero
    #[error("command `{command}` exited with code {code}\n{stderr}")]
    CommandFailed { command: String, code: i32, stderr: String },
    /// An external command exceeded its deadline and was killed
    #[error("command `{command}` timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },
    /// A lock file exists but violates the expected schema
    #[error("lock file at `{}` is invalid: {reason}", .path.display())]
    LockFileInvalid { path: PathBuf, reason: String },
    /// Composite failure surfaced by the execution driver
    #[error("batch {batch}: module `{module}` failed: {source}")]
    ExecutionFailed {
        batch: usize,
        module: String,
        #[source]
        source: Box<ArchitechError>,
    },
    /// The run was cancelled cooperatively; the buffer was dropped unflushed
    #[error("run cancelled")]
    Cancelled,
}

fn candidates_hint(candidates: &[String]) -> String {
    if candidates.is_empty() {
        String::new()
    } else {
        format!("; close matches: {}", candidates.join(", "))
    }
}

impl ArchitechError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        ArchitechIoError::new(err, path).into()
    }

    /// Create an error with a custom message
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        ArchitechError::Message(msg.to_string())
    }

    /// Wraps `self` as the cause of a failed action
    pub fn into_action_failure(self, action: &'static str) -> Self {
        ArchitechError::ActionFailed { action, source: Box::new(self) }
    }
}
