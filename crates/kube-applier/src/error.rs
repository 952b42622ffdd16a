use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApplierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Concurrency invariant violated: {0}")]
    Invariant(#[from] QueueError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid target '{namespace}': {reason}")]
    InvalidTarget { namespace: String, reason: String },

    #[error("Invalid blacklist pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Credential for target '{namespace}': {source}")]
    Credential {
        namespace: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

/// Failures talking to the manifest or target source. Always transient from
/// the scheduler's point of view.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Git repository not initialized at '{0}'")]
    GitNotInitialized(PathBuf),

    #[error("Failed to resolve manifest root '{path}': {source}")]
    ResolveRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list targets: {0}")]
    ListTargets(String),

    #[error("Failed to write status for '{namespace}': {message}")]
    StatusWrite { namespace: String, message: String },
}

/// Failure of a single apply or prune invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to run executor: {0}")]
    Spawn(String),
}

impl ExecError {
    /// Returns true if the error is likely transient and the invocation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Target '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Target '{0}' finished but was not marked running")]
    NotRunning(String),
}

pub type Result<T> = std::result::Result<T, ApplierError>;
