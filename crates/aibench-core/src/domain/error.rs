//! Domain-level error taxonomy for aibench.

use std::path::PathBuf;

/// Errors produced by the lock guard.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock {path} is held by live process {pid}")]
    Locked { path: PathBuf, pid: u32 },

    #[error("lock io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// aibench domain errors.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("invalid run configuration: {0}")]
    Config(String),

    #[error("workspace {path} is locked by process {pid}")]
    WorkspaceLocked { path: PathBuf, pid: u32 },

    #[error("failed to clone {repo}: {reason}")]
    CloneFailed { repo: String, reason: String },

    #[error("expected reference branch {branch} not found in {repo}: {reason}")]
    ExpectedBranchNotFound {
        repo: String,
        branch: String,
        reason: String,
    },

    #[error("workspace setup failed: {0}")]
    Workspace(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            BenchError::Config(_) => "CONFIG_INVALID",
            BenchError::WorkspaceLocked { .. } => "WORKSPACE_LOCKED",
            BenchError::CloneFailed { .. } => "CLONE_FAILED",
            BenchError::ExpectedBranchNotFound { .. } => "EXPECTED_BRANCH_NOT_FOUND",
            BenchError::Workspace(_) => "WORKSPACE_SETUP_FAILED",
            BenchError::Git(_) => "GIT_ERROR",
            BenchError::Agent(_) => "AGENT_ERROR",
            BenchError::Serialization(_) => "SERIALIZATION_ERROR",
            BenchError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<LockError> for BenchError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Locked { path, pid } => BenchError::WorkspaceLocked { path, pid },
            LockError::Io { path, source } => {
                BenchError::Workspace(format!("lock file {}: {source}", path.display()))
            }
            LockError::Serialization(e) => BenchError::Serialization(e),
        }
    }
}

/// Result type for aibench domain operations.
pub type Result<T> = std::result::Result<T, BenchError>;
