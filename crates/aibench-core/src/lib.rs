//! aibench core library
//!
//! Runs a coding agent against an isolated checkout of a repository and
//! scores its changes with pluggable evaluators, producing one
//! [`ResultsBundle`] per run.

pub mod agent;
pub mod domain;
pub mod evaluator;
pub mod git;
pub mod lock;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod reporting;
pub mod sink;
pub mod telemetry;
pub mod workspace;

/// Harness version recorded in every environment snapshot.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use agent::AgentExecutor;

pub use domain::{
    AgentConfig, AgentLog, AgentMessage, AgentStatus, AgentSummary, ArtifactEntry, BenchError,
    EnvironmentSnapshot, ErrorDetail, EvaluationResult, EvaluationStatus, EvaluatorEntry,
    EvaluatorSpec, ExecutionResult, ExecutionSection, LockError, OverallStatus, Result,
    ResultSummary, ResultsBundle, RunConfig, RunSection, TokenUsage, DEFAULT_TIMEOUT_MS,
    RESULTS_SCHEMA_VERSION,
};

pub use evaluator::{
    change_entropy, EvaluationContext, Evaluator, EvaluatorFactory, EvaluatorRegistry,
    ExpectedDiffConfig, ExpectedDiffEvaluator, GitDiffConfig, GitDiffEvaluator, RegistryError,
    DEFAULT_SIMILARITY_THRESHOLD,
};

pub use git::{capture_head_sha, is_git_repo};

pub use lock::{LockHandle, LockRecord, LOCK_FILE_NAME};

pub use orchestrator::{Orchestrator, WorkspaceOptions, NO_CHANGES_MESSAGE};

pub use reporting::{read_results_json, render_summary_md, write_results_json, write_summary_md};

pub use sink::{FsResultSink, HistoryEntry, PersistedRun, ResultSink};

pub use workspace::{Workspace, WorkspaceInfo, WorkspaceManager, WorkspacePaths};
