//! Domain models for aibench.
//!
//! Canonical definitions for the core entities:
//! - `RunConfig`: Immutable input to one evaluation
//! - `ExecutionResult` / `AgentLog`: What the agent boundary hands back
//! - `EvaluationResult`: One evaluator's verdict
//! - `ResultsBundle`: The persisted record of a whole run

pub mod agent;
pub mod config;
pub mod error;
pub mod result;

pub use agent::{AgentLog, AgentMessage, AgentStatus, ExecutionResult, TokenUsage};
pub use config::{AgentConfig, EvaluatorEntry, EvaluatorSpec, RunConfig, DEFAULT_TIMEOUT_MS};
pub use error::{BenchError, LockError, Result};
pub use result::{
    AgentSummary, ArtifactEntry, EnvironmentSnapshot, ErrorDetail, EvaluationResult,
    EvaluationStatus, ExecutionSection, OverallStatus, ResultSummary, ResultsBundle, RunSection,
    RESULTS_SCHEMA_VERSION,
};
