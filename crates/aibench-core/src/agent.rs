//! Agent Execution Boundary.
//!
//! The orchestrator depends only on [`AgentExecutor`]; concrete adapters
//! live in the `aibench-agents` crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::agent::{AgentLog, ExecutionResult};
use crate::domain::config::AgentConfig;
use crate::domain::error::Result;
use crate::workspace::WorkspacePaths;

/// Runs one coding agent against a prepared workspace.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Registry key this adapter answers to.
    fn agent_type(&self) -> &str;

    /// Run the agent in `paths.modified_dir`, bounded by `timeout`.
    ///
    /// Agent failure and timeout are reported through
    /// [`ExecutionResult::status`]; `Err` is reserved for harness faults.
    async fn execute(
        &self,
        paths: &WorkspacePaths,
        config: &AgentConfig,
        timeout: Duration,
    ) -> Result<ExecutionResult>;

    /// Turn captured output into a structured log.
    fn normalize_log(&self, raw_output: &str, result: &ExecutionResult) -> AgentLog {
        let _ = raw_output;
        AgentLog::bare(self.agent_type(), result.clone())
    }
}
