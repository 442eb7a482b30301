//! Evaluation results and the terminal `ResultsBundle`.
//!
//! Field names and status vocabularies here are a stable contract: reporters
//! and historical aggregators read `results.json` exclusively through them.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentLog, AgentStatus, TokenUsage};
use crate::domain::config::RunConfig;
use crate::workspace::WorkspaceInfo;

/// Schema version written into every bundle.
pub const RESULTS_SCHEMA_VERSION: &str = "1.0";

/// Terminal verdict of one evaluator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Passed,
    Failed,
    Skipped,
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvaluationStatus::Passed => "passed",
            EvaluationStatus::Failed => "failed",
            EvaluationStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Structured error attached to a skipped result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Result of one evaluator. Produced once per evaluator per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationResult {
    pub evaluator: String,
    pub status: EvaluationStatus,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub message: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl EvaluationResult {
    fn new(evaluator: &str, status: EvaluationStatus, message: impl Into<String>) -> Self {
        Self {
            evaluator: evaluator.to_string(),
            status,
            metrics: BTreeMap::new(),
            message: message.into(),
            duration_ms: 0,
            timestamp: Utc::now(),
            assertions: None,
            artifacts: None,
            error: None,
        }
    }

    pub fn passed(evaluator: &str, message: impl Into<String>) -> Self {
        Self::new(evaluator, EvaluationStatus::Passed, message)
    }

    pub fn failed(evaluator: &str, message: impl Into<String>) -> Self {
        Self::new(evaluator, EvaluationStatus::Failed, message)
    }

    /// A skipped result carrying a structured error.
    pub fn skipped(evaluator: &str, message: impl Into<String>, error: ErrorDetail) -> Self {
        let mut result = Self::new(evaluator, EvaluationStatus::Skipped, message);
        result.error = Some(error);
        result
    }

    pub fn with_metric(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    pub fn with_assertions(mut self, assertions: BTreeMap<String, bool>) -> Self {
        self.assertions = Some(assertions);
        self
    }

    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifacts.get_or_insert_with(Vec::new).push(path.into());
        self
    }

    /// Stamp duration measured from `started`.
    pub fn timed(mut self, started: Instant) -> Self {
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Passed,
    Failed,
    Partial,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverallStatus::Passed => "passed",
            OverallStatus::Failed => "failed",
            OverallStatus::Partial => "partial",
        };
        f.write_str(s)
    }
}

/// Counts and overall verdict over all evaluator results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub overall_status: OverallStatus,
}

impl ResultSummary {
    /// Any `failed` ⇒ failed; otherwise any `skipped` ⇒ partial; otherwise passed.
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let passed = count(EvaluationStatus::Passed);
        let failed = count(EvaluationStatus::Failed);
        let skipped = count(EvaluationStatus::Skipped);

        let overall_status = if failed > 0 {
            OverallStatus::Failed
        } else if skipped > 0 {
            OverallStatus::Partial
        } else {
            OverallStatus::Passed
        };

        Self {
            total: results.len(),
            passed,
            failed,
            skipped,
            overall_status,
        }
    }
}

/// Run identity and config snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSection {
    pub run_id: String,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_branch: Option<String>,
    pub config_digest: String,
    pub config: RunConfig,
}

/// Host facts captured once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentSnapshot {
    pub os: String,
    pub arch: String,
    pub harness_version: String,
    pub pid: u32,
}

impl EnvironmentSnapshot {
    pub fn capture() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            harness_version: crate::VERSION.to_string(),
            pid: std::process::id(),
        }
    }
}

/// Execution timing and environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSection {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub environment: EnvironmentSnapshot,
    pub workspace: WorkspaceInfo,
}

/// Agent execution summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub agent_type: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate_usd: Option<f64>,
}

impl From<&AgentLog> for AgentSummary {
    fn from(log: &AgentLog) -> Self {
        Self {
            agent_type: log.agent_type.clone(),
            status: log.execution.status,
            exit_code: log.execution.exit_code,
            duration_ms: log.execution.duration_ms,
            errors: log.execution.errors.clone(),
            token_usage: log.token_usage,
            cost_estimate_usd: log.cost_estimate_usd,
        }
    }
}

/// One persisted artifact, relative to the artifacts directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
    pub path: String,
}

/// The single persisted record of one complete evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultsBundle {
    pub schema_version: String,
    pub run: RunSection,
    pub execution: ExecutionSection,
    pub agent: AgentSummary,
    /// In configured evaluator order.
    pub evaluations: Vec<EvaluationResult>,
    pub summary: ResultSummary,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ResultsBundle {
    pub fn overall_status(&self) -> OverallStatus {
        self.summary.overall_status
    }

    pub fn evaluation(&self, name: &str) -> Option<&EvaluationResult> {
        self.evaluations.iter().find(|r| r.evaluator == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(list: &[EvaluationStatus]) -> Vec<EvaluationResult> {
        list.iter()
            .enumerate()
            .map(|(i, s)| match s {
                EvaluationStatus::Passed => EvaluationResult::passed(&format!("e{i}"), "ok"),
                EvaluationStatus::Failed => EvaluationResult::failed(&format!("e{i}"), "bad"),
                EvaluationStatus::Skipped => {
                    EvaluationResult::skipped(&format!("e{i}"), "skip", ErrorDetail::new("x"))
                }
            })
            .collect()
    }

    #[test]
    fn test_summary_all_passed() {
        let summary = ResultSummary::from_results(&statuses(&[
            EvaluationStatus::Passed,
            EvaluationStatus::Passed,
        ]));
        assert_eq!(summary.overall_status, OverallStatus::Passed);
        assert_eq!(summary.total, 2);
    }

    #[test]
    fn test_summary_skipped_without_failure_is_partial() {
        let summary = ResultSummary::from_results(&statuses(&[
            EvaluationStatus::Passed,
            EvaluationStatus::Skipped,
        ]));
        assert_eq!(summary.overall_status, OverallStatus::Partial);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn test_summary_any_failure_is_failed() {
        let summary = ResultSummary::from_results(&statuses(&[
            EvaluationStatus::Skipped,
            EvaluationStatus::Failed,
            EvaluationStatus::Passed,
        ]));
        assert_eq!(summary.overall_status, OverallStatus::Failed);
    }

    #[test]
    fn test_summary_of_no_results_is_passed() {
        let summary = ResultSummary::from_results(&[]);
        assert_eq!(summary.overall_status, OverallStatus::Passed);
        assert_eq!(summary.total, 0);
    }

    #[test]
    fn test_skipped_result_carries_error_and_status_vocabulary() {
        let result = EvaluationResult::skipped(
            "judge",
            "evaluator timed out",
            ErrorDetail::new("timeout").with_details("limit 10ms"),
        );
        let v = serde_json::to_value(&result).expect("serialize");
        assert_eq!(v["status"], "skipped");
        assert_eq!(v["error"]["message"], "timeout");
        assert_eq!(v["error"]["details"], "limit 10ms");
        assert!(v.get("assertions").is_none());
    }

    #[test]
    fn test_with_artifact_appends() {
        let result = EvaluationResult::passed("git-diff", "ok")
            .with_artifact("evaluators/git-diff/diff.patch")
            .with_metric("files_changed", 3);
        assert_eq!(result.artifacts.as_ref().map(Vec::len), Some(1));
        assert_eq!(result.metrics["files_changed"], serde_json::json!(3));
    }
}
