//! Agent execution records crossing the agent boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome class of one agent execution.
///
/// `Timeout` is distinct from `Failed`: a timeout calls for more time, a
/// failure calls for fixing the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Failed,
    Timeout,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Success => "success",
            AgentStatus::Failed => "failed",
            AgentStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Raw result of running the agent process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// Process exit code (`None` when killed or never started).
    pub exit_code: Option<i32>,
    pub status: AgentStatus,
    /// Captured stdout followed by stderr.
    pub raw_output: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ExecutionResult {
    /// A failed execution that never produced output.
    pub fn failed(started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        let completed_at = Utc::now();
        Self {
            exit_code: None,
            status: AgentStatus::Failed,
            raw_output: String::new(),
            started_at,
            completed_at,
            duration_ms: elapsed_ms(started_at, completed_at),
            errors: vec![error.into()],
        }
    }

    /// A timed-out execution.
    pub fn timed_out(started_at: DateTime<Utc>, limit_ms: u64) -> Self {
        let completed_at = Utc::now();
        Self {
            exit_code: None,
            status: AgentStatus::Timeout,
            raw_output: String::new(),
            started_at,
            completed_at,
            duration_ms: elapsed_ms(started_at, completed_at),
            errors: vec![format!("agent timed out after {limit_ms}ms")],
        }
    }
}

/// Milliseconds between two timestamps, clamped at zero.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

/// One structured message recovered from agent output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub role: String,
    pub content: String,
}

/// Token accounting reported by the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Normalized agent log, persisted as `artifacts/agent-log.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentLog {
    pub agent_type: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate_usd: Option<f64>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub execution: ExecutionResult,
}

impl AgentLog {
    /// A log carrying only the execution record.
    pub fn bare(agent_type: impl Into<String>, execution: ExecutionResult) -> Self {
        Self {
            agent_type: agent_type.into(),
            status: execution.status,
            messages: Vec::new(),
            token_usage: None,
            cost_estimate_usd: None,
            environment: BTreeMap::new(),
            execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AgentStatus::Timeout).unwrap(),
            "\"timeout\""
        );
        assert_eq!(AgentStatus::Success.to_string(), "success");
    }

    #[test]
    fn test_timed_out_result_is_not_failed() {
        let result = ExecutionResult::timed_out(Utc::now(), 1000);
        assert_eq!(result.status, AgentStatus::Timeout);
        assert!(result.exit_code.is_none());
        assert!(result.errors[0].contains("1000ms"));
    }

    #[test]
    fn test_elapsed_ms_clamps_negative() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::milliseconds(50);
        assert_eq!(elapsed_ms(now, earlier), 0);
        assert_eq!(elapsed_ms(earlier, now), 50);
    }
}
