//! Run configuration: the immutable input to one evaluation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::{BenchError, Result};

/// Agent wall-clock timeout used when the config does not set one (30 minutes).
pub const DEFAULT_TIMEOUT_MS: u64 = 30 * 60 * 1000;

/// Configuration of the agent under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Adapter key, resolved through the agent registry (e.g. `command`).
    #[serde(rename = "type")]
    pub agent_type: String,

    /// Task prompt handed to the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Adapter-specific settings.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Detailed form of an evaluator entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorSpec {
    /// Registry key of the evaluator.
    pub name: String,

    /// Inline configuration block.
    #[serde(default)]
    pub config: serde_json::Value,

    /// File holding the configuration block. Loaders inline it into `config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,

    /// Per-evaluator timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// One configured evaluator: either a bare name or a detailed block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EvaluatorEntry {
    Name(String),
    Detailed(EvaluatorSpec),
}

impl EvaluatorEntry {
    pub fn name(&self) -> &str {
        match self {
            EvaluatorEntry::Name(name) => name,
            EvaluatorEntry::Detailed(spec) => &spec.name,
        }
    }

    /// The evaluator's own configuration slice (`Null` when absent).
    pub fn config(&self) -> &serde_json::Value {
        static NULL: serde_json::Value = serde_json::Value::Null;
        match self {
            EvaluatorEntry::Name(_) => &NULL,
            EvaluatorEntry::Detailed(spec) => &spec.config,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            EvaluatorEntry::Name(_) => None,
            EvaluatorEntry::Detailed(spec) => spec.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Immutable input to one evaluation run.
///
/// Built once per invocation from validated external configuration and
/// never mutated afterwards; the orchestrator shares it behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Human-readable run name used to derive the workspace directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Repository to clone.
    pub repo_url: String,

    /// Branch to check out. Cloned shallow when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Commit to check out. Without a branch this forces a full-history clone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Branch holding the known-good reference solution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_branch: Option<String>,

    pub agent: AgentConfig,

    /// Evaluators in reporting order.
    #[serde(default)]
    pub evaluators: Vec<EvaluatorEntry>,

    /// Agent wall-clock timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Skip every evaluator when the agent left the tree unchanged.
    #[serde(default)]
    pub skip_evaluators_on_no_changes: bool,
}

impl RunConfig {
    /// Minimal config for `repo_url` driven by the given agent type.
    pub fn new(repo_url: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            name: None,
            repo_url: repo_url.into(),
            branch: None,
            commit: None,
            expected_branch: None,
            agent: AgentConfig {
                agent_type: agent_type.into(),
                prompt: None,
                settings: serde_json::Value::Null,
            },
            evaluators: Vec::new(),
            timeout_ms: None,
            skip_evaluators_on_no_changes: false,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    pub fn with_expected_branch(mut self, branch: impl Into<String>) -> Self {
        self.expected_branch = Some(branch.into());
        self
    }

    pub fn with_evaluator(mut self, entry: EvaluatorEntry) -> Self {
        self.evaluators.push(entry);
        self
    }

    /// Agent timeout, falling back to [`DEFAULT_TIMEOUT_MS`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// Reject configurations that make a run meaningless to attempt.
    pub fn validate(&self) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(BenchError::Config("repo_url must not be empty".to_string()));
        }
        for (field, value) in [
            ("branch", &self.branch),
            ("commit", &self.commit),
            ("expected_branch", &self.expected_branch),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(BenchError::Config(format!("{field} must not be blank")));
            }
        }
        if self.agent.agent_type.trim().is_empty() {
            return Err(BenchError::Config("agent type must not be empty".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(BenchError::Config("timeout_ms must be positive".to_string()));
        }
        if let Some(entry) = self.evaluators.iter().find(|e| e.name().trim().is_empty()) {
            return Err(BenchError::Config(format!(
                "evaluator entry without a name: {entry:?}"
            )));
        }
        Ok(())
    }

    /// SHA-256 hex digest of the config's JSON form.
    ///
    /// `serde_json` maps are key-sorted, so equal configs hash equally
    /// regardless of source field order.
    pub fn digest(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        let bytes = serde_json::to_vec(&value)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}
