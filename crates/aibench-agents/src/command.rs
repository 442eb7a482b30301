//! Adapter that runs an arbitrary command line as the agent.
//!
//! The child runs inside the modified tree with the task handed over
//! through `AIBENCH_*` environment variables. It is killed when the
//! timeout expires.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use aibench_core::domain::agent::elapsed_ms;
use aibench_core::{
    AgentConfig, AgentExecutor, AgentLog, AgentStatus, BenchError, ExecutionResult, Result,
    WorkspacePaths,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::normalize::{environment_snapshot, LogNormalizer, Pricing};

pub const ENV_PROMPT: &str = "AIBENCH_PROMPT";
pub const ENV_WORKSPACE: &str = "AIBENCH_WORKSPACE";
pub const ENV_EXPECTED: &str = "AIBENCH_EXPECTED";
pub const ENV_ARTIFACTS: &str = "AIBENCH_ARTIFACTS";

/// `agent.settings` for the `command` adapter.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CommandSettings {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cost_per_1k_input: Option<f64>,
    #[serde(default)]
    pub cost_per_1k_output: Option<f64>,
}

impl CommandSettings {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let settings: CommandSettings = serde_json::from_value(value.clone())
            .map_err(|e| BenchError::Config(format!("command agent settings: {e}")))?;
        if settings.command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(BenchError::Config(
                "command agent settings: `command` must name a program".to_string(),
            ));
        }
        Ok(settings)
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            per_1k_input: self.cost_per_1k_input,
            per_1k_output: self.cost_per_1k_output,
        }
    }
}

pub struct CommandAgent {
    settings: CommandSettings,
    normalizer: LogNormalizer,
}

impl CommandAgent {
    pub const TYPE: &'static str = "command";

    pub fn new(settings: CommandSettings) -> Self {
        Self {
            settings,
            normalizer: LogNormalizer::default(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(CommandSettings::from_value(&config.settings)?))
    }

    pub fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    fn build_command(&self, paths: &WorkspacePaths, config: &AgentConfig) -> Command {
        let (program, args) = match self.settings.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("", &[][..]),
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&paths.modified_dir)
            .envs(&self.settings.env)
            .env(ENV_PROMPT, config.prompt.as_deref().unwrap_or(""))
            .env(ENV_WORKSPACE, &paths.modified_dir)
            .env(ENV_ARTIFACTS, &paths.artifacts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &paths.expected_dir {
            Some(expected) => {
                cmd.env(ENV_EXPECTED, expected);
            }
            None => {
                cmd.env_remove(ENV_EXPECTED);
            }
        }
        cmd
    }
}

#[async_trait]
impl AgentExecutor for CommandAgent {
    fn agent_type(&self) -> &str {
        Self::TYPE
    }

    async fn execute(
        &self,
        paths: &WorkspacePaths,
        config: &AgentConfig,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let program = self.settings.command.first().cloned().unwrap_or_default();
        debug!(program = %program, timeout_ms = timeout.as_millis() as u64, "spawning agent");

        let child = match self.build_command(paths, config).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "agent failed to start");
                return Ok(ExecutionResult::failed(
                    started_at,
                    format!("failed to spawn {program}: {e}"),
                ));
            }
        };

        // Dropping the wait future drops the child, and kill_on_drop ends it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Ok(ExecutionResult::failed(
                    started_at,
                    format!("failed to wait for {program}: {e}"),
                ))
            }
            Err(_) => {
                warn!(program = %program, "agent timed out, killed");
                return Ok(ExecutionResult::timed_out(
                    started_at,
                    timeout.as_millis() as u64,
                ));
            }
        };

        let completed_at = Utc::now();
        let mut raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        raw_output.push_str(&String::from_utf8_lossy(&output.stderr));

        let (status, errors) = if output.status.success() {
            (AgentStatus::Success, Vec::new())
        } else {
            let reason = match output.status.code() {
                Some(code) => format!("{program} exited with status {code}"),
                None => format!("{program} terminated by signal"),
            };
            (AgentStatus::Failed, vec![reason])
        };

        Ok(ExecutionResult {
            exit_code: output.status.code(),
            status,
            raw_output,
            started_at,
            completed_at,
            duration_ms: elapsed_ms(started_at, completed_at),
            errors,
        })
    }

    fn normalize_log(&self, raw_output: &str, result: &ExecutionResult) -> AgentLog {
        let mut environment = environment_snapshot(Self::TYPE);
        if let Some(program) = self.settings.command.first() {
            environment.insert("command".to_string(), program.clone());
        }
        self.normalizer.normalize(
            Self::TYPE,
            raw_output,
            result,
            self.settings.pricing(),
            environment,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_require_a_program() {
        let err = CommandSettings::from_value(&json!({ "command": [] })).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
        let err = CommandSettings::from_value(&serde_json::Value::Null).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn settings_reject_unknown_keys() {
        let err = CommandSettings::from_value(&json!({ "command": ["true"], "shell": true }))
            .unwrap_err();
        assert!(err.to_string().contains("shell"));
    }

    #[test]
    fn settings_parse_prices_and_env() {
        let settings = CommandSettings::from_value(&json!({
            "command": ["sh", "-c", "echo hi"],
            "env": { "MODEL": "small" },
            "cost_per_1k_input": 0.5
        }))
        .unwrap();
        assert_eq!(settings.command.len(), 3);
        assert_eq!(settings.env["MODEL"], "small");
        assert_eq!(settings.pricing().per_1k_input, Some(0.5));
        assert_eq!(settings.pricing().per_1k_output, None);
    }
}
