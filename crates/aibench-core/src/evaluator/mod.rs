//! Evaluator Framework.
//!
//! An evaluator inspects a workspace after the agent ran and emits exactly
//! one [`EvaluationResult`]. Evaluators never fail a run: recoverable
//! problems come back as `skipped` results carrying an [`ErrorDetail`].
//!
//! Built-in evaluators:
//! - `git-diff`: change counts and change entropy of the modified tree
//! - `expected-diff`: similarity of the modified tree to a reference tree

pub mod expected_diff;
pub mod git_diff;
pub mod registry;
pub mod similarity;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::agent::AgentLog;
use crate::domain::config::RunConfig;
use crate::domain::error::Result;
use crate::domain::result::{ErrorDetail, EvaluationResult};
use crate::workspace::{self, WorkspacePaths};

pub use expected_diff::{ExpectedDiffConfig, ExpectedDiffEvaluator, DEFAULT_SIMILARITY_THRESHOLD};
pub use git_diff::{change_entropy, GitDiffConfig, GitDiffEvaluator};
pub use registry::{EvaluatorFactory, EvaluatorRegistry, RegistryError};

/// Read-only view shared by every evaluator of one run.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub paths: WorkspacePaths,
    pub agent_log: Arc<AgentLog>,
    pub config: Arc<RunConfig>,
}

impl EvaluationContext {
    pub fn new(paths: WorkspacePaths, agent_log: Arc<AgentLog>, config: Arc<RunConfig>) -> Self {
        Self {
            paths,
            agent_log,
            config,
        }
    }

    pub fn modified_dir(&self) -> &Path {
        &self.paths.modified_dir
    }

    pub fn expected_dir(&self) -> Option<&Path> {
        self.paths.expected_dir.as_deref()
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.paths.artifacts_dir
    }

    /// `<artifacts>/evaluators/<name>`; not created until an evaluator writes.
    pub fn evaluator_artifacts_dir(&self, name: &str) -> PathBuf {
        workspace::evaluator_artifacts_dir(&self.paths.artifacts_dir, name)
    }

    /// Configuration block of the first evaluator entry named `name`.
    pub fn evaluator_config(&self, name: &str) -> Option<&serde_json::Value> {
        self.config
            .evaluators
            .iter()
            .find(|e| e.name() == name)
            .map(|e| e.config())
    }

    /// Path of `file` relative to the artifacts directory, `/`-separated.
    pub fn artifact_ref(&self, file: &Path) -> String {
        file.strip_prefix(&self.paths.artifacts_dir)
            .unwrap_or(file)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Pluggable scorer.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Whether this evaluator needs the expected reference tree.
    fn requires_expected_reference(&self) -> bool {
        false
    }

    /// `Err` carries the reason the evaluator cannot run in `ctx`.
    async fn check_preconditions(&self, ctx: &EvaluationContext) -> std::result::Result<(), String> {
        if !ctx.modified_dir().is_dir() {
            return Err(format!(
                "modified tree {} does not exist",
                ctx.modified_dir().display()
            ));
        }
        if self.requires_expected_reference() {
            match ctx.expected_dir() {
                Some(dir) if dir.is_dir() => {}
                Some(dir) => {
                    return Err(format!("expected tree {} does not exist", dir.display()))
                }
                None => return Err("no expected reference branch configured".to_string()),
            }
        }
        Ok(())
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> EvaluationResult;
}

/// Parse an evaluator configuration block; `null` yields the defaults.
pub fn parse_config<T>(value: &serde_json::Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value.clone())?)
}

/// `skipped` result for a failure inside an evaluator.
pub fn skipped_with_error(
    evaluator: &str,
    message: impl Into<String>,
    error: impl std::fmt::Display,
) -> EvaluationResult {
    let message = message.into();
    EvaluationResult::skipped(
        evaluator,
        message.clone(),
        ErrorDetail::new(message).with_details(error.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::ExecutionResult;
    use crate::domain::config::{EvaluatorEntry, EvaluatorSpec};
    use chrono::Utc;
    use serde_json::json;

    fn context(root: &Path, expected: bool) -> EvaluationContext {
        let config = RunConfig::new("file:///repo", "command")
            .with_evaluator(EvaluatorEntry::Name("git-diff".to_string()))
            .with_evaluator(EvaluatorEntry::Detailed(EvaluatorSpec {
                name: "expected-diff".to_string(),
                config: json!({ "threshold": 0.5 }),
                config_file: None,
                timeout_ms: None,
            }));
        let paths = WorkspacePaths {
            modified_dir: root.join("modified"),
            expected_dir: expected.then(|| root.join("expected")),
            artifacts_dir: root.join("artifacts"),
        };
        let log = AgentLog::bare("command", ExecutionResult::failed(Utc::now(), "x"));
        EvaluationContext::new(paths, Arc::new(log), Arc::new(config))
    }

    struct NeedsExpected;

    #[async_trait]
    impl Evaluator for NeedsExpected {
        fn name(&self) -> &str {
            "needs-expected"
        }
        fn description(&self) -> &str {
            "test"
        }
        fn requires_expected_reference(&self) -> bool {
            true
        }
        async fn evaluate(&self, _ctx: &EvaluationContext) -> EvaluationResult {
            EvaluationResult::passed(self.name(), "ok")
        }
    }

    #[test]
    fn test_evaluator_config_lookup() {
        let ctx = context(Path::new("/tmp/run"), false);
        assert!(ctx.evaluator_config("git-diff").unwrap().is_null());
        assert_eq!(ctx.evaluator_config("expected-diff").unwrap()["threshold"], json!(0.5));
        assert!(ctx.evaluator_config("missing").is_none());
    }

    #[test]
    fn test_artifact_ref_is_relative() {
        let ctx = context(Path::new("/tmp/run"), false);
        let file = ctx.evaluator_artifacts_dir("git-diff").join("diff.patch");
        assert_eq!(ctx.artifact_ref(&file), "evaluators/git-diff/diff.patch");
    }

    #[tokio::test]
    async fn test_default_preconditions_require_expected_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("modified")).unwrap();

        let without = context(dir.path(), false);
        let err = NeedsExpected.check_preconditions(&without).await.unwrap_err();
        assert!(err.contains("no expected reference"));

        let missing = context(dir.path(), true);
        assert!(NeedsExpected.check_preconditions(&missing).await.is_err());

        std::fs::create_dir_all(dir.path().join("expected")).unwrap();
        assert!(NeedsExpected.check_preconditions(&missing).await.is_ok());
    }

    #[test]
    fn test_parse_config_defaults_on_null() {
        let cfg: GitDiffConfig = parse_config(&serde_json::Value::Null).unwrap();
        assert!(cfg.max_files_changed.is_none());
        assert!(parse_config::<GitDiffConfig>(&json!({ "max_files_changed": "many" })).is_err());
    }
}
