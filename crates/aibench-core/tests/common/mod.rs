//! Shared fixtures: throwaway git repositories and scripted agents.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use aibench_core::{
    AgentConfig, AgentExecutor, AgentStatus, EvaluatorEntry, EvaluatorSpec, ExecutionResult,
    Orchestrator, RunConfig, WorkspaceOptions, WorkspacePaths,
};
use async_trait::async_trait;
use chrono::Utc;

pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A repository with `files` committed on `main`.
pub fn make_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["config", "user.name", "test-user"]);
    git(dir.path(), &["config", "user.email", "test@example.com"]);
    for (path, content) in files {
        write_file(dir.path(), path, content);
    }
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
    git(dir.path(), &["branch", "-M", "main"]);
    dir
}

/// Commit `files` on a new branch `name`, then switch back to `main`.
pub fn add_branch(repo: &Path, name: &str, files: &[(&str, &str)]) {
    git(repo, &["checkout", "--quiet", "-b", name]);
    for (path, content) in files {
        write_file(repo, path, content);
    }
    git(repo, &["add", "."]);
    git(repo, &["commit", "--quiet", "-m", name]);
    git(repo, &["checkout", "--quiet", "main"]);
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

pub fn config(repo: &Path, evaluators: &[&str]) -> RunConfig {
    let mut config = RunConfig::new(file_url(repo), "scripted").with_branch("main");
    for name in evaluators {
        config = config.with_evaluator(EvaluatorEntry::Name((*name).to_string()));
    }
    config
}

pub fn detailed(name: &str, config: serde_json::Value, timeout_ms: Option<u64>) -> EvaluatorEntry {
    EvaluatorEntry::Detailed(EvaluatorSpec {
        name: name.to_string(),
        config,
        config_file: None,
        timeout_ms,
    })
}

/// Agent that writes a fixed set of files into the modified tree.
pub struct ScriptedAgent {
    pub writes: Vec<(String, String)>,
    pub delay: Duration,
}

impl ScriptedAgent {
    pub fn writing(files: &[(&str, &str)]) -> Self {
        Self {
            writes: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            delay: Duration::ZERO,
        }
    }

    pub fn idle() -> Self {
        Self::writing(&[])
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    fn agent_type(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        paths: &WorkspacePaths,
        _config: &AgentConfig,
        timeout: Duration,
    ) -> aibench_core::Result<ExecutionResult> {
        let started_at = Utc::now();
        if self.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(ExecutionResult::timed_out(
                started_at,
                timeout.as_millis() as u64,
            ));
        }
        tokio::time::sleep(self.delay).await;
        for (path, content) in &self.writes {
            write_file(&paths.modified_dir, path, content);
        }
        let completed_at = Utc::now();
        Ok(ExecutionResult {
            exit_code: Some(0),
            status: AgentStatus::Success,
            raw_output: format!("wrote {} files", self.writes.len()),
            started_at,
            completed_at,
            duration_ms: aibench_core::domain::agent::elapsed_ms(started_at, completed_at),
            errors: Vec::new(),
        })
    }
}

pub struct Harness {
    pub workspaces: tempfile::TempDir,
    pub orchestrator: Orchestrator,
}

pub fn harness(agent: ScriptedAgent) -> Harness {
    let workspaces = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(Arc::new(agent), WorkspaceOptions::new(workspaces.path()));
    Harness {
        workspaces,
        orchestrator,
    }
}

/// Run directories currently present under `root`.
pub fn run_dirs(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default()
}
