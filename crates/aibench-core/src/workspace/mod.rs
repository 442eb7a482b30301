//! Isolated, lock-protected, disposable run workspaces.
//!
//! Layout of one run directory:
//!
//! ```text
//! <root>/<run_id>/
//!   .aibench.lock
//!   modified/            agent edits this checkout
//!   expected/            optional reference checkout
//!   artifacts/
//!     evaluators/<name>/
//! ```

pub mod naming;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::domain::config::RunConfig;
use crate::domain::error::{BenchError, Result};
use crate::git::{self, CloneTarget};
use crate::lock::{self, LockHandle, LOCK_FILE_NAME};

pub const MODIFIED_DIR: &str = "modified";
pub const EXPECTED_DIR: &str = "expected";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const EVALUATOR_ARTIFACTS_DIR: &str = "evaluators";

/// Directories handed across the agent boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub modified_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_dir: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
}

/// Serializable description of a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub run_id: String,
    pub root: PathBuf,
    pub modified_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_dir: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
    pub lock_path: PathBuf,
    pub modified_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_commit: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A live run workspace. Owned by exactly one orchestrator run.
#[derive(Debug)]
pub struct Workspace {
    pub run_id: String,
    pub root: PathBuf,
    pub modified_dir: PathBuf,
    pub expected_dir: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
    pub lock_path: PathBuf,
    pub repo_url: String,
    pub modified_commit: String,
    pub expected_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    lock: Option<LockHandle>,
}

impl Workspace {
    pub fn paths(&self) -> WorkspacePaths {
        WorkspacePaths {
            modified_dir: self.modified_dir.clone(),
            expected_dir: self.expected_dir.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
        }
    }

    /// Artifact directory reserved for one evaluator.
    pub fn evaluator_artifacts_dir(&self, evaluator: &str) -> PathBuf {
        evaluator_artifacts_dir(&self.artifacts_dir, evaluator)
    }

    /// Whether this handle still holds the workspace lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

/// `<artifacts>/evaluators/<name>`.
pub fn evaluator_artifacts_dir(artifacts_dir: &Path, evaluator: &str) -> PathBuf {
    artifacts_dir
        .join(EVALUATOR_ARTIFACTS_DIR)
        .join(naming::sanitize_name(evaluator))
}

async fn clear_stale_tree(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            warn!(dir = %dir.display(), "removed leftover checkout");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BenchError::Workspace(format!(
            "remove leftover {}: {e}",
            dir.display()
        ))),
    }
}

/// Creates and tears down run workspaces under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a run with `run_id` would occupy.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(naming::sanitize_name(run_id))
    }

    fn allocate_run_id(&self, config: &RunConfig, run_id: Option<&str>) -> String {
        if let Some(id) = run_id {
            return naming::sanitize_name(id);
        }
        let base = naming::base_name(config);
        loop {
            let id = naming::generate_run_id(&base, Utc::now());
            if !self.root.join(&id).exists() {
                return id;
            }
        }
    }

    /// Build a locked workspace with the repository cloned into it.
    ///
    /// A busy lock fails with [`BenchError::WorkspaceLocked`] and leaves the
    /// directory untouched. Any later failure releases the lock and removes
    /// the run directory before returning.
    #[instrument(skip(self, config), fields(repo = %config.repo_url))]
    pub async fn create_workspace(
        &self,
        config: &RunConfig,
        run_id: Option<&str>,
    ) -> Result<Workspace> {
        let run_id = self.allocate_run_id(config, run_id);
        let root = self.root.join(&run_id);
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            BenchError::Workspace(format!("create {}: {e}", root.display()))
        })?;

        let lock_path = root.join(LOCK_FILE_NAME);
        let handle = lock::acquire(&lock_path, &config.repo_url)?;

        let artifacts_dir = root.join(ARTIFACTS_DIR);
        let mut workspace = Workspace {
            run_id,
            modified_dir: root.join(MODIFIED_DIR),
            expected_dir: config
                .expected_branch
                .as_ref()
                .map(|_| root.join(EXPECTED_DIR)),
            artifacts_dir,
            lock_path,
            repo_url: config.repo_url.clone(),
            modified_commit: String::new(),
            expected_commit: None,
            created_at: Utc::now(),
            root,
            lock: Some(handle),
        };

        match self.populate(&mut workspace, config).await {
            Ok(()) => {
                info!(
                    run_id = %workspace.run_id,
                    commit = %workspace.modified_commit,
                    "workspace ready"
                );
                Ok(workspace)
            }
            Err(e) => {
                warn!(run_id = %workspace.run_id, error = %e, "workspace setup failed");
                self.cleanup(&mut workspace).await;
                Err(e)
            }
        }
    }

    async fn populate(&self, workspace: &mut Workspace, config: &RunConfig) -> Result<()> {
        // A crashed run with the same id may have left checkouts behind.
        clear_stale_tree(&workspace.modified_dir).await?;
        if let Some(expected_dir) = &workspace.expected_dir {
            clear_stale_tree(expected_dir).await?;
        }

        let evaluators_dir = workspace.artifacts_dir.join(EVALUATOR_ARTIFACTS_DIR);
        tokio::fs::create_dir_all(&evaluators_dir)
            .await
            .map_err(|e| {
                BenchError::Workspace(format!("create {}: {e}", evaluators_dir.display()))
            })?;

        let target = CloneTarget::from_refs(config.branch.as_deref(), config.commit.as_deref());
        git::clone_repo(&config.repo_url, &workspace.modified_dir, &target)
            .await
            .map_err(|e| BenchError::CloneFailed {
                repo: config.repo_url.clone(),
                reason: e.to_string(),
            })?;
        workspace.modified_commit = git::capture_head_sha(&workspace.modified_dir)
            .await
            .map_err(|e| BenchError::CloneFailed {
                repo: config.repo_url.clone(),
                reason: e.to_string(),
            })?;
        debug!(commit = %workspace.modified_commit, "modified tree cloned");

        if let (Some(branch), Some(expected_dir)) =
            (&config.expected_branch, &workspace.expected_dir)
        {
            let not_found = |e: BenchError| BenchError::ExpectedBranchNotFound {
                repo: config.repo_url.clone(),
                branch: branch.clone(),
                reason: e.to_string(),
            };
            let target = CloneTarget::from_refs(Some(branch), None);
            git::clone_repo(&config.repo_url, expected_dir, &target)
                .await
                .map_err(not_found)?;
            let sha = git::capture_head_sha(expected_dir)
                .await
                .map_err(not_found)?;
            debug!(commit = %sha, "expected tree cloned");
            workspace.expected_commit = Some(sha);
        }

        if let Some(handle) = workspace.lock.as_mut() {
            handle.refresh()?;
        }
        Ok(())
    }

    pub fn get_info(&self, workspace: &Workspace) -> WorkspaceInfo {
        WorkspaceInfo {
            run_id: workspace.run_id.clone(),
            root: workspace.root.clone(),
            modified_dir: workspace.modified_dir.clone(),
            expected_dir: workspace.expected_dir.clone(),
            artifacts_dir: workspace.artifacts_dir.clone(),
            lock_path: workspace.lock_path.clone(),
            modified_commit: workspace.modified_commit.clone(),
            expected_commit: workspace.expected_commit.clone(),
            created_at: workspace.created_at,
        }
    }

    /// Release the lock but keep the directory for inspection.
    pub fn release_lock(&self, workspace: &mut Workspace) {
        if let Some(handle) = workspace.lock.take() {
            handle.release();
        }
    }

    /// Release the lock, then remove the run directory.
    ///
    /// Both steps are best-effort and logged; calling this again is a no-op.
    pub async fn cleanup(&self, workspace: &mut Workspace) {
        self.release_lock(workspace);

        match tokio::fs::remove_dir_all(&workspace.root).await {
            Ok(()) => debug!(root = %workspace.root.display(), "workspace removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => crate::obs::emit_cleanup_error(&workspace.run_id, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_is_sanitized() {
        let manager = WorkspaceManager::new("/tmp/aibench");
        assert_eq!(
            manager.run_dir("../escape me"),
            PathBuf::from("/tmp/aibench/escape-me")
        );
    }

    #[test]
    fn evaluator_artifacts_dir_is_nested() {
        let dir = evaluator_artifacts_dir(Path::new("/a/artifacts"), "git-diff");
        assert_eq!(dir, PathBuf::from("/a/artifacts/evaluators/git-diff"));
    }

    #[tokio::test]
    async fn clone_failure_removes_run_dir() {
        let root = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(root.path());
        let missing = root.path().join("no-such-repo");
        let config = RunConfig::new(format!("file://{}", missing.display()), "command");

        let err = manager
            .create_workspace(&config, Some("broken"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CLONE_FAILED");
        assert!(!manager.run_dir("broken").exists());
    }
}
