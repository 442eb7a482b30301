//! `expected-diff` evaluator: similarity of the modified tree to a known-good
//! reference tree.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::domain::error::{BenchError, Result};
use crate::domain::result::EvaluationResult;
use crate::evaluator::similarity::file_similarity;
use crate::evaluator::{parse_config, skipped_with_error, EvaluationContext, Evaluator};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.80;
pub const REPORT_FILE_NAME: &str = "similarity-report.json";

const VCS_DIR: &str = ".git";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExpectedDiffConfig {
    /// Minimum aggregate similarity to pass.
    pub threshold: f64,
}

impl Default for ExpectedDiffConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Matched,
    Changed,
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileComparison {
    pub path: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Whole-tree comparison; written out as the similarity report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeComparison {
    pub aggregate_similarity: f64,
    pub mean_similarity: f64,
    pub structural_penalty: f64,
    pub files_matched: usize,
    pub files_changed: usize,
    pub files_added: usize,
    pub files_removed: usize,
    pub total_files: usize,
    pub files: Vec<FileComparison>,
}

impl TreeComparison {
    fn from_files(files: Vec<FileComparison>) -> Self {
        let count = |status: FileStatus| files.iter().filter(|f| f.status == status).count();
        let files_matched = count(FileStatus::Matched);
        let files_changed = count(FileStatus::Changed);
        let files_added = count(FileStatus::Added);
        let files_removed = count(FileStatus::Removed);
        let total_files = files.len();
        let comparable = files_matched + files_changed;

        let (mean_similarity, structural_penalty, aggregate_similarity) = if comparable == 0 {
            let aggregate = if total_files == 0 { 1.0 } else { 0.0 };
            (aggregate, if total_files == 0 { 0.0 } else { 1.0 }, aggregate)
        } else {
            let sum: f64 = files.iter().filter_map(|f| f.similarity).sum();
            let mean = sum / comparable as f64;
            let penalty = (files_added + files_removed) as f64 / total_files as f64;
            (mean, penalty, (mean - penalty).clamp(0.0, 1.0))
        };

        Self {
            aggregate_similarity,
            mean_similarity,
            structural_penalty,
            files_matched,
            files_changed,
            files_added,
            files_removed,
            total_files,
            files,
        }
    }
}

/// Relative `/`-separated path of every regular file under `root`,
/// excluding version-control metadata.
pub fn list_files(root: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != VCS_DIR);
    for entry in walker {
        let entry = entry.map_err(|e| BenchError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(key, entry.path().to_path_buf());
    }
    Ok(files)
}

/// Compare two trees file by file. Blocking; run off the async runtime.
pub fn compare_trees(modified: &Path, expected: &Path) -> Result<TreeComparison> {
    let modified_files = list_files(modified)?;
    let expected_files = list_files(expected)?;
    let paths: BTreeSet<&String> = modified_files.keys().chain(expected_files.keys()).collect();

    let files = paths
        .into_iter()
        .map(|path| match (modified_files.get(path), expected_files.get(path)) {
            (Some(m), Some(e)) => compare_file(path, m, e),
            (Some(_), None) => FileComparison {
                path: path.clone(),
                status: FileStatus::Added,
                similarity: None,
                error: None,
            },
            _ => FileComparison {
                path: path.clone(),
                status: FileStatus::Removed,
                similarity: None,
                error: None,
            },
        })
        .collect();

    Ok(TreeComparison::from_files(files))
}

fn compare_file(path: &str, modified: &Path, expected: &Path) -> FileComparison {
    let read = std::fs::read(modified).and_then(|m| Ok((m, std::fs::read(expected)?)));
    match read {
        Ok((m, e)) => {
            let similarity = file_similarity(&m, &e);
            FileComparison {
                path: path.to_string(),
                status: if m == e {
                    FileStatus::Matched
                } else {
                    FileStatus::Changed
                },
                similarity: Some(similarity),
                error: None,
            }
        }
        // Unreadable content scores as entirely different.
        Err(e) => FileComparison {
            path: path.to_string(),
            status: FileStatus::Changed,
            similarity: Some(0.0),
            error: Some(e.to_string()),
        },
    }
}

pub struct ExpectedDiffEvaluator {
    config: ExpectedDiffConfig,
}

impl ExpectedDiffEvaluator {
    pub const NAME: &'static str = "expected-diff";

    pub fn new(config: ExpectedDiffConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(BenchError::Config(format!(
                "threshold must be within [0, 1], got {}",
                config.threshold
            )));
        }
        Ok(Self { config })
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Self::new(parse_config(value)?)
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }
}

#[async_trait]
impl Evaluator for ExpectedDiffEvaluator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Scores how closely the modified tree matches the expected reference tree"
    }

    fn requires_expected_reference(&self) -> bool {
        true
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> EvaluationResult {
        let started = Instant::now();
        let Some(expected) = ctx.expected_dir().map(Path::to_path_buf) else {
            return skipped_with_error(
                Self::NAME,
                "no expected reference tree",
                "expected_branch is not configured",
            )
            .timed(started);
        };
        let modified = ctx.modified_dir().to_path_buf();

        let comparison =
            match tokio::task::spawn_blocking(move || compare_trees(&modified, &expected)).await {
                Ok(Ok(comparison)) => comparison,
                Ok(Err(e)) => {
                    return skipped_with_error(Self::NAME, "failed to compare trees", e)
                        .timed(started)
                }
                Err(e) => {
                    return skipped_with_error(Self::NAME, "tree comparison aborted", e)
                        .timed(started)
                }
            };

        let threshold = self.config.threshold;
        let aggregate = comparison.aggregate_similarity;
        let message = format!(
            "aggregate similarity {aggregate:.3} (threshold {threshold:.2}); {} matched, {} changed, {} added, {} removed",
            comparison.files_matched,
            comparison.files_changed,
            comparison.files_added,
            comparison.files_removed
        );
        let result = if aggregate >= threshold {
            EvaluationResult::passed(Self::NAME, message)
        } else {
            EvaluationResult::failed(Self::NAME, message)
        };

        let mut result = result
            .with_metric("aggregate_similarity", aggregate)
            .with_metric("mean_similarity", comparison.mean_similarity)
            .with_metric("structural_penalty", comparison.structural_penalty)
            .with_metric("files_matched", comparison.files_matched as u64)
            .with_metric("files_changed", comparison.files_changed as u64)
            .with_metric("files_added", comparison.files_added as u64)
            .with_metric("files_removed", comparison.files_removed as u64)
            .with_metric("total_files", comparison.total_files as u64)
            .with_metric("threshold", threshold);

        let mut assertions = BTreeMap::new();
        assertions.insert("min_similarity".to_string(), aggregate >= threshold);
        result = result.with_assertions(assertions);

        let out_dir = ctx.evaluator_artifacts_dir(Self::NAME);
        let report_path = out_dir.join(REPORT_FILE_NAME);
        let written = async {
            let body = serde_json::to_vec_pretty(&comparison)?;
            tokio::fs::create_dir_all(&out_dir).await?;
            tokio::fs::write(&report_path, body).await?;
            Ok::<_, BenchError>(())
        }
        .await;
        match written {
            Ok(()) => result = result.with_artifact(ctx.artifact_ref(&report_path)),
            Err(e) => warn!(evaluator = Self::NAME, error = %e, "failed to write similarity report"),
        }

        result.timed(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn identical_trees_score_one() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for root in [a.path(), b.path()] {
            write(root, "src/lib.rs", "fn main() {}\n");
            write(root, "README.md", "hello\n");
            write(root, ".git/HEAD", &format!("ref: {}\n", root.display()));
        }

        let cmp = compare_trees(a.path(), b.path()).unwrap();
        assert_eq!(cmp.aggregate_similarity, 1.0);
        assert_eq!(cmp.files_matched, 2);
        assert_eq!(cmp.total_files, 2);
        assert_eq!(cmp.structural_penalty, 0.0);
    }

    #[test]
    fn added_and_removed_files_are_penalized() {
        let modified = tempfile::tempdir().unwrap();
        let expected = tempfile::tempdir().unwrap();
        write(modified.path(), "same.txt", "x\n");
        write(expected.path(), "same.txt", "x\n");
        write(modified.path(), "extra.txt", "new\n");
        write(expected.path(), "gone.txt", "old\n");

        let cmp = compare_trees(modified.path(), expected.path()).unwrap();
        assert_eq!(cmp.files_added, 1);
        assert_eq!(cmp.files_removed, 1);
        assert_eq!(cmp.mean_similarity, 1.0);
        assert!((cmp.structural_penalty - 2.0 / 3.0).abs() < 1e-12);
        assert!((cmp.aggregate_similarity - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_trees_and_disjoint_trees() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        assert_eq!(compare_trees(a.path(), b.path()).unwrap().aggregate_similarity, 1.0);

        write(a.path(), "only-a.txt", "a\n");
        write(b.path(), "only-b.txt", "b\n");
        assert_eq!(compare_trees(a.path(), b.path()).unwrap().aggregate_similarity, 0.0);
    }

    #[test]
    fn changed_file_scores_partial_similarity() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "f.txt", "1\n2\n3\n4\n");
        write(b.path(), "f.txt", "1\n2\n3\nfour\n");

        let cmp = compare_trees(a.path(), b.path()).unwrap();
        assert_eq!(cmp.files_changed, 1);
        assert!((cmp.aggregate_similarity - 0.75).abs() < 1e-12);
        assert_eq!(cmp.files[0].status, FileStatus::Changed);
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        assert!(ExpectedDiffEvaluator::from_value(&serde_json::json!({ "threshold": 1.5 })).is_err());
        let evaluator = ExpectedDiffEvaluator::from_value(&serde_json::Value::Null).unwrap();
        assert_eq!(evaluator.threshold(), DEFAULT_SIMILARITY_THRESHOLD);
    }

    #[tokio::test]
    async fn missing_reference_tree_is_skipped() {
        use crate::domain::agent::{AgentLog, ExecutionResult};
        use crate::domain::config::RunConfig;
        use crate::domain::result::EvaluationStatus;
        use crate::workspace::WorkspacePaths;
        use std::sync::Arc;

        let root = tempfile::tempdir().unwrap();
        let paths = WorkspacePaths {
            modified_dir: root.path().join("modified"),
            expected_dir: None,
            artifacts_dir: root.path().join("artifacts"),
        };
        let log = AgentLog::bare("command", ExecutionResult::failed(chrono::Utc::now(), "x"));
        let config = RunConfig::new("file:///repo", "command");
        let ctx = EvaluationContext::new(paths, Arc::new(log), Arc::new(config));

        let evaluator = ExpectedDiffEvaluator::from_value(&serde_json::Value::Null).unwrap();
        let result = evaluator.evaluate(&ctx).await;
        assert_eq!(result.status, EvaluationStatus::Skipped);
        assert_eq!(result.message, "no expected reference tree");
        assert_eq!(
            result.error.unwrap().details.as_deref(),
            Some("expected_branch is not configured")
        );
        assert!(!root.path().join("artifacts").exists());
    }
}
