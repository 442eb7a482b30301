//! `git-diff` evaluator: change volume and change entropy.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::error::Result;
use crate::domain::result::EvaluationResult;
use crate::evaluator::{parse_config, skipped_with_error, EvaluationContext, Evaluator};
use crate::git;

pub const DEFAULT_BASE_REF: &str = "HEAD";
pub const PATCH_FILE_NAME: &str = "diff.patch";

/// Optional thresholds; an unset threshold is never checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GitDiffConfig {
    /// Revision to diff against. Defaults to `HEAD`.
    pub base_ref: Option<String>,
    pub max_files_changed: Option<u64>,
    pub max_lines_added: Option<u64>,
    pub max_lines_removed: Option<u64>,
    pub max_total_changes: Option<u64>,
    pub min_entropy: Option<f64>,
    pub max_entropy: Option<f64>,
}

impl GitDiffConfig {
    pub fn base_ref(&self) -> &str {
        self.base_ref.as_deref().unwrap_or(DEFAULT_BASE_REF)
    }
}

/// Line counts of one changed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub binary: bool,
    pub untracked: bool,
}

impl FileChange {
    pub fn total(&self) -> u64 {
        self.lines_added + self.lines_removed
    }
}

/// Aggregated diff statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffStats {
    pub files: Vec<FileChange>,
    pub lines_added: u64,
    pub lines_removed: u64,
    pub change_entropy: f64,
}

impl DiffStats {
    pub fn from_files(mut files: Vec<FileChange>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let lines_added = files.iter().map(|f| f.lines_added).sum();
        let lines_removed = files.iter().map(|f| f.lines_removed).sum();
        let totals: Vec<u64> = files.iter().map(FileChange::total).collect();
        Self {
            change_entropy: change_entropy(&totals),
            files,
            lines_added,
            lines_removed,
        }
    }

    pub fn files_changed(&self) -> u64 {
        self.files.len() as u64
    }

    pub fn total_changes(&self) -> u64 {
        self.lines_added + self.lines_removed
    }
}

/// Shannon entropy, in bits, of the distribution of changed lines.
///
/// `0.0` when nothing changed or a single file holds every change.
pub fn change_entropy(changes_per_file: &[u64]) -> f64 {
    let total: u64 = changes_per_file.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let entropy: f64 = changes_per_file
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum();
    if entropy > 0.0 {
        entropy
    } else {
        0.0
    }
}

pub struct GitDiffEvaluator {
    config: GitDiffConfig,
}

impl GitDiffEvaluator {
    pub const NAME: &'static str = "git-diff";

    pub fn new(config: GitDiffConfig) -> Self {
        Self { config }
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(Self::new(parse_config(value)?))
    }

    /// Threshold checks: assertion name to outcome, plus violation messages.
    fn check_thresholds(&self, stats: &DiffStats) -> (BTreeMap<String, bool>, Vec<String>) {
        let mut assertions = BTreeMap::new();
        let mut violations = Vec::new();
        let cfg = &self.config;

        let max_checks = [
            ("max_files_changed", cfg.max_files_changed, stats.files_changed()),
            ("max_lines_added", cfg.max_lines_added, stats.lines_added),
            ("max_lines_removed", cfg.max_lines_removed, stats.lines_removed),
            ("max_total_changes", cfg.max_total_changes, stats.total_changes()),
        ];
        for (name, limit, actual) in max_checks {
            if let Some(limit) = limit {
                let ok = actual <= limit;
                assertions.insert(name.to_string(), ok);
                if !ok {
                    violations.push(format!("{name}: {actual} > {limit}"));
                }
            }
        }

        if let Some(min) = cfg.min_entropy {
            let ok = stats.change_entropy >= min;
            assertions.insert("min_entropy".to_string(), ok);
            if !ok {
                violations.push(format!("min_entropy: {:.4} < {min}", stats.change_entropy));
            }
        }
        if let Some(max) = cfg.max_entropy {
            let ok = stats.change_entropy <= max;
            assertions.insert("max_entropy".to_string(), ok);
            if !ok {
                violations.push(format!("max_entropy: {:.4} > {max}", stats.change_entropy));
            }
        }

        (assertions, violations)
    }
}

/// Collect tracked and untracked changes of `dir` against `base`.
pub async fn collect_changes(dir: &Path, base: &str) -> Result<DiffStats> {
    let mut files: Vec<FileChange> = git::diff_numstat(dir, base)
        .await?
        .into_iter()
        .map(|e| FileChange {
            path: e.path,
            lines_added: e.added,
            lines_removed: e.removed,
            binary: e.binary,
            untracked: false,
        })
        .collect();

    for path in git::untracked_files(dir).await? {
        let bytes = tokio::fs::read(dir.join(&path)).await?;
        let binary = bytes.contains(&0);
        let lines_added = if binary {
            0
        } else {
            String::from_utf8_lossy(&bytes).lines().count() as u64
        };
        files.push(FileChange {
            path,
            lines_added,
            lines_removed: 0,
            binary,
            untracked: true,
        });
    }

    Ok(DiffStats::from_files(files))
}

/// Patch text for tracked changes followed by one patch per untracked file.
async fn full_patch(dir: &Path, base: &str, stats: &DiffStats) -> Result<String> {
    let mut patch = git::diff_patch(dir, base).await?;
    for file in stats.files.iter().filter(|f| f.untracked) {
        patch.push_str(&git::untracked_patch(dir, &file.path).await?);
    }
    Ok(patch)
}

#[async_trait]
impl Evaluator for GitDiffEvaluator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Counts changed files and lines and measures how spread out the change is"
    }

    async fn evaluate(&self, ctx: &EvaluationContext) -> EvaluationResult {
        let started = Instant::now();
        let dir = ctx.modified_dir();
        let base = self.config.base_ref();

        let stats = match collect_changes(dir, base).await {
            Ok(stats) => stats,
            Err(e) => {
                return skipped_with_error(Self::NAME, "failed to compute diff", e).timed(started)
            }
        };
        debug!(
            files = stats.files_changed(),
            entropy = stats.change_entropy,
            "diff collected"
        );

        let (assertions, violations) = self.check_thresholds(&stats);
        let summary = format!(
            "{} files changed, +{} -{}, entropy {:.3}",
            stats.files_changed(),
            stats.lines_added,
            stats.lines_removed,
            stats.change_entropy
        );
        let result = if violations.is_empty() {
            EvaluationResult::passed(Self::NAME, summary)
        } else {
            EvaluationResult::failed(
                Self::NAME,
                format!("{summary}; violations: {}", violations.join(", ")),
            )
        };

        let per_file: Vec<_> = stats
            .files
            .iter()
            .map(|f| {
                json!({
                    "path": f.path,
                    "lines_added": f.lines_added,
                    "lines_removed": f.lines_removed,
                    "binary": f.binary,
                    "untracked": f.untracked,
                })
            })
            .collect();

        let mut result = result
            .with_metric("base_ref", base)
            .with_metric("files_changed", stats.files_changed())
            .with_metric("lines_added", stats.lines_added)
            .with_metric("lines_removed", stats.lines_removed)
            .with_metric("total_changes", stats.total_changes())
            .with_metric("change_entropy", stats.change_entropy)
            .with_metric("per_file", per_file)
            .with_metric("violations", violations);
        if !assertions.is_empty() {
            result = result.with_assertions(assertions);
        }

        // The patch is informational; losing it never changes the verdict.
        let out_dir = ctx.evaluator_artifacts_dir(Self::NAME);
        let patch_path = out_dir.join(PATCH_FILE_NAME);
        let written = async {
            let patch = full_patch(dir, base, &stats).await?;
            tokio::fs::create_dir_all(&out_dir).await?;
            tokio::fs::write(&patch_path, patch).await?;
            Ok::<_, crate::domain::error::BenchError>(())
        }
        .await;
        match written {
            Ok(()) => result = result.with_artifact(ctx.artifact_ref(&patch_path)),
            Err(e) => warn!(evaluator = Self::NAME, error = %e, "failed to write diff artifact"),
        }

        result.timed(started)
    }
}
