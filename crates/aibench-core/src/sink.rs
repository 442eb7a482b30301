//! Result Sink: persistence of the bundle and agent log.
//!
//! Layout inside a run:
//! - `artifacts/results.json`
//! - `artifacts/agent-log.json`
//!
//! With a results root, the artifacts tree is archived to
//! `<results_root>/<run_id>/` and one line is appended to
//! `<results_root>/history.jsonl`, so results outlive workspace cleanup.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::agent::AgentLog;
use crate::domain::error::{BenchError, Result};
use crate::domain::result::{OverallStatus, ResultSummary, ResultsBundle};

pub const RESULTS_FILE_NAME: &str = "results.json";
pub const AGENT_LOG_FILE_NAME: &str = "agent-log.json";
pub const HISTORY_FILE_NAME: &str = "history.jsonl";

/// Where a persisted run ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRun {
    pub results_path: PathBuf,
    pub agent_log_path: PathBuf,
    /// Archived copy of the artifacts tree, when a results root is set.
    pub archive_dir: Option<PathBuf>,
}

/// One line of `history.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub run_id: String,
    pub repo_url: String,
    pub config_digest: String,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub overall_status: OverallStatus,
    pub summary: ResultSummary,
    pub results_path: PathBuf,
}

/// Persists a finished run.
pub trait ResultSink: Send + Sync {
    fn persist(
        &self,
        bundle: &ResultsBundle,
        agent_log: &AgentLog,
        artifacts_dir: &Path,
    ) -> Result<PersistedRun>;
}

/// Filesystem sink.
#[derive(Debug, Clone, Default)]
pub struct FsResultSink {
    results_root: Option<PathBuf>,
}

impl FsResultSink {
    /// Sink that writes only into the run's artifacts directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that also archives every run under `results_root`.
    pub fn with_results_root(results_root: impl Into<PathBuf>) -> Self {
        Self {
            results_root: Some(results_root.into()),
        }
    }

    pub fn results_root(&self) -> Option<&Path> {
        self.results_root.as_deref()
    }

    fn archive(&self, root: &Path, bundle: &ResultsBundle, artifacts_dir: &Path) -> Result<PathBuf> {
        let dest = root.join(&bundle.run.run_id);
        copy_tree(artifacts_dir, &dest)?;

        let entry = HistoryEntry {
            run_id: bundle.run.run_id.clone(),
            repo_url: bundle.run.repo_url.clone(),
            config_digest: bundle.run.config_digest.clone(),
            completed_at: bundle.execution.completed_at,
            duration_ms: bundle.execution.duration_ms,
            overall_status: bundle.summary.overall_status,
            summary: bundle.summary.clone(),
            results_path: dest.join(RESULTS_FILE_NAME),
        };
        append_jsonl(&root.join(HISTORY_FILE_NAME), &entry)?;
        Ok(dest)
    }
}

impl ResultSink for FsResultSink {
    fn persist(
        &self,
        bundle: &ResultsBundle,
        agent_log: &AgentLog,
        artifacts_dir: &Path,
    ) -> Result<PersistedRun> {
        fs::create_dir_all(artifacts_dir)?;
        let agent_log_path = artifacts_dir.join(AGENT_LOG_FILE_NAME);
        write_json_atomic(&agent_log_path, agent_log)?;
        let results_path = artifacts_dir.join(RESULTS_FILE_NAME);
        write_json_atomic(&results_path, bundle)?;

        let archive_dir = match &self.results_root {
            Some(root) => Some(self.archive(root, bundle, artifacts_dir)?),
            None => None,
        };
        debug!(
            results = %results_path.display(),
            archived = archive_dir.is_some(),
            "run persisted"
        );

        Ok(PersistedRun {
            results_path,
            agent_log_path,
            archive_dir,
        })
    }
}

/// Pretty JSON written to a sibling temp file, then renamed into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&body)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| BenchError::Io(e.error))?;
    Ok(())
}

/// Append `value` as one line. The line is written with a single call.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}

/// Read every entry of a `history.jsonl`, skipping malformed lines.
pub fn read_history(path: &Path) -> Result<Vec<HistoryEntry>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| BenchError::Io(e.into()))?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
