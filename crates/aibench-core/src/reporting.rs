use anyhow::{Context, Result};
use std::path::Path;

use crate::domain::result::{EvaluationResult, ResultsBundle};

/// Read a persisted `results.json`.
pub fn read_results_json(path: &Path) -> Result<ResultsBundle> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parse {:?}", path))
}

/// Write results.json in pretty JSON format.
pub fn write_results_json(path: &Path, bundle: &ResultsBundle) -> Result<()> {
    let content = serde_json::to_string_pretty(bundle).context("serialize results bundle")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn headline_metric(result: &EvaluationResult) -> String {
    for key in ["aggregate_similarity", "change_entropy"] {
        if let Some(v) = result.metrics.get(key).and_then(|v| v.as_f64()) {
            return format!("{key}={v:.3}");
        }
    }
    "-".to_string()
}

/// Render the markdown run summary.
pub fn render_summary_md(bundle: &ResultsBundle) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Run {}\n\n", bundle.run.run_id));
    out.push_str(&format!(
        "- overall: **{}**\n- repository: `{}`\n- commit: `{}`\n- agent: {} ({}, {} ms)\n\n",
        bundle.summary.overall_status,
        bundle.run.repo_url,
        bundle.execution.workspace.modified_commit,
        bundle.agent.agent_type,
        bundle.agent.status,
        bundle.agent.duration_ms
    ));

    out.push_str("## Summary\n");
    out.push_str(&format!(
        "- total: {}\n- passed: {}\n- failed: {}\n- skipped: {}\n\n",
        bundle.summary.total, bundle.summary.passed, bundle.summary.failed, bundle.summary.skipped
    ));

    if !bundle.evaluations.is_empty() {
        out.push_str("## Evaluators\n");
        out.push_str("| evaluator | status | metric | message |\n");
        out.push_str("|---|---|---|---|\n");
        for result in &bundle.evaluations {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                table_cell(&result.evaluator),
                result.status,
                headline_metric(result),
                table_cell(&result.message)
            ));
        }
        out.push('\n');
    }

    if !bundle.agent.errors.is_empty() {
        out.push_str("## Agent Errors\n");
        for err in &bundle.agent.errors {
            out.push_str(&format!("- {}\n", table_cell(err)));
        }
        out.push('\n');
    }
    out
}

/// Write summary.md.
pub fn write_summary_md(path: &Path, bundle: &ResultsBundle) -> Result<()> {
    let md = render_summary_md(bundle);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentLog, ExecutionResult};
    use crate::domain::config::RunConfig;
    use crate::domain::result::{
        AgentSummary, EnvironmentSnapshot, ErrorDetail, ExecutionSection, ResultSummary,
        RunSection, RESULTS_SCHEMA_VERSION,
    };
    use crate::workspace::WorkspaceInfo;
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .expect("parse RFC3339")
            .with_timezone(&Utc)
    }

    fn bundle() -> ResultsBundle {
        let t = fixed_time();
        let mut execution = ExecutionResult::failed(t, "exit status 3");
        execution.started_at = t;
        execution.completed_at = t;
        execution.duration_ms = 1200;
        let log = AgentLog::bare("command", execution);

        let mut diff = EvaluationResult::passed("git-diff", "2 files changed")
            .with_metric("change_entropy", 1.0);
        diff.timestamp = t;
        let mut judge = EvaluationResult::skipped(
            "judge",
            "unknown evaluator: judge",
            ErrorDetail::new("unknown evaluator: judge"),
        );
        judge.timestamp = t;
        let evaluations = vec![diff, judge];

        let config = RunConfig::new("file:///repo", "command");
        ResultsBundle {
            schema_version: RESULTS_SCHEMA_VERSION.to_string(),
            run: RunSection {
                run_id: "repo-20260101-000000-000".to_string(),
                repo_url: config.repo_url.clone(),
                branch: None,
                commit: None,
                expected_branch: None,
                config_digest: "abc".to_string(),
                config,
            },
            execution: ExecutionSection {
                started_at: t,
                completed_at: t,
                duration_ms: 1500,
                environment: EnvironmentSnapshot::capture(),
                workspace: WorkspaceInfo {
                    run_id: "repo-20260101-000000-000".to_string(),
                    root: PathBuf::from("/tmp/ws"),
                    modified_dir: PathBuf::from("/tmp/ws/modified"),
                    expected_dir: None,
                    artifacts_dir: PathBuf::from("/tmp/ws/artifacts"),
                    lock_path: PathBuf::from("/tmp/ws/.aibench.lock"),
                    modified_commit: "deadbeef".to_string(),
                    expected_commit: None,
                    created_at: t,
                },
            },
            agent: AgentSummary::from(&log),
            summary: ResultSummary::from_results(&evaluations),
            evaluations,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn summary_markdown_render_is_stable() {
        let actual = render_summary_md(&bundle());
        let expected = "# Run repo-20260101-000000-000\n\n\
- overall: **partial**\n- repository: `file:///repo`\n- commit: `deadbeef`\n- agent: command (failed, 1200 ms)\n\n\
## Summary\n- total: 2\n- passed: 1\n- failed: 0\n- skipped: 1\n\n\
## Evaluators\n| evaluator | status | metric | message |\n|---|---|---|---|\n\
| git-diff | passed | change_entropy=1.000 | 2 files changed |\n\
| judge | skipped | - | unknown evaluator: judge |\n\n\
## Agent Errors\n- exit status 3\n\n";
        assert_eq!(actual, expected);
    }

    #[test]
    fn results_json_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let original = bundle();
        write_results_json(&path, &original).unwrap();
        let loaded = read_results_json(&path).unwrap();
        assert_eq!(loaded.summary, original.summary);
        assert_eq!(loaded.evaluations[1].evaluator, "judge");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["summary"]["overall_status"], "partial");
        assert_eq!(raw["evaluations"][0]["status"], "passed");
    }

    #[test]
    fn table_cells_escape_pipes() {
        assert_eq!(table_cell("a|b\nc"), "a\\|b c");
    }
}
