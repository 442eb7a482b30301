//! Structured lifecycle events for evaluation runs.
//!
//! Every event carries an `event` field so log pipelines can filter on it,
//! e.g. `event=evaluator.finished`.

use tracing::info;

use crate::domain::{AgentStatus, EvaluationStatus, OverallStatus};

/// Span covering one run. Attach it to the run future with
/// [`tracing::Instrument::instrument`] so it follows the task across awaits.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("aibench.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, repo_url: &str, evaluators: usize) {
    info!(event = "run.started", run_id = %run_id, repo = %repo_url, evaluators);
}

pub fn emit_agent_finished(run_id: &str, status: AgentStatus, duration_ms: u64) {
    info!(
        event = "agent.finished",
        run_id = %run_id,
        status = %status,
        duration_ms,
    );
}

pub fn emit_evaluator_finished(
    run_id: &str,
    evaluator: &str,
    status: EvaluationStatus,
    duration_ms: u64,
) {
    info!(
        event = "evaluator.finished",
        run_id = %run_id,
        evaluator = %evaluator,
        status = %status,
        duration_ms,
    );
}

pub fn emit_run_finished(run_id: &str, status: OverallStatus, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms,
    );
}

/// Cleanup problems are warnings: they never change a run's outcome.
pub fn emit_cleanup_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "cleanup.error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_and_events_do_not_panic() {
        let _guard = run_span("run-1").entered();
        emit_run_started("run-1", "file:///repo", 2);
        emit_agent_finished("run-1", AgentStatus::Timeout, 10);
        emit_evaluator_finished("run-1", "git-diff", EvaluationStatus::Passed, 3);
        emit_run_finished("run-1", OverallStatus::Partial, 20);
        emit_cleanup_error("run-1", &"permission denied");
    }
}
