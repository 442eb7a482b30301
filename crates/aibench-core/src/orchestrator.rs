//! Run orchestration.
//!
//! One run moves through: workspace acquisition, agent execution, evaluator
//! fan-out, aggregation, persistence and cleanup. Only configuration and
//! workspace-acquisition failures escape [`Orchestrator::run_evaluation`];
//! everything after the workspace exists lands inside the bundle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn, Instrument};

use crate::agent::AgentExecutor;
use crate::domain::agent::{AgentLog, ExecutionResult};
use crate::domain::config::{EvaluatorEntry, RunConfig};
use crate::domain::error::Result;
use crate::domain::result::{
    AgentSummary, ArtifactEntry, EnvironmentSnapshot, ErrorDetail, EvaluationResult,
    EvaluationStatus, ExecutionSection, ResultSummary, ResultsBundle, RunSection,
    RESULTS_SCHEMA_VERSION,
};
use crate::evaluator::{EvaluationContext, EvaluatorRegistry, RegistryError};
use crate::git;
use crate::metrics::METRICS;
use crate::obs;
use crate::sink::{FsResultSink, ResultSink, AGENT_LOG_FILE_NAME, RESULTS_FILE_NAME};
use crate::workspace::{Workspace, WorkspaceManager};

/// Message of every evaluator skipped by the no-change policy.
pub const NO_CHANGES_MESSAGE: &str = "agent produced no changes";

/// Slack granted to an agent adapter past the configured timeout before the
/// orchestrator stops waiting on it.
const AGENT_GRACE: Duration = Duration::from_secs(30);

/// Where workspaces live and whether they survive the run.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    pub root: PathBuf,
    /// Release the lock but leave the run directory on disk.
    pub keep_workspace: bool,
}

impl WorkspaceOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_workspace: false,
        }
    }

    pub fn keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }
}

/// Drives evaluation runs.
pub struct Orchestrator {
    agent: Arc<dyn AgentExecutor>,
    evaluators: Arc<EvaluatorRegistry>,
    workspaces: WorkspaceManager,
    keep_workspace: bool,
    run_id: Option<String>,
    sink: Arc<dyn ResultSink>,
}

impl Orchestrator {
    /// Orchestrator with the built-in evaluators and an in-workspace sink.
    pub fn new(agent: Arc<dyn AgentExecutor>, options: WorkspaceOptions) -> Self {
        Self {
            agent,
            evaluators: Arc::new(EvaluatorRegistry::with_builtins()),
            workspaces: WorkspaceManager::new(options.root),
            keep_workspace: options.keep_workspace,
            run_id: None,
            sink: Arc::new(FsResultSink::new()),
        }
    }

    pub fn with_evaluators(mut self, registry: EvaluatorRegistry) -> Self {
        self.evaluators = Arc::new(registry);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Use an explicit run id instead of a generated one.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Execute one complete evaluation of `config`.
    #[instrument(skip_all, fields(repo = %config.repo_url))]
    pub async fn run_evaluation(&self, config: Arc<RunConfig>) -> Result<ResultsBundle> {
        config.validate()?;
        let config_digest = config.digest()?;
        METRICS.inc_runs_started();

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut workspace = self
            .workspaces
            .create_workspace(&config, self.run_id.as_deref())
            .await?;

        let span = obs::run_span(&workspace.run_id);
        let bundle = self
            .run_in_workspace(&workspace, config, config_digest, started_at, clock)
            .instrument(span)
            .await;

        if self.keep_workspace {
            self.workspaces.release_lock(&mut workspace);
            info!(root = %workspace.root.display(), "workspace kept");
        } else {
            self.workspaces.cleanup(&mut workspace).await;
        }
        METRICS.flush();
        Ok(bundle)
    }

    async fn run_in_workspace(
        &self,
        workspace: &Workspace,
        config: Arc<RunConfig>,
        config_digest: String,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
    ) -> ResultsBundle {
        let run_id = workspace.run_id.clone();
        obs::emit_run_started(&run_id, &config.repo_url, config.evaluators.len());

        let agent_log = Arc::new(self.run_agent(workspace, &config).await);
        obs::emit_agent_finished(
            &run_id,
            agent_log.execution.status,
            agent_log.execution.duration_ms,
        );

        let ctx = Arc::new(EvaluationContext::new(
            workspace.paths(),
            Arc::clone(&agent_log),
            Arc::clone(&config),
        ));
        let evaluations = if config.skip_evaluators_on_no_changes
            && !self.tree_changed(workspace).await
        {
            info!("agent left the tree unchanged; skipping evaluators");
            config
                .evaluators
                .iter()
                .map(|entry| {
                    EvaluationResult::skipped(
                        entry.name(),
                        NO_CHANGES_MESSAGE,
                        ErrorDetail::new(NO_CHANGES_MESSAGE),
                    )
                })
                .collect()
        } else {
            self.run_evaluators(&ctx).await
        };

        for result in &evaluations {
            if result.status == EvaluationStatus::Skipped {
                METRICS.inc_evaluators_skipped();
            }
            obs::emit_evaluator_finished(
                &run_id,
                &result.evaluator,
                result.status,
                result.duration_ms,
            );
        }

        let summary = ResultSummary::from_results(&evaluations);
        let completed_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;

        let mut artifacts = vec![
            ArtifactEntry {
                evaluator: None,
                path: RESULTS_FILE_NAME.to_string(),
            },
            ArtifactEntry {
                evaluator: None,
                path: AGENT_LOG_FILE_NAME.to_string(),
            },
        ];
        for result in &evaluations {
            for path in result.artifacts.iter().flatten() {
                artifacts.push(ArtifactEntry {
                    evaluator: Some(result.evaluator.clone()),
                    path: path.clone(),
                });
            }
        }

        let bundle = ResultsBundle {
            schema_version: RESULTS_SCHEMA_VERSION.to_string(),
            run: RunSection {
                run_id: run_id.clone(),
                repo_url: config.repo_url.clone(),
                branch: config.branch.clone(),
                commit: config.commit.clone(),
                expected_branch: config.expected_branch.clone(),
                config_digest,
                config: (*config).clone(),
            },
            execution: ExecutionSection {
                started_at,
                completed_at,
                duration_ms,
                environment: EnvironmentSnapshot::capture(),
                workspace: self.workspaces.get_info(workspace),
            },
            agent: AgentSummary::from(agent_log.as_ref()),
            evaluations,
            summary,
            artifacts,
        };

        self.persist(&bundle, &agent_log, workspace).await;
        obs::emit_run_finished(&run_id, bundle.summary.overall_status, duration_ms);
        bundle
    }

    /// Run the agent; every failure mode becomes an execution record.
    async fn run_agent(&self, workspace: &Workspace, config: &RunConfig) -> AgentLog {
        let agent_type = config.agent.agent_type.clone();
        let timeout = config.timeout();
        let started_at = Utc::now();
        let paths = workspace.paths();

        let execution = match tokio::time::timeout(
            timeout + AGENT_GRACE,
            self.agent.execute(&paths, &config.agent, timeout),
        )
        .await
        {
            Ok(Ok(execution)) => execution,
            Ok(Err(e)) => {
                warn!(agent = %agent_type, error = %e, "agent execution failed");
                ExecutionResult::failed(started_at, e.to_string())
            }
            Err(_) => {
                warn!(agent = %agent_type, "agent adapter ignored its timeout");
                ExecutionResult::timed_out(started_at, timeout.as_millis() as u64)
            }
        };

        let raw_output = execution.raw_output.clone();
        let mut log = self.agent.normalize_log(&raw_output, &execution);
        // The log must describe the execution the orchestrator observed.
        log.status = execution.status;
        log.execution = execution;
        log
    }

    async fn tree_changed(&self, workspace: &Workspace) -> bool {
        match git::has_changes(&workspace.modified_dir).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(error = %e, "could not inspect modified tree; running evaluators");
                true
            }
        }
    }

    /// Spawn every configured evaluator and collect results in config order.
    async fn run_evaluators(&self, ctx: &Arc<EvaluationContext>) -> Vec<EvaluationResult> {
        let entries = ctx.config.evaluators.clone();
        let handles: Vec<(String, JoinHandle<EvaluationResult>)> = entries
            .into_iter()
            .map(|entry| {
                let name = entry.name().to_string();
                let ctx = Arc::clone(ctx);
                let registry = Arc::clone(&self.evaluators);
                let handle = tokio::spawn(
                    async move { run_one(&registry, &entry, &ctx).await }.in_current_span(),
                );
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(evaluator = %name, error = %e, "evaluator task aborted");
                    let detail = if e.is_panic() {
                        "evaluator panicked".to_string()
                    } else {
                        e.to_string()
                    };
                    EvaluationResult::skipped(
                        &name,
                        format!("evaluator {name} crashed"),
                        ErrorDetail::new("evaluator crashed").with_details(detail),
                    )
                }
            };
            results.push(result);
        }
        results
    }

    async fn persist(&self, bundle: &ResultsBundle, agent_log: &AgentLog, workspace: &Workspace) {
        let sink = Arc::clone(&self.sink);
        let bundle = bundle.clone();
        let agent_log = agent_log.clone();
        let artifacts_dir = workspace.artifacts_dir.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            sink.persist(&bundle, &agent_log, &artifacts_dir)
        })
        .await;
        match outcome {
            Ok(Ok(persisted)) => {
                info!(
                    results = %persisted.results_path.display(),
                    archive = ?persisted.archive_dir,
                    "results persisted"
                );
                if persisted.archive_dir.is_none() && !self.keep_workspace {
                    warn!(
                        results = %persisted.results_path.display(),
                        "results are only in the workspace and will be removed with it"
                    );
                }
            }
            Ok(Err(e)) => warn!(error = %e, "failed to persist results"),
            Err(e) => warn!(error = %e, "result sink aborted"),
        }
    }
}

/// Resolve, check and run one evaluator; never fails.
async fn run_one(
    registry: &EvaluatorRegistry,
    entry: &EvaluatorEntry,
    ctx: &EvaluationContext,
) -> EvaluationResult {
    let started = Instant::now();
    let name = entry.name();

    let evaluator = match registry.build(name, entry.config()) {
        Ok(evaluator) => evaluator,
        Err(e @ RegistryError::NotFound(_)) => {
            let message = e.to_string();
            return EvaluationResult::skipped(name, message.clone(), ErrorDetail::new(message))
                .timed(started);
        }
        Err(e) => {
            return EvaluationResult::skipped(
                name,
                "invalid evaluator configuration",
                ErrorDetail::new(e.to_string()),
            )
            .timed(started);
        }
    };

    if let Err(reason) = evaluator.check_preconditions(ctx).await {
        return EvaluationResult::skipped(
            name,
            format!("preconditions not met: {reason}"),
            ErrorDetail::new(reason),
        )
        .timed(started);
    }

    METRICS.inc_evaluators_executed();
    let mut result = match entry.timeout() {
        Some(limit) => match tokio::time::timeout(limit, evaluator.evaluate(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!("evaluator timed out after {}ms", limit.as_millis());
                EvaluationResult::skipped(name, message.clone(), ErrorDetail::new(message))
            }
        },
        None => evaluator.evaluate(ctx).await,
    };

    // Results are reported under the configured name.
    result.evaluator = name.to_string();
    if result.duration_ms == 0 {
        result = result.timed(started);
    }
    result
}
