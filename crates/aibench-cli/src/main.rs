//! aibench CLI
//!
//! The `aibench` command runs a coding agent against a repository and scores
//! the result.
//!
//! ## Commands
//!
//! - `run`: execute one evaluation run from a config file
//! - `validate`: load and validate a config file without running it
//! - `report`: render a persisted `results.json` as Markdown
//!
//! ## Exit codes
//!
//! `0` when the run passed or partially passed, `1` when it failed, `2` on a
//! fatal configuration or workspace error.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use aibench_agents::AgentRegistry;
use aibench_core::{
    render_summary_md, write_summary_md, BenchError, FsResultSink, Orchestrator, OverallStatus,
    ResultsBundle, WorkspaceOptions,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};

use crate::config::load_run_config;

const SUMMARY_FILE_NAME: &str = "summary.md";

#[derive(Parser)]
#[command(name = "aibench")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluation harness for AI coding agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one evaluation
    Run {
        /// Path to the run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Use this run ID instead of a generated one
        #[arg(long)]
        run_id: Option<String>,

        /// Leave the workspace on disk after the run
        #[arg(long)]
        keep_workspace: bool,

        /// Directory holding run workspaces
        #[arg(long, env = "AIBENCH_WORKSPACE_ROOT")]
        workspace_root: Option<PathBuf>,

        /// Directory that keeps results after the workspace is removed
        /// [default: <tmp>/aibench-results]
        #[arg(long, env = "AIBENCH_RESULTS_DIR")]
        results_dir: Option<PathBuf>,
    },

    /// Load and validate a run configuration
    Validate {
        /// Path to the run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the Markdown summary of a persisted run
    Report {
        /// Path to results.json
        #[arg(short, long)]
        results: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    aibench_core::telemetry::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Run {
            config,
            run_id,
            keep_workspace,
            workspace_root,
            results_dir,
        } => {
            cmd_run(
                &config,
                run_id,
                keep_workspace,
                workspace_root,
                results_dir,
            )
            .await
        }
        Commands::Validate { config } => cmd_validate(&config).map(|_| ExitCode::SUCCESS),
        Commands::Report { results } => cmd_report(&results).map(|_| ExitCode::SUCCESS),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            let code = e
                .downcast_ref::<BenchError>()
                .map(BenchError::code)
                .unwrap_or("ERROR");
            error!(code, error = %format!("{e:#}"), "aborted");
            eprintln!("error [{code}]: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("aibench-workspaces")
}

fn default_results_root() -> PathBuf {
    std::env::temp_dir().join("aibench-results")
}

async fn cmd_run(
    config_path: &Path,
    run_id: Option<String>,
    keep_workspace: bool,
    workspace_root: Option<PathBuf>,
    results_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let config = load_run_config(config_path)?;
    let agent = AgentRegistry::with_builtins().resolve(&config.agent)?;

    let root = workspace_root.unwrap_or_else(default_workspace_root);
    let options = WorkspaceOptions::new(root).keep_workspace(keep_workspace);
    let results_dir = results_dir.unwrap_or_else(default_results_root);
    let sink = FsResultSink::with_results_root(results_dir.clone());
    let mut orchestrator = Orchestrator::new(agent, options).with_sink(Arc::new(sink));
    if let Some(run_id) = run_id {
        orchestrator = orchestrator.with_run_id(run_id);
    }

    let bundle = orchestrator.run_evaluation(Arc::new(config)).await?;

    let path = results_dir.join(&bundle.run.run_id).join(SUMMARY_FILE_NAME);
    match write_summary_md(&path, &bundle) {
        Ok(()) => info!(path = %path.display(), "summary written"),
        Err(e) => error!(error = %format!("{e:#}"), "failed to write summary"),
    }

    println!("{}", render_summary_md(&bundle));
    Ok(exit_code_for(&bundle))
}

fn exit_code_for(bundle: &ResultsBundle) -> ExitCode {
    match bundle.overall_status() {
        OverallStatus::Passed | OverallStatus::Partial => ExitCode::SUCCESS,
        OverallStatus::Failed => ExitCode::from(1),
    }
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    let config = load_run_config(config_path)?;
    AgentRegistry::with_builtins()
        .resolve(&config.agent)
        .context("Agent configuration is invalid")?;
    let digest = config.digest()?;

    println!("✓ {} is valid", config_path.display());
    println!("  Repository: {}", config.repo_url);
    println!("  Agent:      {}", config.agent.agent_type);
    println!("  Evaluators: {}", config.evaluators.len());
    println!("  Digest:     {digest}");
    Ok(())
}

fn cmd_report(results_path: &Path) -> Result<()> {
    let bundle = aibench_core::read_results_json(results_path)?;
    println!("{}", render_summary_md(&bundle));
    Ok(())
}
