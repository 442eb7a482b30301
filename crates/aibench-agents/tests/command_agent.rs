//! The command adapter against real child processes, alone and under the
//! orchestrator.

use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use aibench_agents::{AgentRegistry, CommandAgent, CommandSettings};
use aibench_core::{
    AgentConfig, AgentExecutor, AgentStatus, EvaluationStatus, EvaluatorEntry, Orchestrator,
    OverallStatus, RunConfig, WorkspaceOptions, WorkspacePaths,
};
use serde_json::json;

fn shell_agent(script: &str) -> CommandAgent {
    CommandAgent::new(CommandSettings {
        command: vec!["sh".into(), "-c".into(), script.into()],
        ..Default::default()
    })
}

fn paths(root: &Path) -> WorkspacePaths {
    let modified_dir = root.join("modified");
    let artifacts_dir = root.join("artifacts");
    std::fs::create_dir_all(&modified_dir).unwrap();
    std::fs::create_dir_all(&artifacts_dir).unwrap();
    WorkspacePaths {
        modified_dir,
        expected_dir: None,
        artifacts_dir,
    }
}

fn agent_config(prompt: &str) -> AgentConfig {
    AgentConfig {
        agent_type: "command".to_string(),
        prompt: Some(prompt.to_string()),
        settings: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn runs_in_modified_tree_with_prompt() {
    let root = tempfile::tempdir().unwrap();
    let paths = paths(root.path());
    let agent = shell_agent(r#"printf '%s' "$AIBENCH_PROMPT" > task.txt; echo out; echo err >&2"#);

    let result = agent
        .execute(&paths, &agent_config("fix it"), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.raw_output, "out\nerr\n");
    assert!(result.errors.is_empty());
    assert_eq!(
        std::fs::read_to_string(paths.modified_dir.join("task.txt")).unwrap(),
        "fix it"
    );
}

#[tokio::test]
async fn non_zero_exit_is_failed() {
    let root = tempfile::tempdir().unwrap();
    let result = shell_agent("echo broken; exit 3")
        .execute(&paths(root.path()), &agent_config(""), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Failed);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.raw_output, "broken\n");
    assert!(result.errors[0].contains("status 3"));
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let root = tempfile::tempdir().unwrap();
    let started = std::time::Instant::now();
    let result = shell_agent("exec sleep 30")
        .execute(
            &paths(root.path()),
            &agent_config(""),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Timeout);
    assert!(result.exit_code.is_none());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn missing_program_is_failed_not_error() {
    let root = tempfile::tempdir().unwrap();
    let agent = CommandAgent::new(CommandSettings {
        command: vec!["/definitely/not/a/program".into()],
        ..Default::default()
    });
    let result = agent
        .execute(&paths(root.path()), &agent_config(""), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(result.status, AgentStatus::Failed);
    assert!(result.errors[0].contains("failed to spawn"));
}

#[tokio::test]
async fn normalized_log_carries_usage_and_cost() {
    let root = tempfile::tempdir().unwrap();
    let agent = CommandAgent::new(CommandSettings {
        command: vec![
            "sh".into(),
            "-c".into(),
            r#"echo '{"role":"assistant","content":"patched","usage":{"input_tokens":1000,"output_tokens":100}}'"#.into(),
        ],
        cost_per_1k_input: Some(0.01),
        cost_per_1k_output: Some(0.1),
        ..Default::default()
    });
    let result = agent
        .execute(&paths(root.path()), &agent_config(""), Duration::from_secs(10))
        .await
        .unwrap();
    let log = agent.normalize_log(&result.raw_output, &result);

    assert_eq!(log.messages.len(), 1);
    assert_eq!(log.messages[0].content, "patched");
    assert_eq!(log.token_usage.unwrap().total(), 1100);
    assert!((log.cost_estimate_usd.unwrap() - 0.02).abs() < 1e-9);
    assert_eq!(log.environment["command"], "sh");
}

fn git(dir: &Path, args: &[&str]) {
    let output = StdCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed", args);
}

#[tokio::test]
async fn orchestrated_run_with_command_agent() {
    let repo = tempfile::tempdir().unwrap();
    git(repo.path(), &["init", "--quiet"]);
    git(repo.path(), &["config", "user.name", "test-user"]);
    git(repo.path(), &["config", "user.email", "test@example.com"]);
    std::fs::write(repo.path().join("lib.txt"), "a\nb\n").unwrap();
    git(repo.path(), &["add", "."]);
    git(repo.path(), &["commit", "--quiet", "-m", "initial"]);
    git(repo.path(), &["branch", "-M", "main"]);

    let mut config = RunConfig::new(format!("file://{}", repo.path().display()), "command")
        .with_branch("main")
        .with_evaluator(EvaluatorEntry::Name("git-diff".to_string()));
    config.agent.settings = json!({ "command": ["sh", "-c", "echo c >> lib.txt"] });
    config.timeout_ms = Some(30_000);

    let agent = AgentRegistry::with_builtins()
        .resolve(&config.agent)
        .unwrap();
    let workspaces = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(agent, WorkspaceOptions::new(workspaces.path()));

    let bundle = orchestrator.run_evaluation(Arc::new(config)).await.unwrap();

    assert_eq!(bundle.agent.status, AgentStatus::Success);
    assert_eq!(bundle.agent.agent_type, "command");
    let diff = bundle.evaluation("git-diff").unwrap();
    assert_eq!(diff.status, EvaluationStatus::Passed);
    assert_eq!(diff.metrics["lines_added"], json!(1));
    assert_eq!(bundle.overall_status(), OverallStatus::Passed);
}
