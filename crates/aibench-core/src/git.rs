//! Git plumbing: cloning, commit resolution and working-tree diffs.
//!
//! Everything shells out to the `git` CLI through `tokio::process` so the
//! orchestrator's runtime is never blocked on a slow clone or diff.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::domain::error::{BenchError, Result};

/// What to check out when cloning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneTarget {
    /// The remote's default branch, shallow.
    DefaultBranch,
    /// A named branch. Shallow unless a commit inside it is also requested.
    Branch {
        branch: String,
        commit: Option<String>,
    },
    /// A bare commit: full-history clone, then detached checkout.
    Commit(String),
}

impl CloneTarget {
    pub fn from_refs(branch: Option<&str>, commit: Option<&str>) -> Self {
        match (branch, commit) {
            (Some(branch), commit) => CloneTarget::Branch {
                branch: branch.to_string(),
                commit: commit.map(str::to_string),
            },
            (None, Some(commit)) => CloneTarget::Commit(commit.to_string()),
            (None, None) => CloneTarget::DefaultBranch,
        }
    }
}

/// One line of `git diff --numstat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumstatEntry {
    pub path: String,
    pub added: u64,
    pub removed: u64,
    /// Binary files report no line counts.
    pub binary: bool,
}

fn git_command(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-c")
        .arg("core.quotepath=off")
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run git in `dir`, accepting any exit code listed in `ok_codes`.
async fn run_git_with(dir: &Path, args: &[&str], ok_codes: &[i32]) -> Result<String> {
    let output = git_command(dir)
        .args(args)
        .output()
        .await
        .map_err(|e| BenchError::Git(format!("failed to run git: {e}")))?;

    let code = output.status.code().unwrap_or(-1);
    if !ok_codes.contains(&code) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BenchError::Git(format!(
            "git {} failed ({code}): {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run git in `dir` and return stdout; non-zero exit is an error.
pub async fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    run_git_with(dir, args, &[0]).await
}

/// Capture the HEAD commit SHA of the repository at `repo_dir`.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"]).await?;
    let sha = sha.trim().to_string();
    if sha.is_empty() {
        return Err(BenchError::Git(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Whether `dir` is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    run_git(dir, &["rev-parse", "--is-inside-work-tree"])
        .await
        .is_ok()
}

/// Clone `url` into `dest` (which must not exist yet).
pub async fn clone_repo(url: &str, dest: &Path, target: &CloneTarget) -> Result<()> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let dest_str = dest.to_string_lossy();

    match target {
        CloneTarget::DefaultBranch => {
            run_git(parent, &["clone", "--depth", "1", url, &dest_str]).await?;
        }
        CloneTarget::Branch {
            branch,
            commit: None,
        } => {
            run_git(
                parent,
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--single-branch",
                    "--branch",
                    branch,
                    url,
                    &dest_str,
                ],
            )
            .await?;
        }
        CloneTarget::Branch {
            branch,
            commit: Some(commit),
        } => {
            run_git(
                parent,
                &["clone", "--single-branch", "--branch", branch, url, &dest_str],
            )
            .await?;
            run_git(dest, &["checkout", "--quiet", "--detach", commit]).await?;
        }
        CloneTarget::Commit(commit) => {
            // Shallow clones cannot reliably reach an arbitrary commit.
            run_git(parent, &["clone", url, &dest_str]).await?;
            run_git(dest, &["checkout", "--quiet", "--detach", commit]).await?;
        }
    }
    Ok(())
}

/// `git status --porcelain` output, including untracked files.
pub async fn status_porcelain(dir: &Path) -> Result<String> {
    run_git(dir, &["status", "--porcelain", "--untracked-files=all"]).await
}

/// Whether the working tree differs from HEAD in any way.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    Ok(!status_porcelain(dir).await?.trim().is_empty())
}

/// Per-file line counts of tracked changes against `base`.
pub async fn diff_numstat(dir: &Path, base: &str) -> Result<Vec<NumstatEntry>> {
    let out = run_git(dir, &["diff", "--numstat", "-z", "--no-renames", base, "--"]).await?;
    Ok(parse_numstat(&out))
}

/// Patch text of tracked changes against `base`.
pub async fn diff_patch(dir: &Path, base: &str) -> Result<String> {
    run_git(dir, &["diff", "--no-renames", base, "--"]).await
}

/// Untracked, non-ignored files relative to `dir`.
///
/// Paths are read NUL-separated so names git would otherwise C-quote come
/// back verbatim.
pub async fn untracked_files(dir: &Path) -> Result<Vec<String>> {
    let out = run_git(dir, &["ls-files", "-z", "--others", "--exclude-standard"]).await?;
    Ok(out
        .split('\0')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect())
}

/// Patch adding an untracked file in full.
///
/// `git diff --no-index` exits 1 when the inputs differ, which is the
/// expected case here.
pub async fn untracked_patch(dir: &Path, file: &str) -> Result<String> {
    run_git_with(
        dir,
        &["diff", "--no-index", "--", "/dev/null", file],
        &[0, 1],
    )
    .await
}

/// Parse `git diff --numstat -z --no-renames` output.
///
/// Each record is `added\tremoved\tpath` terminated by NUL, with `-` counts
/// for binary files.
pub fn parse_numstat(output: &str) -> Vec<NumstatEntry> {
    output
        .split('\0')
        .filter_map(|record| {
            let mut parts = record.splitn(3, '\t');
            let added = parts.next()?;
            let removed = parts.next()?;
            let path = parts.next()?.to_string();
            if added == "-" && removed == "-" {
                return Some(NumstatEntry {
                    path,
                    added: 0,
                    removed: 0,
                    binary: true,
                });
            }
            Some(NumstatEntry {
                path,
                added: added.parse().ok()?,
                removed: removed.parse().ok()?,
                binary: false,
            })
        })
        .collect()
}
