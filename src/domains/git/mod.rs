pub mod remote;
pub mod worktrees;

use crate::errors::HostError;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

fn operation_label(args: &[&str]) -> String {
    args.first().map(|s| s.to_string()).unwrap_or_default()
}

/// Run git and return trimmed stdout. Stderr is folded into the error on
/// failure.
pub async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String, HostError> {
    let operation = operation_label(args);
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .map_err(|e| HostError::git(&operation, format!("failed to spawn git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HostError::git(
            &operation,
            format!("{} ({})", stderr.trim(), output.status),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run git while streaming its stderr lines to `on_line`. Git writes
/// `--progress` output to stderr, so this is the channel clone/fetch
/// progress arrives on.
pub async fn run_git_streaming<F>(
    args: &[&str],
    cwd: Option<&Path>,
    mut on_line: F,
) -> Result<(), HostError>
where
    F: FnMut(&str),
{
    let operation = operation_label(args);
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| HostError::git(&operation, format!("failed to spawn git: {e}")))?;

    let mut tail: Vec<String> = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            on_line(trimmed);
            if tail.len() >= 8 {
                tail.remove(0);
            }
            tail.push(trimmed.to_string());
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| HostError::git(&operation, format!("failed to wait for git: {e}")))?;

    if !status.success() {
        return Err(HostError::git(
            &operation,
            format!("{} ({status})", tail.join("; ")),
        ));
    }

    Ok(())
}
