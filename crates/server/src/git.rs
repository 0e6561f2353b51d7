//! Shared git utilities for job completion summaries.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// Branch checked out in a project directory.
pub async fn current_branch(path: &Path) -> Option<String> {
    run_git(&["branch", "--show-current"], path).await
}

/// Short hash + subject of the newest commit, e.g. `a1b2c3d - fix login`.
pub async fn last_commit_summary(path: &Path) -> Option<String> {
    run_git(&["log", "-1", "--pretty=format:%h - %s"], path).await
}

async fn run_git(args: &[&str], cwd: &Path) -> Option<String> {
    let output = Command::new("/usr/bin/git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
