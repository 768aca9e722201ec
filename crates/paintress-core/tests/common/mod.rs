//! Shared fixtures for expedition integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use paintress_core::fakes::{RecordingPublisher, ScriptedInvoker};
use paintress_core::{AgentInvoker, ExpeditionConfig, ExpeditionDeps, WorkItem, WorkQueue};

pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A continent: a repository with one commit on `main`.
pub fn make_continent() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    std::fs::write(dir.path().join("README.md"), "# continent\n").unwrap();
    run_git(dir.path(), &["add", "README.md"]);
    run_git(dir.path(), &["commit", "-m", "initial"]);
    dir
}

/// Config with the dev server off and the given pool size and reserve.
pub fn config(continent: &Path, workers: usize, models: &[&str]) -> ExpeditionConfig {
    ExpeditionConfig {
        workers,
        models: models.iter().map(|m| m.to_string()).collect(),
        dev_server: false,
        timeout_secs: 30,
        cancel_grace_secs: 1,
        ..ExpeditionConfig::for_continent(continent)
    }
}

pub fn deps(invoker: Arc<dyn AgentInvoker>, publisher: Arc<RecordingPublisher>) -> ExpeditionDeps {
    ExpeditionDeps {
        invoker,
        publisher,
        reviewer: None,
    }
}

pub fn scripted() -> Arc<ScriptedInvoker> {
    Arc::new(ScriptedInvoker::new())
}

pub fn items(ids: &[&str]) -> Vec<WorkItem> {
    ids.iter()
        .map(|id| WorkItem::new(*id, format!("Implement {id}"), "Todo"))
        .collect()
}

pub fn queue(ids: &[&str]) -> WorkQueue {
    WorkQueue::new(items(ids), &[])
}

pub fn assert_between(actual: Duration, low: Duration, high: Duration) {
    assert!(
        actual >= low && actual < high,
        "expected {actual:?} in [{low:?}, {high:?})"
    );
}

/// Executable `gh` stand-in that prints a pull request URL.
pub fn fake_gh(dir: &Path) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("gh");
    std::fs::write(&path, "#!/bin/sh\necho https://github.com/o/r/pull/1\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

/// A bare repository usable as a push remote.
pub fn bare_remote() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "--bare"]);
    dir
}

/// Put one commit of its own on `branch`, then return to `main`.
pub fn commit_on_branch(repo: &Path, branch: &str) -> String {
    run_git(repo, &["checkout", "-b", branch]);
    std::fs::write(repo.join("wip.txt"), "unpublished").unwrap();
    run_git(repo, &["add", "wip.txt"]);
    run_git(repo, &["commit", "-m", "wip"]);
    run_git(repo, &["checkout", "main"]);
    run_git(repo, &["rev-parse", branch])
}
