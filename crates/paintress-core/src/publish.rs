//! Pull-request publishing.
//!
//! Publishing is a write sequence (commit, push, open PR) and is never
//! interrupted part-way; callers check cancellation before starting it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::cancel::CancelSignal;
use crate::domain::error::{PaintressError, Result};
use crate::domain::work_item::WorkItem;
use crate::git::GitRunner;
use crate::process::{run_process, ProcessRun};

/// Inputs for one publish.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub workdir: &'a Path,
    pub item: &'a WorkItem,
    pub branch: &'a str,
    pub base: &'a str,
    /// Model that produced the change, recorded in the PR body.
    pub model: &'a str,
}

/// Opens a pull request from the cycle branch to the base branch and returns
/// its identifier (a URL for GitHub).
#[async_trait]
pub trait PrPublisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<String>;
}

/// Commits pending changes, pushes the branch, and runs
/// `gh pr create --base <base> --head <branch>`.
#[derive(Debug, Clone)]
pub struct GhPublisher {
    program: String,
    remote: String,
    timeout: Duration,
}

impl GhPublisher {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            program: "gh".to_string(),
            remote: remote.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Use a different `gh` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn open_pull_request(&self, request: &PublishRequest<'_>) -> Result<String> {
        let title = commit_title(request.item);
        let body = pr_body(request);
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(["pr", "create", "--base", request.base, "--head", request.branch])
            .args(["--title", title.as_str(), "--body", body.as_str()])
            .current_dir(request.workdir);

        let run = tokio::time::timeout(
            self.timeout,
            run_process(cmd, &CancelSignal::never(), Duration::ZERO),
        )
        .await
        .map_err(|_| PaintressError::Publish(format!("{} timed out", self.program)))?
        .map_err(|e| PaintressError::Publish(format!("failed to spawn {}: {e}", self.program)))?;

        match run {
            ProcessRun::Finished(out) if out.success => pull_request_id(&out.stdout)
                .ok_or_else(|| PaintressError::Publish("gh printed no pull request URL".to_string())),
            ProcessRun::Finished(out) => Err(PaintressError::Publish(out.failure_summary())),
            ProcessRun::Cancelled { reason } => Err(PaintressError::Cancelled(reason)),
        }
    }
}

#[async_trait]
impl PrPublisher for GhPublisher {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<String> {
        let git = GitRunner::new(request.workdir);
        let publish_err = |e: PaintressError| PaintressError::Publish(e.to_string());

        git.add_all().await.map_err(publish_err)?;
        git.commit(&commit_title(request.item))
            .await
            .map_err(publish_err)?;
        if git.commits_ahead(request.base).await.map_err(publish_err)? == 0 {
            return Err(PaintressError::Publish(format!(
                "no changes on {} relative to {}",
                request.branch, request.base
            )));
        }
        git.push(&self.remote, request.branch)
            .await
            .map_err(publish_err)?;

        let pr = self.open_pull_request(request).await?;
        info!(item_id = %request.item.id, branch = %request.branch, pull_request = %pr, "pull request opened");
        Ok(pr)
    }
}

fn commit_title(item: &WorkItem) -> String {
    format!("{}: {}", item.id, item.title)
}

fn pr_body(request: &PublishRequest<'_>) -> String {
    let mut body = format!("Resolves {}.\n", request.item.id);
    if let Some(url) = &request.item.metadata.url {
        body.push_str(&format!("\nIssue: {url}\n"));
    }
    body.push_str(&format!("\nImplemented by paintress with model `{}`.\n", request.model));
    body
}

/// Last non-empty stdout line; `gh` prints the PR URL there.
fn pull_request_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(String::from)
}
