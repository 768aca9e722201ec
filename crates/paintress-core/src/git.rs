//! Git integration: repository checks and the async command runner used
//! for worktree lifecycle, commits, and pushes.

use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Output};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::error::{PaintressError, Result};

/// Pathspecs keeping run state (journal, worktrees, logs) out of commits.
const RUN_STATE_EXCLUDES: [&str; 2] = [":(exclude).expedition/journal", ":(exclude).expedition/.run"];

const MAX_BRANCH_SUFFIX: usize = 50;

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    StdCommand::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Runs git subcommands in one directory. Every checked call fails fast on
/// a non-zero exit.
#[derive(Debug, Clone)]
pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PaintressError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr.trim(), "git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PaintressError::Git(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(output)
    }

    /// Create a worktree at `path` on `branch`, forked from `base`.
    ///
    /// `-B` resets the branch if it exists; callers pick a branch with
    /// [`free_branch_name`](Self::free_branch_name) first.
    pub async fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path = path.to_string_lossy();
        self.run_checked(&["worktree", "add", "-B", branch, &path, base])
            .await?;
        Ok(())
    }

    /// Create a worktree at `path` detached at `base`. No branch is touched.
    pub async fn worktree_add_detached(&self, path: &Path, base: &str) -> Result<()> {
        let path = path.to_string_lossy();
        self.run_checked(&["worktree", "add", "--detach", &path, base])
            .await?;
        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.run_checked(&["worktree", "remove", "--force", &path])
            .await?;
        Ok(())
    }

    pub async fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"]).await?;
        Ok(())
    }

    /// Discard tracked and untracked changes.
    pub async fn discard_changes(&self) -> Result<()> {
        self.run_checked(&["reset", "--hard"]).await?;
        self.run_checked(&["clean", "-fd"]).await?;
        Ok(())
    }

    pub async fn detach_at(&self, base: &str) -> Result<()> {
        self.run_checked(&["checkout", "--detach", base]).await?;
        Ok(())
    }

    /// Check out `branch` freshly forked from `base`, resetting it if it exists.
    pub async fn checkout_fresh(&self, branch: &str, base: &str) -> Result<()> {
        self.run_checked(&["checkout", "-B", branch, base]).await?;
        Ok(())
    }

    /// Stage everything except Paintress run state under `.expedition/`.
    pub async fn add_all(&self) -> Result<()> {
        let mut args = vec!["add", "-A", "--", "."];
        args.extend(RUN_STATE_EXCLUDES);
        self.run_checked(&args).await?;
        Ok(())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        let output = self
            .run(&["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.status.success())
    }

    /// Number of commits on `branch` that are not on `base`.
    pub async fn commits_between(&self, base: &str, branch: &str) -> Result<u64> {
        let range = format!("{base}..{branch}");
        let output = self.run_checked(&["rev-list", "--count", &range]).await?;
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|e| PaintressError::Git(format!("unexpected rev-list output: {e}")))
    }

    /// `preferred`, or the first of `preferred-2`, `preferred-3`, ... that is
    /// safe to (re)create from `base`: absent, or with no commits of its own.
    ///
    /// Branches holding unpublished work are never reused.
    pub async fn free_branch_name(&self, preferred: &str, base: &str) -> Result<String> {
        for n in 1..=MAX_BRANCH_SUFFIX {
            let candidate = if n == 1 {
                preferred.to_string()
            } else {
                format!("{preferred}-{n}")
            };
            if !self.branch_exists(&candidate).await?
                || self.commits_between(base, &candidate).await? == 0
            {
                return Ok(candidate);
            }
            debug!(branch = %candidate, "branch has commits of its own, trying next name");
        }
        Err(PaintressError::Git(format!(
            "no free branch name for {preferred} after {MAX_BRANCH_SUFFIX} tries"
        )))
    }

    /// Commit staged changes. Returns `false` when nothing is staged.
    pub async fn commit(&self, message: &str) -> Result<bool> {
        let staged = self.run(&["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message]).await?;
        Ok(true)
    }

    /// Number of commits on HEAD that are not on `base`.
    pub async fn commits_ahead(&self, base: &str) -> Result<u64> {
        self.commits_between(base, "HEAD").await
    }

    /// Push HEAD to `branch` on `remote`, whatever is checked out locally.
    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.run_checked(&["push", "--force-with-lease", remote, &refspec])
            .await?;
        Ok(())
    }

    pub async fn current_branch(&self) -> Result<String> {
        let output = self
            .run_checked(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::process::Command as StdCommand;

    pub fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
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
    }

    /// A repository with one empty commit on `main`.
    pub fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }
}
