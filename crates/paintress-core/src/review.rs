//! Post-PR review pass.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::domain::error::{PaintressError, Result};
use crate::domain::work_item::WorkItem;
use crate::process::{run_process, shell_command, ProcessRun};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum ReviewVerdict {
    Pass,
    Fail(String),
}

impl ReviewVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, ReviewVerdict::Pass)
    }
}

/// What the review sees.
#[derive(Debug, Clone, Copy)]
pub struct ReviewRequest<'a> {
    pub workdir: &'a Path,
    pub item: &'a WorkItem,
    pub branch: &'a str,
    pub pull_request: &'a str,
}

/// Classifies a published change as pass or fail.
///
/// `Err` is reserved for infrastructure problems and cancellation; a
/// negative review is `Ok(ReviewVerdict::Fail(..))`.
#[async_trait]
pub trait ReviewRunner: Send + Sync {
    async fn review(&self, request: &ReviewRequest<'_>, cancel: &CancelSignal)
        -> Result<ReviewVerdict>;
}

/// Runs `sh -c <script>` in the working copy. Passes on exit 0 unless the
/// output matches `fail_pattern`.
#[derive(Debug, Clone)]
pub struct CommandReviewRunner {
    script: String,
    fail_pattern: Option<Regex>,
    grace: Duration,
}

impl CommandReviewRunner {
    pub fn new(script: impl Into<String>, fail_pattern: Option<Regex>, grace: Duration) -> Self {
        Self {
            script: script.into(),
            fail_pattern,
            grace,
        }
    }

    fn classify(&self, exit_code: i32, success: bool, output: &str) -> ReviewVerdict {
        if !success {
            return ReviewVerdict::Fail(format!("review command exited with {exit_code}"));
        }
        if let Some(found) = self.fail_pattern.as_ref().and_then(|re| re.find(output)) {
            return ReviewVerdict::Fail(format!("review output matched {:?}", found.as_str()));
        }
        ReviewVerdict::Pass
    }
}

#[async_trait]
impl ReviewRunner for CommandReviewRunner {
    async fn review(
        &self,
        request: &ReviewRequest<'_>,
        cancel: &CancelSignal,
    ) -> Result<ReviewVerdict> {
        debug!(item_id = %request.item.id, command = %self.script, "running review");
        let mut cmd = shell_command(&self.script, request.workdir);
        cmd.env("PAINTRESS_ITEM_ID", &request.item.id)
            .env("PAINTRESS_BRANCH", request.branch)
            .env("PAINTRESS_PR_URL", request.pull_request);

        let run = run_process(cmd, cancel, self.grace)
            .await
            .map_err(|e| PaintressError::Review(format!("failed to spawn review: {e}")))?;

        match run {
            ProcessRun::Finished(out) => {
                let verdict = self.classify(out.exit_code, out.success, &out.combined());
                info!(item_id = %request.item.id, passed = verdict.passed(), "review finished");
                Ok(verdict)
            }
            ProcessRun::Cancelled { reason } => Err(PaintressError::Cancelled(reason)),
        }
    }
}
