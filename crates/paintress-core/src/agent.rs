//! Model reserve and agent invocation.
//!
//! A cycle walks the [`ModelReserve`] with a forward-only [`ModelCursor`].
//! Each attempt goes through [`invoke_within_deadline`], which bounds the
//! [`AgentInvoker`] by the cycle deadline regardless of the implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::domain::error::{Result, ValidationError};
use crate::domain::work_item::WorkItem;
use crate::process::{run_process, ProcessRun};

/// Ordered, non-empty list of model identifiers tried in fallback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReserve {
    models: Arc<[String]>,
}

impl ModelReserve {
    /// Build a reserve. Identifiers are trimmed; blanks and identifiers with
    /// whitespace are rejected.
    pub fn new(models: Vec<String>) -> Result<Self> {
        let mut cleaned = Vec::with_capacity(models.len());
        for model in models {
            let model = model.trim().to_string();
            if model.is_empty() || model.chars().any(char::is_whitespace) {
                return Err(ValidationError::InvalidModel(model).into());
            }
            cleaned.push(model);
        }
        if cleaned.is_empty() {
            return Err(ValidationError::EmptyModelReserve.into());
        }
        Ok(Self {
            models: cleaned.into(),
        })
    }

    /// Parse a comma-separated list, e.g. `"opus,sonnet"`.
    pub fn parse(list: &str) -> Result<Self> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Always `false`; construction rejects empty reserves.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn primary(&self) -> &str {
        &self.models[0]
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.models.get(index).map(String::as_str)
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// A fresh cursor at position 0.
    pub fn cursor(&self) -> ModelCursor {
        ModelCursor {
            reserve: self.clone(),
            index: 0,
        }
    }
}

/// Forward-only position in a [`ModelReserve`].
///
/// The index never exceeds `len - 1`; [`advance`](Self::advance) returns
/// `None` once the last model has been tried.
#[derive(Debug, Clone)]
pub struct ModelCursor {
    reserve: ModelReserve,
    index: usize,
}

impl ModelCursor {
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &str {
        &self.reserve.models[self.index]
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.reserve.len()
    }

    /// Move to the next model, or `None` if the reserve is exhausted.
    pub fn advance(&mut self) -> Option<&str> {
        if self.is_last() {
            return None;
        }
        self.index += 1;
        Some(self.current())
    }
}

/// One invocation of the agent against one working copy.
#[derive(Debug, Clone, Copy)]
pub struct InvokeRequest<'a> {
    pub workdir: &'a Path,
    pub item: &'a WorkItem,
    pub branch: &'a str,
    pub model: &'a str,
    pub prompt: &'a str,
    /// Whole-cycle deadline shared by all attempts.
    pub deadline: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    Success,
    /// Recoverable: the next model in the reserve may be tried.
    SoftFail(String),
    DeadlineExceeded,
    Cancelled(String),
}

/// Runs the coding agent. Implementations only report success or failure;
/// deadline enforcement lives in [`invoke_within_deadline`].
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &InvokeRequest<'_>, cancel: &CancelSignal) -> InvokeOutcome;
}

/// Invoke the agent, cancelling it if `request.deadline` passes first.
///
/// Dropping the invocation future on timeout drops any child process, which
/// [`CommandInvoker`] spawns with `kill_on_drop`.
pub async fn invoke_within_deadline(
    invoker: &dyn AgentInvoker,
    request: &InvokeRequest<'_>,
    cancel: &CancelSignal,
) -> InvokeOutcome {
    if Instant::now() >= request.deadline {
        return InvokeOutcome::DeadlineExceeded;
    }
    match tokio::time::timeout_at(request.deadline, invoker.invoke(request, cancel)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(item_id = %request.item.id, model = %request.model, "agent invocation hit cycle deadline");
            InvokeOutcome::DeadlineExceeded
        }
    }
}

/// Spawns the agent CLI:
/// `<program> --model <model> [args...] --print <prompt>` in the working copy.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
    grace: Duration,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>, args: Vec<String>, grace: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            grace,
        }
    }

    fn command(&self, request: &InvokeRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--model")
            .arg(request.model)
            .args(&self.args)
            .arg("--print")
            .arg(request.prompt)
            .current_dir(request.workdir)
            .env("PAINTRESS_ITEM_ID", &request.item.id)
            .env("PAINTRESS_BRANCH", request.branch);
        cmd
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    async fn invoke(&self, request: &InvokeRequest<'_>, cancel: &CancelSignal) -> InvokeOutcome {
        debug!(program = %self.program, model = %request.model, dir = %request.workdir.display(), "spawning agent");
        match run_process(self.command(request), cancel, self.grace).await {
            Ok(ProcessRun::Finished(out)) if out.success => InvokeOutcome::Success,
            Ok(ProcessRun::Finished(out)) => InvokeOutcome::SoftFail(out.failure_summary()),
            Ok(ProcessRun::Cancelled { reason }) => InvokeOutcome::Cancelled(reason),
            Err(e) => InvokeOutcome::SoftFail(format!("failed to spawn {}: {e}", self.program)),
        }
    }
}

/// Dry-run invoker: emits the prompt and reports success without spawning
/// anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunInvoker;

#[async_trait]
impl AgentInvoker for DryRunInvoker {
    async fn invoke(&self, request: &InvokeRequest<'_>, _cancel: &CancelSignal) -> InvokeOutcome {
        info!(
            event = "cycle.dry_run",
            item_id = %request.item.id,
            model = %request.model,
            prompt = %request.prompt,
        );
        InvokeOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;

    fn request<'a>(item: &'a WorkItem, dir: &'a Path, deadline: Instant) -> InvokeRequest<'a> {
        InvokeRequest {
            workdir: dir,
            item,
            branch: "paintress/my-1",
            model: "opus",
            prompt: "do the thing",
            deadline,
        }
    }

    struct Hang;

    #[async_trait]
    impl AgentInvoker for Hang {
        async fn invoke(&self, _r: &InvokeRequest<'_>, _c: &CancelSignal) -> InvokeOutcome {
            std::future::pending().await
        }
    }

    #[test]
    fn test_reserve_rejects_empty_and_blank() {
        assert!(ModelReserve::new(vec![]).is_err());
        assert!(ModelReserve::new(vec!["  ".to_string()]).is_err());
        assert!(ModelReserve::new(vec!["claude opus".to_string()]).is_err());
        assert!(ModelReserve::parse(" , ").is_err());
    }

    #[test]
    fn test_parse_keeps_order() {
        let reserve = ModelReserve::parse("opus, sonnet,haiku").unwrap();
        assert_eq!(reserve.models(), ["opus", "sonnet", "haiku"]);
        assert_eq!(reserve.primary(), "opus");
    }

    #[test]
    fn test_cursor_is_forward_only_and_bounded() {
        let reserve = ModelReserve::parse("opus,sonnet").unwrap();
        let mut cursor = reserve.cursor();
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.current(), "opus");
        assert!(!cursor.is_last());

        assert_eq!(cursor.advance(), Some("sonnet"));
        assert_eq!(cursor.position(), 1);
        assert!(cursor.is_last());

        assert_eq!(cursor.advance(), None);
        assert_eq!(cursor.position(), 1, "cursor must not pass len - 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_hanging_invoker() {
        let item = WorkItem::new("MY-1", "t", "Todo");
        let dir = std::env::temp_dir();
        let deadline = Instant::now() + Duration::from_secs(1);
        let outcome =
            invoke_within_deadline(&Hang, &request(&item, &dir, deadline), &CancelSignal::never())
                .await;
        assert_eq!(outcome, InvokeOutcome::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_past_deadline_short_circuits() {
        let item = WorkItem::new("MY-1", "t", "Todo");
        let dir = std::env::temp_dir();
        let outcome = invoke_within_deadline(
            &DryRunInvoker,
            &request(&item, &dir, Instant::now()),
            &CancelSignal::never(),
        )
        .await;
        assert_eq!(outcome, InvokeOutcome::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_command_invoker_classifies_exit_status() {
        let item = WorkItem::new("MY-1", "t", "Todo");
        let dir = tempfile::tempdir().unwrap();
        let deadline = Instant::now() + Duration::from_secs(30);

        // `true` and `false` ignore their arguments.
        let ok = CommandInvoker::new("true", vec![], Duration::from_secs(1));
        let outcome = ok
            .invoke(&request(&item, dir.path(), deadline), &CancelSignal::never())
            .await;
        assert_eq!(outcome, InvokeOutcome::Success);

        let failing = CommandInvoker::new("false", vec![], Duration::from_secs(1));
        let outcome = failing
            .invoke(&request(&item, dir.path(), deadline), &CancelSignal::never())
            .await;
        assert!(matches!(outcome, InvokeOutcome::SoftFail(_)));

        let missing = CommandInvoker::new("no-such-agent-binary", vec![], Duration::from_secs(1));
        let outcome = missing
            .invoke(&request(&item, dir.path(), deadline), &CancelSignal::never())
            .await;
        assert!(matches!(outcome, InvokeOutcome::SoftFail(ref m) if m.contains("failed to spawn")));
    }

    #[tokio::test]
    async fn test_command_invoker_observes_cancellation() {
        let item = WorkItem::new("MY-1", "t", "Todo");
        let dir = tempfile::tempdir().unwrap();
        let deadline = Instant::now() + Duration::from_secs(30);
        let (handle, signal) = cancel_pair();
        handle.cancel("SIGINT");

        let script = dir.path().join("slow-agent.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let sleeper = CommandInvoker::new(
            script.to_string_lossy(),
            vec![],
            Duration::from_millis(50),
        );
        let outcome = sleeper
            .invoke(&request(&item, dir.path(), deadline), &signal)
            .await;
        assert_eq!(outcome, InvokeOutcome::Cancelled("SIGINT".to_string()));
    }
}
