//! Expedition orchestrator: the top-level driver of a run.
//!
//! One worker per pool slot (at least one) loops: stop on cancellation,
//! take the next item within budget, run its cycle, record the outcome.
//! In-flight cycles are never force-terminated; they observe the cancel
//! signal at their own checkpoints.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::agent::{AgentInvoker, CommandInvoker, DryRunInvoker};
use crate::cancel::CancelSignal;
use crate::config::ExpeditionConfig;
use crate::cycle::{run_cycle, CycleContext};
use crate::devserver::DevServer;
use crate::domain::error::Result;
use crate::domain::outcome::{CycleOutcome, RunReport, RunStatus, StopReason};
use crate::journal::Journal;
use crate::metrics::METRICS;
use crate::obs::{emit_journal_error, emit_run_finished, emit_run_started, run_span};
use crate::pool::{PoolConfig, WorkingCopyPool};
use crate::publish::{GhPublisher, PrPublisher};
use crate::queue::{Budget, Dispatch, WorkQueue};
use crate::review::{CommandReviewRunner, ReviewRunner};
use crate::tracker::IssueTracker;

const DEV_SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// External collaborators of a run.
#[derive(Clone)]
pub struct ExpeditionDeps {
    pub invoker: Arc<dyn AgentInvoker>,
    pub publisher: Arc<dyn PrPublisher>,
    pub reviewer: Option<Arc<dyn ReviewRunner>>,
}

impl ExpeditionDeps {
    /// Production collaborators: the agent CLI (or the dry-run invoker),
    /// `gh` for pull requests, and the review command if configured.
    pub fn from_config(config: &ExpeditionConfig) -> Result<Self> {
        let invoker: Arc<dyn AgentInvoker> = if config.dry_run {
            Arc::new(DryRunInvoker)
        } else {
            Arc::new(CommandInvoker::new(
                config.agent_cmd.clone(),
                config.agent_args.clone(),
                config.cancel_grace(),
            ))
        };
        let reviewer = match config.review_cmd.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(script) => Some(Arc::new(CommandReviewRunner::new(
                script,
                config.review_fail_regex()?,
                config.cancel_grace(),
            )) as Arc<dyn ReviewRunner>),
            None => None,
        };
        Ok(Self {
            invoker,
            publisher: Arc::new(GhPublisher::new(config.remote.clone())),
            reviewer,
        })
    }
}

/// A configured, ready-to-run expedition.
pub struct Expedition {
    config: ExpeditionConfig,
    ctx: CycleContext,
    run_id: String,
}

impl Expedition {
    /// Validate `config` and build the pool. Fails on invalid configuration
    /// before anything is dispatched.
    pub fn new(mut config: ExpeditionConfig, deps: ExpeditionDeps) -> Result<Self> {
        config.validate()?;
        let reserve = config.model_reserve()?;
        let pool = Arc::new(WorkingCopyPool::new(PoolConfig {
            continent: config.continent.clone(),
            size: config.workers,
            worktree_root: config.worktree_root(),
            base_branch: config.base_branch.clone(),
            setup_cmd: config.setup_cmd.clone(),
            cancel_grace: config.cancel_grace(),
            detached: config.dry_run,
        }));
        let ctx = CycleContext {
            pool,
            invoker: deps.invoker,
            publisher: deps.publisher,
            reviewer: deps.reviewer,
            reserve,
            timeout: config.timeout(),
            base_branch: config.base_branch.clone(),
            lang: config.lang,
            dry_run: config.dry_run,
        };
        Ok(Self {
            config,
            ctx,
            run_id: new_run_id(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &ExpeditionConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkingCopyPool> {
        &self.ctx.pool
    }

    /// Query the tracker and materialize the queue. Tracker errors are
    /// run-start errors.
    ///
    /// If `cancel` fires mid-fetch the queue comes back empty, so the
    /// following [`run`](Self::run) reports the interruption.
    pub async fn fetch_queue(
        &self,
        tracker: &dyn IssueTracker,
        cancel: &CancelSignal,
    ) -> Result<WorkQueue> {
        let items = tokio::select! {
            fetched = tracker.fetch(&self.config.tracker) => fetched?,
            reason = cancel.cancelled() => {
                warn!(signal = %reason, "interrupted while fetching work items");
                Vec::new()
            }
        };
        Ok(WorkQueue::new(items, &self.config.tracker.states))
    }

    /// Drain `queue` until it is empty, the budget is spent, or `cancel`
    /// fires, then wait for every in-flight cycle.
    pub async fn run(&self, queue: WorkQueue, cancel: &CancelSignal) -> Result<RunReport> {
        let span = run_span(&self.run_id);
        self.run_inner(queue, cancel).instrument(span).await
    }

    async fn run_inner(&self, queue: WorkQueue, cancel: &CancelSignal) -> Result<RunReport> {
        let started = Instant::now();
        let workers = self.ctx.pool.capacity();
        emit_run_started(&self.run_id, workers, queue.len(), self.config.max_cycles);

        let dev_server = match self.config.dev_server_command() {
            Some(command) => Some(
                DevServer::start(
                    command,
                    &self.config.continent,
                    &self.config.expedition_dir().join(".run").join("dev-server.log"),
                )
                .await?,
            ),
            None => None,
        };

        let journal = self.open_journal().await;
        let queue = Arc::new(queue);
        let budget = Arc::new(Budget::new(self.config.max_cycles));
        let outcomes: Arc<Mutex<Vec<(usize, CycleOutcome)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let budget = Arc::clone(&budget);
            let outcomes = Arc::clone(&outcomes);
            let journal = journal.clone();
            let ctx = self.ctx.clone();
            let cancel = cancel.clone();
            let run_id = self.run_id.clone();

            let task = tokio::spawn(
                async move {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let (item, attempt) = match queue.next_within(&budget) {
                            Dispatch::Item { item, attempt } => (item, attempt),
                            Dispatch::Empty | Dispatch::BudgetExhausted => break,
                        };
                        METRICS.inc_dispatched();
                        let outcome = run_cycle(item, attempt, &ctx, &cancel).await;
                        if let Some(journal) = &journal {
                            if let Err(e) = journal.append(&outcome).await {
                                emit_journal_error(&run_id, &e);
                            }
                        }
                        outcomes
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push((attempt, outcome));
                    }
                }
                .instrument(tracing::debug_span!("paintress.worker", worker)),
            );
            tasks.push(task);
        }

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "expedition worker panicked");
            }
        }

        if let Some(server) = dev_server {
            server.stop(DEV_SERVER_STOP_TIMEOUT).await;
        }
        if let Err(e) = self.ctx.pool.shutdown().await {
            warn!(error = %e, "working copy cleanup failed");
        }

        let mut outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(|e| e.into_inner()));
        outcomes.sort_by_key(|(attempt, _)| *attempt);
        let outcomes: Vec<CycleOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

        let stop_reason = if cancel.is_cancelled() {
            StopReason::Cancelled
        } else if queue.is_empty() {
            StopReason::QueueEmpty
        } else {
            StopReason::BudgetExhausted
        };
        let status = aggregate_status(&outcomes, cancel);

        let report = RunReport {
            run_id: self.run_id.clone(),
            status,
            stop_reason,
            attempted: budget.attempted(),
            outcomes,
            duration: started.elapsed(),
        };
        if let Some(journal) = &journal {
            info!(path = %journal.path().display(), "journal written");
        }
        emit_run_finished(&report);
        METRICS.flush();
        Ok(report)
    }

    async fn open_journal(&self) -> Option<Arc<Journal>> {
        if !self.config.journal {
            return None;
        }
        match Journal::open(&self.config.journal_dir(), &self.run_id).await {
            Ok(journal) => Some(Arc::new(journal)),
            Err(e) => {
                emit_journal_error(&self.run_id, &e);
                None
            }
        }
    }
}

/// Interrupted wins over Failed: a run cut short by a signal reports the
/// signal even if some cycles also failed on their own.
pub fn aggregate_status(outcomes: &[CycleOutcome], cancel: &CancelSignal) -> RunStatus {
    if let Some(signal) = cancel.reason() {
        return RunStatus::Interrupted { signal };
    }
    let failed_cycles = outcomes.iter().filter(|o| o.failed_hard()).count();
    if failed_cycles > 0 {
        RunStatus::Failed { failed_cycles }
    } else {
        RunStatus::Success
    }
}

/// Sortable run id: UTC timestamp plus a random suffix.
fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::domain::outcome::{CycleFailure, CycleState, FailureKind};

    fn outcome(id: &str, failure: Option<FailureKind>) -> CycleOutcome {
        CycleOutcome {
            item_id: id.to_string(),
            final_state: if failure.is_some() {
                CycleState::Failed
            } else {
                CycleState::Done
            },
            model: Some("opus".to_string()),
            duration: Duration::ZERO,
            branch: None,
            pull_request: None,
            failure: failure.map(|kind| CycleFailure {
                kind,
                during: CycleState::Implementing,
                message: String::new(),
            }),
            transitions: vec![],
            attempts: vec![],
            dry_run_prompt: None,
        }
    }

    #[test]
    fn test_status_success_and_failed() {
        let never = CancelSignal::never();
        assert_eq!(aggregate_status(&[outcome("A", None)], &never), RunStatus::Success);
        assert_eq!(
            aggregate_status(
                &[outcome("A", None), outcome("B", Some(FailureKind::ModelsExhausted))],
                &never
            ),
            RunStatus::Failed { failed_cycles: 1 }
        );
    }

    #[test]
    fn test_interrupted_takes_precedence() {
        let (handle, signal) = cancel_pair();
        handle.cancel("SIGINT");
        let status = aggregate_status(
            &[
                outcome("A", Some(FailureKind::Publish)),
                outcome("B", Some(FailureKind::Cancelled)),
            ],
            &signal,
        );
        assert_eq!(
            status,
            RunStatus::Interrupted {
                signal: "SIGINT".to_string()
            }
        );
        assert_eq!(status.exit_code(), 130);
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = new_run_id();
        let b = new_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), "20261016T000000Z".len() + 9);
    }
}
