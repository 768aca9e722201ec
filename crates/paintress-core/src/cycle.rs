//! The per-item cycle state machine.
//!
//! `Dequeued → Acquiring → SettingUp → Implementing → Publishing → Reviewing → Done`,
//! with `Failed` reachable from every non-terminal state. Cancellation is
//! checked before acquisition, before each model attempt, during an
//! invocation, before publishing, and before reviewing. A publish that has
//! started always runs to completion.
//!
//! Every cycle produces exactly one [`CycleOutcome`], and the working copy
//! is released before that outcome is returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, Instrument, Span};

use crate::agent::{invoke_within_deadline, AgentInvoker, InvokeOutcome, InvokeRequest, ModelReserve};
use crate::cancel::CancelSignal;
use crate::config::Language;
use crate::domain::error::PaintressError;
use crate::domain::outcome::{
    AttemptResult, CycleFailure, CycleOutcome, CycleState, FailureKind, ModelAttempt, Transition,
};
use crate::domain::work_item::WorkItem;
use crate::metrics::METRICS;
use crate::obs::{
    emit_cycle_finished, emit_cycle_started, emit_cycle_transition, emit_model_fallback, CycleSpan,
};
use crate::pool::{WorkingCopy, WorkingCopyPool};
use crate::prompt::{build_prompt, PromptContext};
use crate::publish::{PrPublisher, PublishRequest};
use crate::review::{ReviewRequest, ReviewRunner, ReviewVerdict};

/// Shared, read-only inputs for every cycle of a run.
#[derive(Clone)]
pub struct CycleContext {
    pub pool: Arc<WorkingCopyPool>,
    pub invoker: Arc<dyn AgentInvoker>,
    pub publisher: Arc<dyn PrPublisher>,
    pub reviewer: Option<Arc<dyn ReviewRunner>>,
    pub reserve: ModelReserve,
    /// Budget for the whole Implementing phase.
    pub timeout: Duration,
    pub base_branch: String,
    pub lang: Language,
    /// Skip setup, publish, and review; the invoker only emits the prompt.
    pub dry_run: bool,
}

/// Drive `item` through one full cycle. Never returns an error: every
/// failure is folded into the outcome.
pub async fn run_cycle(
    item: WorkItem,
    attempt: usize,
    ctx: &CycleContext,
    cancel: &CancelSignal,
) -> CycleOutcome {
    let span = CycleSpan::new(&item.id);
    let outcome = async {
        emit_cycle_started(&item.id, attempt);
        CycleRun::new(&item, ctx).drive(cancel).await
    }
    .instrument(span.span().clone())
    .await;

    span.finish(&outcome);
    emit_cycle_finished(&outcome);
    if outcome.succeeded() {
        METRICS.inc_succeeded();
    } else if outcome.interrupted() {
        METRICS.inc_interrupted();
    } else {
        METRICS.inc_failed();
    }
    outcome
}

/// Mutable record of one cycle in flight.
struct CycleRun<'a> {
    item: &'a WorkItem,
    ctx: &'a CycleContext,
    state: CycleState,
    started: Instant,
    transitions: Vec<Transition>,
    attempts: Vec<ModelAttempt>,
    model: Option<String>,
    branch: Option<String>,
    pull_request: Option<String>,
    failure: Option<CycleFailure>,
    dry_run_prompt: Option<String>,
}

impl<'a> CycleRun<'a> {
    fn new(item: &'a WorkItem, ctx: &'a CycleContext) -> Self {
        Self {
            item,
            ctx,
            state: CycleState::Dequeued,
            started: Instant::now(),
            transitions: Vec::new(),
            attempts: Vec::new(),
            model: None,
            branch: None,
            pull_request: None,
            failure: None,
            dry_run_prompt: None,
        }
    }

    async fn drive(mut self, cancel: &CancelSignal) -> CycleOutcome {
        self.transition(CycleState::Acquiring);
        if let Some(copy) = self.acquire(cancel).await {
            self.work(&copy, cancel).await;
            self.ctx.pool.release(copy).await;
        }
        self.finish()
    }

    /// Acquiring and SettingUp. On failure the slot is already back in the
    /// pool and `None` is returned.
    async fn acquire(&mut self, cancel: &CancelSignal) -> Option<WorkingCopy> {
        if let Some(reason) = cancel.reason() {
            self.fail(FailureKind::Cancelled, reason);
            return None;
        }

        let ctx = self.ctx;
        let checked_out = ctx.pool.checkout(self.item, cancel).await;
        let mut copy = match checked_out {
            Ok(copy) => copy,
            Err(e) => {
                self.fail_with(FailureKind::Acquisition, e);
                return None;
            }
        };
        self.branch = Some(copy.branch().to_string());
        self.transition(CycleState::SettingUp);

        if !ctx.dry_run {
            if let Err(e) = ctx.pool.ensure_setup(&mut copy, cancel).await {
                self.fail_with(FailureKind::Setup, e);
                ctx.pool.release(copy).await;
                return None;
            }
        }
        Some(copy)
    }

    /// Implementing, Publishing, and Reviewing on an acquired copy.
    async fn work(&mut self, copy: &WorkingCopy, cancel: &CancelSignal) {
        self.transition(CycleState::Implementing);
        if !self.implement(copy, cancel).await {
            return;
        }

        if let Some(reason) = cancel.reason() {
            self.fail(FailureKind::Cancelled, reason);
            return;
        }
        self.transition(CycleState::Publishing);
        if self.ctx.dry_run {
            debug!(item_id = %self.item.id, "dry run, skipping publish");
        } else if !self.publish(copy).await {
            return;
        }

        if let Some(reason) = cancel.reason() {
            self.fail(FailureKind::Cancelled, reason);
            return;
        }
        self.transition(CycleState::Reviewing);
        if !self.review(copy, cancel).await {
            return;
        }
        self.transition(CycleState::Done);
    }

    /// Walk the model reserve until one model succeeds. Returns `false` once
    /// the cycle has failed.
    async fn implement(&mut self, copy: &WorkingCopy, cancel: &CancelSignal) -> bool {
        let ctx = self.ctx;
        let deadline = Instant::now() + ctx.timeout;
        let prompt = build_prompt(
            self.item,
            &PromptContext {
                branch: copy.branch(),
                base: &ctx.base_branch,
                lang: ctx.lang,
                direct: copy.is_direct(),
            },
        );
        if ctx.dry_run {
            self.dry_run_prompt = Some(prompt.clone());
        }

        let mut cursor = ctx.reserve.cursor();
        loop {
            if let Some(reason) = cancel.reason() {
                self.fail(FailureKind::Cancelled, reason);
                return false;
            }

            let model = cursor.current().to_string();
            Span::current().record("model", model.as_str());
            self.model = Some(model.clone());

            let request = InvokeRequest {
                workdir: copy.path(),
                item: self.item,
                branch: copy.branch(),
                model: &model,
                prompt: &prompt,
                deadline,
            };
            let attempt_started = Instant::now();
            let outcome = invoke_within_deadline(ctx.invoker.as_ref(), &request, cancel).await;
            let duration_ms = attempt_started.elapsed().as_millis() as u64;

            match outcome {
                InvokeOutcome::Success => {
                    self.record_attempt(cursor.position(), &model, AttemptResult::Succeeded, duration_ms, None);
                    return true;
                }
                InvokeOutcome::SoftFail(reason) => {
                    self.record_attempt(
                        cursor.position(),
                        &model,
                        AttemptResult::SoftFailed,
                        duration_ms,
                        Some(reason.clone()),
                    );
                    match cursor.advance() {
                        Some(next) => {
                            emit_model_fallback(&self.item.id, &model, next, &reason);
                            METRICS.inc_model_fallbacks();
                            self.transition(CycleState::Implementing);
                        }
                        None => {
                            let err = PaintressError::Invocation { model, reason };
                            self.fail(
                                FailureKind::ModelsExhausted,
                                format!("all {} models failed; last: {err}", ctx.reserve.len()),
                            );
                            return false;
                        }
                    }
                }
                InvokeOutcome::DeadlineExceeded => {
                    self.record_attempt(cursor.position(), &model, AttemptResult::DeadlineExceeded, duration_ms, None);
                    let err = PaintressError::DeadlineExceeded(ctx.timeout);
                    self.fail(FailureKind::DeadlineExceeded, err.to_string());
                    return false;
                }
                InvokeOutcome::Cancelled(reason) => {
                    self.record_attempt(cursor.position(), &model, AttemptResult::Cancelled, duration_ms, None);
                    self.fail(FailureKind::Cancelled, reason);
                    return false;
                }
            }
        }
    }

    async fn publish(&mut self, copy: &WorkingCopy) -> bool {
        let ctx = self.ctx;
        let model = self.model.clone().unwrap_or_default();
        let request = PublishRequest {
            workdir: copy.path(),
            item: self.item,
            branch: copy.branch(),
            base: &ctx.base_branch,
            model: &model,
        };
        let published = ctx.publisher.publish(&request).await;
        match published {
            Ok(pr) => {
                self.pull_request = Some(pr);
                true
            }
            Err(e) => {
                self.fail_with(FailureKind::Publish, e);
                false
            }
        }
    }

    async fn review(&mut self, copy: &WorkingCopy, cancel: &CancelSignal) -> bool {
        let ctx = self.ctx;
        let Some(reviewer) = ctx.reviewer.as_ref().filter(|_| !ctx.dry_run) else {
            return true;
        };
        let pull_request = self.pull_request.clone().unwrap_or_default();
        let request = ReviewRequest {
            workdir: copy.path(),
            item: self.item,
            branch: copy.branch(),
            pull_request: &pull_request,
        };
        let verdict = reviewer.review(&request, cancel).await;
        match verdict {
            Ok(ReviewVerdict::Pass) => true,
            Ok(ReviewVerdict::Fail(reason)) => {
                self.fail(FailureKind::Review, reason);
                false
            }
            Err(e) => {
                self.fail_with(FailureKind::Review, e);
                false
            }
        }
    }

    fn record_attempt(
        &mut self,
        cursor: usize,
        model: &str,
        result: AttemptResult,
        duration_ms: u64,
        detail: Option<String>,
    ) {
        self.attempts.push(ModelAttempt {
            cursor,
            model: model.to_string(),
            result,
            duration_ms,
            detail,
        });
    }

    fn transition(&mut self, to: CycleState) {
        let from = self.state;
        debug_assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
        self.transitions.push(Transition {
            from,
            to,
            at_ms: self.started.elapsed().as_millis() as u64,
        });
        self.state = to;
        emit_cycle_transition(&self.item.id, from, to);
    }

    /// Fail with `kind`, unless `err` is a cancellation.
    fn fail_with(&mut self, kind: FailureKind, err: PaintressError) {
        match err {
            PaintressError::Cancelled(reason) => self.fail(FailureKind::Cancelled, reason),
            other => self.fail(kind, other.to_string()),
        }
    }

    fn fail(&mut self, kind: FailureKind, message: impl Into<String>) {
        let during = self.state;
        self.failure = Some(CycleFailure {
            kind,
            during,
            message: message.into(),
        });
        self.transition(CycleState::Failed);
    }

    fn finish(self) -> CycleOutcome {
        CycleOutcome {
            item_id: self.item.id.clone(),
            final_state: self.state,
            model: self.model,
            duration: self.started.elapsed(),
            branch: self.branch,
            pull_request: self.pull_request,
            failure: self.failure,
            transitions: self.transitions,
            attempts: self.attempts,
            dry_run_prompt: self.dry_run_prompt,
        }
    }
}
