//! Structured observability hooks for expedition and cycle lifecycle events.
//!
//! This module provides:
//! - A cycle-scoped span via [`CycleSpan`], recording `item_id`, `model`,
//!   `outcome`, and `duration_ms`
//! - Emission functions for key lifecycle events: run start/finish, cycle
//!   start/finish, state transitions, and model fallback
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).
//! For JSON output, pass `--json` to the binary.

use std::time::Instant;

use tracing::field::Empty;
use tracing::{info, warn, Span};

use crate::domain::outcome::{CycleOutcome, CycleState, RunReport};

/// One span per cycle. Futures run under it with
/// `tracing::Instrument::instrument(fut, cycle_span.span().clone())`.
///
/// # Example
///
/// ```ignore
/// let span = CycleSpan::new("MY-1");
/// let outcome = drive(...).instrument(span.span().clone()).await;
/// span.finish(&outcome);
/// ```
pub struct CycleSpan {
    span: Span,
    started: Instant,
}

impl CycleSpan {
    pub fn new(item_id: &str) -> Self {
        let span = tracing::info_span!(
            "paintress.cycle",
            item_id = %item_id,
            model = Empty,
            outcome = Empty,
            duration_ms = Empty,
        );
        Self {
            span,
            started: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record the model currently being tried.
    pub fn record_model(&self, model: &str) {
        self.span.record("model", model);
    }

    /// Record the final outcome and elapsed time on the span.
    pub fn finish(self, outcome: &CycleOutcome) {
        if let Some(model) = &outcome.model {
            self.span.record("model", model.as_str());
        }
        self.span.record("outcome", outcome.label());
        self.span
            .record("duration_ms", self.started.elapsed().as_millis() as u64);
    }
}

/// Span covering a whole run.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("paintress.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, workers: usize, queued: usize, max_cycles: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        workers = workers,
        queued = queued,
        max_cycles = max_cycles,
    );
}

/// Emit event: run finished with its aggregate status.
pub fn emit_run_finished(report: &RunReport) {
    info!(
        event = "run.finished",
        run_id = %report.run_id,
        duration_ms = report.duration.as_millis() as u64,
        attempted = report.attempted,
        succeeded = report.succeeded(),
        failed = report.failed(),
        interrupted = report.interrupted(),
        exit_code = report.status.exit_code(),
    );
}

/// Emit event: a worker picked up an item.
pub fn emit_cycle_started(item_id: &str, attempt: usize) {
    info!(event = "cycle.started", item_id = %item_id, attempt = attempt);
}

pub fn emit_cycle_transition(item_id: &str, from: CycleState, to: CycleState) {
    info!(event = "cycle.transition", item_id = %item_id, from = %from, to = %to);
}

/// Emit event: a soft failure moved the cursor to the next model.
pub fn emit_model_fallback(item_id: &str, from_model: &str, to_model: &str, reason: &str) {
    warn!(
        event = "cycle.model_fallback",
        item_id = %item_id,
        from_model = %from_model,
        to_model = %to_model,
        reason = %reason,
    );
}

/// Emit event: the cycle's single outcome record.
pub fn emit_cycle_finished(outcome: &CycleOutcome) {
    info!(
        event = "cycle.finished",
        item_id = %outcome.item_id,
        final_state = %outcome.final_state,
        outcome = outcome.label(),
        model = outcome.model.as_deref().unwrap_or("-"),
        duration_ms = outcome.duration.as_millis() as u64,
        failure = outcome.failure_kind().map(|k| k.as_str()).unwrap_or("-"),
        pull_request = outcome.pull_request.as_deref().unwrap_or("-"),
    );
}

/// Emit event: a journal write failed (warning level). Runs continue.
pub fn emit_journal_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.journal_error", run_id = %run_id, error = %error);
}
