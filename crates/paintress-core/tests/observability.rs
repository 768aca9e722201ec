//! Structured tracing emitted by expedition runs.

mod common;

use std::sync::Arc;

use paintress_core::fakes::{RecordingPublisher, ScriptedInvoker};
use paintress_core::{
    emit_cycle_started, emit_model_fallback, emit_run_started, CancelSignal, CycleSpan, Expedition,
};
use tracing_test::traced_test;

use common::{config, deps, make_continent, queue};

#[traced_test]
#[test]
fn test_emit_run_started_logs_workers_and_queue() {
    emit_run_started("run-123", 3, 7, 10);
    assert!(logs_contain("run.started"));
    assert!(logs_contain("run-123"));
}

#[traced_test]
#[test]
fn test_emit_model_fallback_logs_both_models() {
    emit_model_fallback("MY-1", "opus", "sonnet", "rate limited");
    assert!(logs_contain("cycle.model_fallback"));
    assert!(logs_contain("sonnet"));
    assert!(logs_contain("rate limited"));
}

#[traced_test]
#[test]
fn test_cycle_span_carries_item_id() {
    let span = CycleSpan::new("MY-42");
    {
        let _entered = span.span().enter();
        emit_cycle_started("MY-42", 1);
    }
    assert!(logs_contain("paintress.cycle"));
    assert!(logs_contain("MY-42"));
}

#[traced_test]
#[tokio::test]
async fn test_run_emits_lifecycle_events() {
    let continent = make_continent();
    let invoker = Arc::new(ScriptedInvoker::new().fail("MY-1", "opus"));
    let expedition = Expedition::new(
        config(continent.path(), 1, &["opus", "sonnet"]),
        deps(invoker, Arc::new(RecordingPublisher::new())),
    )
    .unwrap();

    let report = expedition
        .run(queue(&["MY-1"]), &CancelSignal::never())
        .await
        .unwrap();
    assert!(report.outcomes[0].succeeded());

    assert!(logs_contain("run.started"));
    assert!(logs_contain("cycle.started"));
    assert!(logs_contain("cycle.transition"));
    assert!(logs_contain("cycle.model_fallback"));
    assert!(logs_contain("cycle.finished"));
    assert!(logs_contain("run.finished"));
    assert!(logs_contain(&report.run_id));
}
