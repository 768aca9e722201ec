//! Signal-driven shutdown: dispatch stops, in-flight cycles wind down at
//! their checkpoints, and the run reports Interrupted.

mod common;

use std::sync::Arc;
use std::time::Duration;

use paintress_core::fakes::{HangingInvoker, RecordingPublisher, ScriptedInvoker};
use paintress_core::{cancel_pair, CycleState, Expedition, FailureKind, RunStatus, StopReason};

use common::{config, deps, make_continent, queue};

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn cancel_interrupts_in_flight_cycle_and_stops_dispatch() {
    let continent = make_continent();
    let invoker = Arc::new(HangingInvoker::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let expedition = Expedition::new(
        config(continent.path(), 1, &["opus", "sonnet"]),
        deps(invoker.clone(), publisher.clone()),
    )
    .unwrap();

    let (handle, signal) = cancel_pair();
    let run = tokio::spawn(async move {
        expedition
            .run(queue(&["MY-1", "MY-2", "MY-3"]), &signal)
            .await
    });

    wait_until(|| invoker.started() == 1).await;
    handle.cancel("SIGINT");
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.outcomes.len(), 1, "no new cycles after the signal");
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.final_state, CycleState::Failed);
    assert_eq!(outcome.failure_kind(), Some(FailureKind::Cancelled));
    assert!(outcome.interrupted());
    assert_eq!(invoker.started(), 1, "cancellation must not fall back to the next model");

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(
        report.status,
        RunStatus::Interrupted {
            signal: "SIGINT".to_string()
        }
    );
    assert_eq!(report.status.exit_code(), 130);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn cancel_before_run_dispatches_nothing() {
    let continent = make_continent();
    let invoker = Arc::new(ScriptedInvoker::new());
    let expedition = Expedition::new(
        config(continent.path(), 2, &["opus"]),
        deps(invoker.clone(), Arc::new(RecordingPublisher::new())),
    )
    .unwrap();

    let (handle, signal) = cancel_pair();
    handle.cancel("SIGTERM");
    let report = expedition.run(queue(&["MY-1", "MY-2"]), &signal).await.unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(report.attempted, 0);
    assert_eq!(invoker.call_count(), 0);
    assert_eq!(report.status.exit_code(), 130);
}

#[tokio::test]
async fn interrupted_outranks_failed_cycles() {
    let continent = make_continent();
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .with_delay(Duration::from_millis(100))
            .fail("MY-1", "opus"),
    );
    let expedition = Expedition::new(
        config(continent.path(), 1, &["opus"]),
        deps(invoker.clone(), Arc::new(RecordingPublisher::new())),
    )
    .unwrap();

    let (handle, signal) = cancel_pair();
    let observed = invoker.clone();
    let run = tokio::spawn(async move {
        expedition
            .run(queue(&["MY-1", "MY-2", "MY-3"]), &signal)
            .await
    });

    // MY-2 is in flight once the second call is recorded; MY-1 already failed.
    wait_until(|| observed.call_count() == 2).await;
    handle.cancel("SIGINT");
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].failure_kind(), Some(FailureKind::ModelsExhausted));
    assert!(report.outcomes[1].interrupted());
    assert!(matches!(report.status, RunStatus::Interrupted { .. }));
    assert_eq!(report.status.exit_code(), 130);
}
